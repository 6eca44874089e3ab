// src/conversation.rs
use std::sync::{Arc, Mutex, MutexGuard};

use crate::chart::RenderableSpec;

/// One entry in the conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    UserText(String),
    SystemText(String),
    SystemChart(Arc<RenderableSpec>),
}

impl Turn {
    pub fn is_user(&self) -> bool {
        matches!(self, Turn::UserText(_))
    }
}

/// Append-only sequence of turns. The only way to shrink it is `clear`.
#[derive(Debug, Default)]
pub struct ConversationLog {
    turns: Mutex<Vec<Turn>>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    // Pushes and clears are single operations; a poisoned log is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<Turn>> {
        self.turns.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, turn: Turn) {
        self.lock().push(turn);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.lock().clone()
    }

    /// Turns appended after the first `from`, for incremental readers.
    pub fn since(&self, from: usize) -> Vec<Turn> {
        let turns = self.lock();
        turns.get(from..).map(<[Turn]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
