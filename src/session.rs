// src/session.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::info;

use crate::conversation::ConversationLog;
use crate::csv_handler::CsvHandler;
use crate::data_types::{Dataset, Upload};
use crate::error::{CsvFormatError, CsvFormatReason};

pub const INITIAL_UPLOAD_STATUS: &str = "Click / drag & drop to upload a CSV file!";
pub const UNSUPPORTED_TYPE_STATUS: &str = "Error: Please upload a valid CSV file.";
pub const PARSE_FAILURE_STATUS: &str = "Error parsing CSV file. Please ensure it is valid.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Sending,
}

/// Everything one user session owns: the current dataset, the conversation,
/// and the single-flight request flag.
///
/// Shared by reference (usually behind an `Arc`); every operation takes `&self`.
pub struct Session {
    dataset: RwLock<Option<Arc<Dataset>>>,
    log: ConversationLog,
    sending: AtomicBool,
    upload_status: Mutex<String>,
    csv: CsvHandler,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Session {
            dataset: RwLock::new(None),
            log: ConversationLog::new(),
            sending: AtomicBool::new(false),
            upload_status: Mutex::new(INITIAL_UPLOAD_STATUS.to_string()),
            csv: CsvHandler::new(),
        }
    }

    /// Snapshot of the current dataset. Later uploads do not affect it.
    pub fn dataset(&self) -> Option<Arc<Dataset>> {
        self.dataset
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace_dataset(&self, dataset: Option<Arc<Dataset>>) {
        *self
            .dataset
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = dataset;
    }

    fn set_upload_status(&self, status: String) {
        *self
            .upload_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    pub fn upload_status(&self) -> String {
        self.upload_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Ingest an upload and install it as the current dataset.
    ///
    /// A rejected type leaves the current dataset in place; a parse failure
    /// discards it.
    pub fn upload(&self, upload: &Upload) -> Result<Arc<Dataset>, CsvFormatError> {
        match self.csv.ingest_upload(upload) {
            Ok(dataset) => {
                let dataset = Arc::new(dataset);
                self.replace_dataset(Some(Arc::clone(&dataset)));
                self.set_upload_status(format!(
                    "CSV uploaded successfully! Filename: {}",
                    upload.name
                ));
                info!(
                    file = %upload.name,
                    columns = dataset.columns().len(),
                    rows = dataset.row_count(),
                    "dataset loaded"
                );
                Ok(dataset)
            }
            Err(err) => {
                match err.reason {
                    CsvFormatReason::UnsupportedType(_) => {
                        self.set_upload_status(UNSUPPORTED_TYPE_STATUS.to_string());
                    }
                    CsvFormatReason::ParseFailure(_) => {
                        self.replace_dataset(None);
                        self.set_upload_status(PARSE_FAILURE_STATUS.to_string());
                    }
                }
                info!(file = %upload.name, reason = err.reason_code(), "upload refused");
                Err(err)
            }
        }
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn clear_conversation(&self) {
        self.log.clear();
    }

    pub fn request_state(&self) -> RequestState {
        if self.sending.load(Ordering::Acquire) {
            RequestState::Sending
        } else {
            RequestState::Idle
        }
    }

    /// Move to `Sending` if currently `Idle`. The returned guard moves the
    /// session back to `Idle` when dropped, on every exit path.
    pub(crate) fn try_begin_request(&self) -> Option<RequestGuard<'_>> {
        self.sending
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RequestGuard {
                flag: &self.sending,
            })
    }
}

pub(crate) struct RequestGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
