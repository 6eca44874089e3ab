//! Conversational chart assistant.
//!
//! Upload a CSV file, ask for a chart in plain language, get back a chart
//! specification bound to your data. The pieces:
//!
//! - [`csv_handler`] parses uploads into a raw and a type-inferred table.
//! - [`session`] owns the current dataset, the conversation and the request flag.
//! - [`orchestrator`] sends one prompt at a time to the inference service and
//!   records the outcome as conversation turns.
//! - [`chart`] inlines the dataset into the returned specification.

pub mod chart;
pub mod config;
pub mod conversation;
pub mod csv_handler;
pub mod data_types;
pub mod error;
pub mod orchestrator;
pub mod query_client;
pub mod session;
pub mod ui;

pub use chart::{ChartBinder, ChartSpec, RenderableSpec};
pub use config::AppConfig;
pub use conversation::{ConversationLog, Turn};
pub use csv_handler::CsvHandler;
pub use data_types::{CellValue, Dataset, RawRow, TypedRow, Upload};
pub use error::{ConfigError, CsvFormatError, CsvFormatReason, TransportError};
pub use orchestrator::{QueryOrchestrator, SendOutcome};
pub use query_client::{HttpTransport, QueryReply, QueryRequest, QueryTransport};
pub use session::{RequestState, Session};
