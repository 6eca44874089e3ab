// src/error.rs
use std::path::PathBuf;
use std::time::Duration;

/// Why an upload did not produce a dataset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CsvFormatReason {
    /// The declared MIME type is not a CSV-family type. Leaves any existing dataset alone.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// The file claimed to be CSV but could not be tokenized into an aligned table.
    /// Discards any existing dataset.
    #[error("parse failure: {0}")]
    ParseFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CSV format error: {reason}")]
pub struct CsvFormatError {
    pub reason: CsvFormatReason,
}

impl CsvFormatError {
    pub fn unsupported_type(mime: impl Into<String>) -> Self {
        CsvFormatError {
            reason: CsvFormatReason::UnsupportedType(mime.into()),
        }
    }

    pub fn parse_failure(detail: impl Into<String>) -> Self {
        CsvFormatError {
            reason: CsvFormatReason::ParseFailure(detail.into()),
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self.reason {
            CsvFormatReason::UnsupportedType(_) => "unsupported-type",
            CsvFormatReason::ParseFailure(_) => "parse-failure",
        }
    }
}

impl From<csv::Error> for CsvFormatError {
    fn from(err: csv::Error) -> Self {
        CsvFormatError::parse_failure(err.to_string())
    }
}

/// Failures talking to the inference service.
///
/// The conversation log shows all of these the same way
/// (`Error fetching data: <display>`); the variants exist for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0}")]
    Network(String),

    #[error("Network response failed.")]
    Status(u16),

    #[error("{0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Invalid(String),
}
