//! Error types for the log exporter

use std::time::Duration;
use thiserror::Error;
use tonic::Code;

pub type Result<T> = std::result::Result<T, ExporterError>;

#[derive(Debug, Error)]
pub enum ExporterError {
    /// `start` was called more than once
    #[error("exporter already started")]
    AlreadyStarted,

    /// Operation requires a running exporter
    #[error("exporter not started")]
    NotStarted,

    /// Exporter has been shut down
    #[error("exporter stopped")]
    Stopped,

    /// No usable connection to the collector
    #[error("exporter disconnected")]
    Disconnected,

    /// In-flight attempt was cancelled by shutdown
    #[error("context canceled")]
    Cancelled,

    /// Shutdown deadline elapsed before the background connector confirmed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Dialing the collector failed
    #[error("dial error: {0}")]
    Dial(String),

    /// Collector rejected or failed the export call
    #[error(transparent)]
    Export(#[from] ExportFailure),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Structured failure returned by the collector for a single export call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("export failed with {code:?}: {message}")]
pub struct ExportFailure {
    pub code: Code,
    pub message: String,
    /// Server supplied minimum wait before retrying this call
    pub retry_after: Option<Duration>,
}

impl ExportFailure {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Failure that indicates the transport itself is unusable.
    pub fn is_connection_failure(&self) -> bool {
        self.code == Code::Unavailable
    }
}

/// Outcome of a rejected submission. Producers never see delivery errors.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Intake queue is full; the batch was dropped
    #[error("intake queue full, batch dropped")]
    QueueFull,

    /// Shutdown has begun
    #[error("exporter stopped")]
    Stopped,

    /// `start` has not been called yet
    #[error("exporter not started")]
    NotStarted,
}
