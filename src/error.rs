//! Error types for Sluice
//!
//! One crate-wide error enum covers the recording, replay, and catalog
//! paths. Transport-level status mapping lives with the HTTP layer; this
//! module only captures what went wrong and where.

use thiserror::Error;

/// Result type alias for Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Main error type for Sluice
#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("no recording found: {0}")]
    RecordingNotFound(String),

    /// A recording exists for the ID, but with the other task shape.
    /// Mixing these up is a common operator mistake and gets its own
    /// message rather than a generic not-found.
    #[error("found recording of wrong type for {0}, check that the task type matches the recording")]
    WrongRecordingType(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("time-series database error: {0}")]
    Tsdb(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("edge closed")]
    EdgeClosed,

    #[error("task {phase}: {detail}")]
    Task { phase: String, detail: String },

    #[error("server error: {0}")]
    Server(String),
}

impl SluiceError {
    /// Create a bad-request error with context
    pub fn request(detail: impl Into<String>) -> Self {
        SluiceError::Request(detail.into())
    }

    /// Create a query error with context
    pub fn query(detail: impl Into<String>) -> Self {
        SluiceError::Query(detail.into())
    }

    /// Create a TSDB error with context
    pub fn tsdb(detail: impl Into<String>) -> Self {
        SluiceError::Tsdb(detail.into())
    }

    /// Create a decode error with context
    pub fn decode(detail: impl Into<String>) -> Self {
        SluiceError::Decode(detail.into())
    }

    /// Create a task error tagged with the phase it failed in
    ///
    /// # Example
    /// ```ignore
    /// SluiceError::task("start", "unknown batch slot")
    /// // produces: "task start: unknown batch slot"
    /// ```
    pub fn task(phase: &str, detail: impl Into<String>) -> Self {
        SluiceError::Task {
            phase: phase.to_string(),
            detail: detail.into(),
        }
    }

    /// Create a server error with context
    pub fn server(detail: impl Into<String>) -> Self {
        SluiceError::Server(detail.into())
    }

    /// True for the not-found family, wrong-type included
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SluiceError::TaskNotFound(_)
                | SluiceError::RecordingNotFound(_)
                | SluiceError::WrongRecordingType(_)
        )
    }
}

impl From<zip::result::ZipError> for SluiceError {
    fn from(e: zip::result::ZipError) -> Self {
        SluiceError::Archive(e.to_string())
    }
}
