use std::path::PathBuf;

/// Core error type for the exporter.
///
/// Adapter crates should map their specific errors into this type so the
/// pipeline can tell fatal failures (config) from per-message ones.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("invalid annotation: {0}")]
    Annotation(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Whether a retry has any chance of succeeding.
    ///
    /// Only remote failures are retried; local ones (bad config, bad spans, disk)
    /// fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::External(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
