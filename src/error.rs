//! Error types for the configuration mirror.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a key/value backend
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid URI error, please check backend url: {0}")]
    InvalidUrl(String),

    #[error("Unsupported key/value store: {0}")]
    UnsupportedScheme(String),

    #[error("Key/value store unreachable: {0}")]
    Unreachable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Watch history cleared, store is now at index {0}")]
    HistoryCleared(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors raised while touching the mirrored filesystem
#[derive(Debug, Error)]
pub enum PathError {
    #[error("Not a directory: {0:?}")]
    NotADirectory(PathBuf),

    #[error("Not a file: {0:?}")]
    NotAFile(PathBuf),

    #[error("Does not exist: {0:?}")]
    DoesNotExist(PathBuf),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PathError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PathError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Template evaluation failures
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Unterminated template action at offset {0}")]
    Unterminated(usize),

    #[error("Unknown template function: {0}")]
    UnknownFunction(String),

    #[error("Bad arguments to {function}: {reason}")]
    BadArguments { function: String, reason: String },

    #[error("Template references missing key: {0}")]
    MissingKey(String),

    #[error("Key/value lookup failed: {0}")]
    Kv(#[from] KvError),
}

/// Top-level error taxonomy for the synchronization engine
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Key/value error: {0}")]
    Kv(#[from] KvError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Configuration(err.to_string())
    }
}

impl From<notify::Error> for SyncError {
    fn from(err: notify::Error) -> Self {
        SyncError::Watch(err.to_string())
    }
}
