use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Error type for queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    /// IO error from file or directory operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error from the backing sled store.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// UTF-8 conversion error on a stored key.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] FromUtf8Error),

    /// Settings file could not be parsed.
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An event payload must carry at least one byte.
    #[error("empty event payload")]
    EmptyEvent,

    /// Free-form error message.
    #[error("{0}")]
    StringError(String),
}

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
