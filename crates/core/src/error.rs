//! Error types for blackbox-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Terminal error: {0}")]
    Terminal(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("Wifi error: {0}")]
    Wifi(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: invalid credential")]
    AuthFailed,

    #[error("Invalid token format")]
    InvalidTokenFormat,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<quinn::ConnectionError> for CoreError {
    fn from(err: quinn::ConnectionError) -> Self {
        CoreError::Connection(err.to_string())
    }
}

impl From<quinn::WriteError> for CoreError {
    fn from(err: quinn::WriteError) -> Self {
        CoreError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, err))
    }
}
