//! Error handling for the register logging bridge.

use thiserror::Error;

/// Service error type
#[derive(Error, Debug)]
pub enum LogSrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device protocol and communication errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] mcproto::McError),

    /// Data handling errors (decoding, conversion)
    #[error("Data error: {0}")]
    Data(String),

    /// Persistence-layer errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the service
pub type Result<T> = std::result::Result<T, LogSrvError>;

impl LogSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        LogSrvError::Config(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        LogSrvError::Persistence(msg.into())
    }
}

impl From<sqlx::Error> for LogSrvError {
    fn from(err: sqlx::Error) -> Self {
        LogSrvError::Persistence(err.to_string())
    }
}

impl From<figment::Error> for LogSrvError {
    fn from(err: figment::Error) -> Self {
        LogSrvError::Config(err.to_string())
    }
}
