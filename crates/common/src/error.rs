//! Common error types for Upwatch components.

use std::fmt;

/// A specialized Result type for Upwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Upwatch operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new HTTP client error.
    pub fn client(msg: impl fmt::Display) -> Self {
        Error::Client(msg.to_string())
    }

    /// Create a new logging error.
    pub fn logging(msg: impl fmt::Display) -> Self {
        Error::Logging(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
