//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Signal error: {0}")]
    Signal(String),

    #[error("Pipe error: {0}")]
    Pipe(String),

    #[error("Reap error: {0}")]
    Reap(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Other(String),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Spawn(_) => "RUN001",
            CoreError::Signal(_) => "RUN002",
            CoreError::Pipe(_) => "RUN003",
            CoreError::Reap(_) => "RUN004",
            CoreError::Configuration(_) => "RUN005",
            CoreError::Io(_) => "RUN006",
            CoreError::Serialization(_) => "RUN007",
            CoreError::Other(_) => "RUN999",
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

// Convenience implementations
impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}
