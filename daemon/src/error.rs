//! Daemon error types

use thiserror::Error;

/// Daemon-specific error types
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Server error: {0}")]
    Server(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] runmate_core::CoreError),

    #[error("Transport error: {0}")]
    Ipc(#[from] ipc::IpcError),
}

/// Daemon-specific result type
pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DaemonError::Server("bind failed".to_string());
        assert_eq!(error.to_string(), "Server error: bind failed");
    }

    #[test]
    fn test_error_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let error: DaemonError = io.into();
        assert!(matches!(error, DaemonError::Io(_)));

        let error: DaemonError = ipc::IpcError::EmptyResponse.into();
        assert!(matches!(error, DaemonError::Ipc(_)));
    }
}
