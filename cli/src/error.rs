//! CLI error types

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The daemon rejected or failed the request.
    #[error("{0}")]
    Daemon(String),

    /// The launch was reported but did not produce a live process.
    #[error("{0}")]
    Aborted(String),

    #[error("IPC error: {0}")]
    Ipc(#[from] ipc::IpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CliError::InvalidArgument(_) => "CLI001",
            CliError::Daemon(_) => "CLI002",
            CliError::Aborted(_) => "CLI003",
            CliError::Ipc(_) => "CLI004",
            CliError::Io(_) => "CLI005",
        }
    }
}

/// CLI-specific result type
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CliError::InvalidArgument("x".to_string()).code(), "CLI001");
        assert_eq!(CliError::Daemon("x".to_string()).code(), "CLI002");
        assert_eq!(CliError::Aborted("x".to_string()).code(), "CLI003");
    }

    #[test]
    fn test_error_display() {
        let error = CliError::Aborted("ABORTED: server=s alias=a cmd=c".to_string());
        assert_eq!(error.to_string(), "ABORTED: server=s alias=a cmd=c");
    }
}
