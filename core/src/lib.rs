//! Core functionality for the runmate run-server
//!
//! This crate contains the supervision machinery shared by the daemon
//! and CLI components: command-line splitting, the process registry,
//! the platform layer, the launcher, stdio sessions, the zombie
//! reaper, and the sysinfo/which helpers.

pub mod cmdline;
pub mod error;
#[cfg(unix)]
pub mod launcher;
#[cfg(unix)]
pub mod process;
#[cfg(unix)]
pub mod reaper;
#[cfg(unix)]
pub mod registry;
pub mod stdio;
#[cfg(unix)]
pub mod sysinfo;
pub mod which;

// Re-export schema types for convenience
pub use schema::*;

pub use error::{CoreError, Result};

/// Environment marker set on every supervised child.
pub const ENV_SUPERVISED: &str = "RUNMATE_IS_SUPERVISED";

/// Environment marker telling a child whether its output is forwarded.
pub const ENV_FORWARDING_LOG: &str = "RUNMATE_IS_FORWARDING_LOG";

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::Configuration(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
