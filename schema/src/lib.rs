//! Schema definitions for Runmate
//!
//! This crate contains the shared wire vocabulary used across the
//! runmate ecosystem: requests, responses, and the configuration
//! structures for the daemon and the client. All types here implement
//! JSON Schema generation for external consumption.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Request types accepted by the run-server daemon
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Request {
    /// Launch a detached command
    Start(StartRequest),
    /// Launch a command with its stdio bridged to a stdio server
    StartStdio(StartStdioRequest),
    /// Open a user terminal for a stdio session (stdio-server side)
    UserStdio(UserStdioRequest),
    /// Send an arbitrary signal to an alias
    Kill {
        #[serde(default)]
        alias: String,
        #[serde(default)]
        signum: i32,
    },
    /// Send SIGTERM to an alias
    Sigterm {
        #[serde(default)]
        alias: String,
    },
    /// Send SIGTERM to every process in the registry
    Sigtermall,
    /// List the registry contents
    Ps,
    /// Check whether an alias names a live process
    Isrunning {
        #[serde(default)]
        alias: String,
    },
    /// Terminate the terminal record for an alias (stdio-server side)
    Killstdio {
        #[serde(default)]
        alias: String,
    },
    /// Resolve an executable name on the daemon's PATH
    Which {
        #[serde(default)]
        name: String,
    },
    /// Report a system information snapshot
    Sysinfo,
    /// Terminate every child and shut the daemon down
    Exit,
    /// Upgrade this connection into a raw stdio stream for a session
    StdioAttach { session: String, role: StdioRole },
}

/// Parameters for a plain (detached) launch
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Full command line, quote-aware
    #[serde(default)]
    pub cmd: String,
    /// Alias the process is registered under
    #[serde(default, rename = "as")]
    pub alias: String,
    /// Working directory for the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Extra environment, `KEY=VALUE` pairs separated by `;`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// Logger sink address; empty string selects the daemon default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

/// Parameters for a launch whose stdio is bridged to a stdio server
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartStdioRequest {
    /// Full command line, quote-aware
    #[serde(default)]
    pub cmd: String,
    /// Alias the process is registered under
    #[serde(default, rename = "as")]
    pub alias: String,
    /// Address of the daemon hosting the user terminal
    #[serde(default)]
    pub stdio: String,
    /// Working directory for the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Extra environment, `KEY=VALUE` pairs separated by `;`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// Also forward output lines to a logger sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    /// Keep the terminal window open after the command exits
    #[serde(default)]
    pub hold: bool,
    /// X geometry string for the terminal window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
}

/// Parameters for opening the user-facing terminal of a session
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStdioRequest {
    #[serde(default, rename = "as")]
    pub alias: String,
    /// Session identifier minted by the command-side daemon
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub hold: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
}

/// Attachment roles for a `stdioAttach` upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum StdioRole {
    /// The connection feeds command output into the session
    Output,
    /// The connection drains terminal keystrokes from the session
    Input,
    /// Bidirectional terminal endpoint
    Terminal,
}

/// Response types from the daemon
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Response {
    /// Launch outcome; `pid <= 0` means the launch was aborted
    Started {
        pid: i32,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    /// Generic acknowledgement
    Ack { message: String },
    /// Registry listing
    Procs { procs: Vec<ProcSummary> },
    /// Executable resolution result
    Which { path: String },
    /// System information snapshot
    Sysinfo(SysInfo),
    /// Request was rejected or failed
    Error { message: String },
}

/// One registry entry as reported by `ps`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcSummary {
    pub alias: String,
    pub pid: i32,
    pub cmd: String,
    /// Environment overlay the process was started with, if any
    #[serde(default)]
    pub env: String,
    /// `"running"` or `"zombie"`
    pub status: String,
    #[serde(default)]
    pub hold: bool,
}

/// System information snapshot returned by `sysinfo`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SysInfo {
    pub os: String,
    pub arch: String,
    pub hostname: String,
    pub user: String,
    pub cpu_count: usize,
    pub cpu_model: String,
    pub memory_total_kib: u64,
    pub memory_free_kib: u64,
    pub storage_total_bytes: u64,
    pub storage_free_bytes: u64,
}

/// Configuration structure for the daemon
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Address to bind the daemon to
    pub listen: String,
    /// Identity used in session ids and status lines; defaults to `listen`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Default logger sink for logged launches
    #[serde(default = "default_logger")]
    pub logger: String,
    /// Capture stdout/stderr of every `start` through the logger sink
    #[serde(default)]
    pub log_all: bool,
    /// Connect attempts for daemon-to-daemon sends
    #[serde(default = "default_retries")]
    pub send_retries: u32,
    /// Delay between connect attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub send_retry_delay_ms: u64,
}

impl DaemonConfig {
    /// The identity this daemon stamps into session ids and status lines.
    pub fn server_id(&self) -> &str {
        self.server_id.as_deref().unwrap_or(&self.listen)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9340".to_string(),
            server_id: None,
            logger: default_logger(),
            log_all: false,
            send_retries: default_retries(),
            send_retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_logger() -> String {
    "127.0.0.1:9341".to_string()
}

/// Client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Connect attempts before giving up
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Delay between connect attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    250
}
