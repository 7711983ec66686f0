//! Platform layer for process management
//!
//! Everything the supervision core needs from the operating system
//! goes through the [`Platform`] trait: spawning, signalling, pipe
//! creation, and collecting exited children. The daemon wires in
//! [`unix::UnixPlatform`]; tests use [`mock::MockPlatform`].

pub mod mock;
pub mod unix;

use std::os::fd::OwnedFd;
use std::path::PathBuf;

use crate::Result;

/// Where a spawned child's standard stream is connected.
#[derive(Debug)]
pub enum StdioTarget {
    /// `/dev/null`
    Null,
    /// Inherit the daemon's stream
    Inherit,
    /// An owned pipe endpoint; consumed by the spawn
    Fd(OwnedFd),
}

/// Everything needed to launch one child process.
#[derive(Debug)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    /// Extra variables layered over the daemon's environment
    pub env: Vec<(String, String)>,
    pub stdin: StdioTarget,
    pub stdout: StdioTarget,
    pub stderr: StdioTarget,
}

impl SpawnSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            workdir: None,
            env: Vec::new(),
            stdin: StdioTarget::Null,
            stdout: StdioTarget::Null,
            stderr: StdioTarget::Null,
        }
    }

    pub fn workdir(mut self, dir: Option<PathBuf>) -> Self {
        self.workdir = dir;
        self
    }

    pub fn envs(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn stdin(mut self, target: StdioTarget) -> Self {
        self.stdin = target;
        self
    }

    pub fn stdout(mut self, target: StdioTarget) -> Self {
        self.stdout = target;
        self
    }

    pub fn stderr(mut self, target: StdioTarget) -> Self {
        self.stderr = target;
        self
    }
}

/// OS seam for the registry, launcher, and reaper.
///
/// Implementations must be cheap to call from the dispatcher task;
/// nothing here blocks beyond a syscall.
pub trait Platform: Send + Sync {
    /// Spawn a child in its own session; returns the pid.
    ///
    /// The exit status is collected later through [`Platform::reap_next`],
    /// never by the caller.
    fn spawn(&self, spec: SpawnSpec) -> Result<i32>;

    /// Send `signum` to `pid`. Signal 0 probes for existence.
    ///
    /// A missing target is an error; callers decide whether that is
    /// benign.
    fn send_signal(&self, pid: i32, signum: i32) -> Result<()>;

    /// Whether `pid` still exists (running or zombie).
    fn is_alive(&self, pid: i32) -> bool;

    /// Create a pipe, returning `(read_end, write_end)`.
    fn create_pipe(&self) -> Result<(OwnedFd, OwnedFd)>;

    /// Collect one exited child without blocking.
    ///
    /// Returns `None` once no more children are waitable right now.
    fn reap_next(&self) -> Option<i32>;
}
