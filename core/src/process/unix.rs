//! Unix implementation of the platform layer
//!
//! Spawned children are placed in their own session via `setsid()` in
//! a `pre_exec` hook, detaching them from the daemon's terminal and
//! giving each command its own process group. Exit statuses are never
//! collected through the `Child` handle; the reaper sweeps them up
//! with `waitpid(-1, WNOHANG)` so that a single component owns
//! child collection for the whole process.

// Allow unsafe code for this module since process management requires libc::setsid() calls
#![allow(unsafe_code)]

use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, error, warn};

use super::{Platform, SpawnSpec, StdioTarget};
use crate::{CoreError, Result};

/// The real operating-system backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPlatform;

fn stdio_from(target: StdioTarget) -> Stdio {
    match target {
        StdioTarget::Null => Stdio::null(),
        StdioTarget::Inherit => Stdio::inherit(),
        StdioTarget::Fd(fd) => Stdio::from(fd),
    }
}

impl Platform for UnixPlatform {
    fn spawn(&self, spec: SpawnSpec) -> Result<i32> {
        debug!("Spawning process: {} {:?}", spec.program, spec.args);

        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        command.envs(spec.env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &spec.workdir {
            command.current_dir(dir);
        }
        command.stdin(stdio_from(spec.stdin));
        command.stdout(stdio_from(spec.stdout));
        command.stderr(stdio_from(spec.stderr));

        // Safety: setsid() is async-signal-safe and appropriate for use in pre_exec
        #[deny(unsafe_op_in_unsafe_fn)]
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| {
            error!("Failed to spawn process '{}': {}", spec.program, e);
            CoreError::Spawn(format!("Failed to spawn '{}': {}", spec.program, e))
        })?;

        let pid = child.id() as i32;
        debug!("Successfully spawned process {} in new session", pid);
        // Dropping the Child handle neither kills nor waits the
        // process; the reaper collects it.
        Ok(pid)
    }

    fn send_signal(&self, pid: i32, signum: i32) -> Result<()> {
        let target = Pid::from_raw(pid);
        let result = if signum == 0 {
            kill(target, None)
        } else {
            let sig = Signal::try_from(signum)
                .map_err(|e| CoreError::Signal(format!("Invalid signal {}: {}", signum, e)))?;
            kill(target, sig)
        };
        result.map_err(|e| {
            debug!("Failed to signal process {} with {}: {}", pid, signum, e);
            CoreError::Signal(format!(
                "Failed to send signal {} to process {}: {}",
                signum, pid, e
            ))
        })
    }

    fn is_alive(&self, pid: i32) -> bool {
        kill(Pid::from_raw(pid), None).is_ok()
    }

    fn create_pipe(&self) -> Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
        nix::unistd::pipe().map_err(|e| CoreError::Pipe(format!("Failed to create pipe: {}", e)))
    }

    fn reap_next(&self) -> Option<i32> {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    debug!("Child {} exited with code {}", pid, code);
                    return Some(pid.as_raw());
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    debug!("Child {} terminated by signal {}", pid, sig);
                    return Some(pid.as_raw());
                }
                Ok(WaitStatus::StillAlive) => return None,
                Ok(_) => continue,
                Err(Errno::ECHILD) => return None,
                Err(e) => {
                    warn!("waitpid failed: {}", e);
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_signal_rejects_bad_signum() {
        let platform = UnixPlatform;
        let result = platform.send_signal(std::process::id() as i32, 99999);
        assert!(matches!(result, Err(CoreError::Signal(_))));
    }

    #[test]
    fn signal_zero_probes_own_process() {
        let platform = UnixPlatform;
        assert!(platform.send_signal(std::process::id() as i32, 0).is_ok());
        assert!(platform.is_alive(std::process::id() as i32));
    }

    #[test]
    fn missing_process_is_an_error() {
        let platform = UnixPlatform;
        // Way above any plausible pid_max.
        let result = platform.send_signal(i32::MAX - 1, 15);
        assert!(result.is_err());
        assert!(!platform.is_alive(i32::MAX - 1));
    }

    #[test]
    fn spawn_nonexistent_command() {
        let platform = UnixPlatform;
        let result = platform.spawn(SpawnSpec::new("nonexistent_command_12345", vec![]));
        match result {
            Err(CoreError::Spawn(_)) => {}
            other => panic!("Expected Spawn error, got: {:?}", other.map(|_| ())),
        }
    }
}
