//! Launching supervised commands
//!
//! Three launch shapes share one spawn path:
//!
//! - plain: detached, stdio on `/dev/null`
//! - logged: stdout/stderr piped into a forwarder helper that ships
//!   lines to a logger sink
//! - stdio-bridged: stdin/stdout/stderr piped through a pair of
//!   helpers attached to a stdio session on a (possibly remote)
//!   terminal daemon
//!
//! A launch never fails the request: the outcome carries `pid <= 0`
//! and an `ABORTED:` status line instead. For the bridged shape the
//! pipeline is built output-helper first and rolled back as a unit
//! when a later member fails to spawn, so a partial session never
//! survives. Pipe endpoints are `OwnedFd`s consumed by the spawns
//! (or dropped on the failure paths), which keeps every endpoint
//! closed without explicit bookkeeping.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use schema::{StartRequest, StartStdioRequest};
use tracing::{error, info, warn};

use crate::cmdline;
use crate::process::{Platform, SpawnSpec, StdioTarget};
use crate::registry::{RunRecord, StdioLink};
use crate::{ENV_FORWARDING_LOG, ENV_SUPERVISED};

/// Pid reported for a launch that never produced a process.
pub const LAUNCH_FAILED: i32 = -1;

/// Outcome of one launch attempt.
#[derive(Debug)]
pub struct Launch {
    pub pid: i32,
    /// `STARTED: …` or `ABORTED: …` status line, also logged.
    pub status: String,
    /// Record for the registry; `None` when aborted.
    pub record: Option<RunRecord>,
}

/// Spawns commands and their helper processes.
pub struct Launcher {
    platform: Arc<dyn Platform>,
    server_id: String,
    /// The daemon's own binary, re-invoked for helper sub-modes.
    helper_exe: PathBuf,
}

impl Launcher {
    pub fn new(platform: Arc<dyn Platform>, server_id: impl Into<String>, helper_exe: PathBuf) -> Self {
        Self {
            platform,
            server_id: server_id.into(),
            helper_exe,
        }
    }

    /// Launch a detached command.
    pub fn spawn_plain(&self, req: &StartRequest) -> Launch {
        let argv = cmdline::split(&req.cmd);
        if argv.is_empty() {
            return self.aborted(&req.alias, &req.cmd, "the command line is empty");
        }
        let spec = self
            .command_spec(&argv, req.workdir.as_deref(), req.env.as_deref(), "0")
            .stdin(StdioTarget::Null)
            .stdout(StdioTarget::Null)
            .stderr(StdioTarget::Null);
        match self.platform.spawn(spec) {
            Ok(pid) => self.started(req, pid, None),
            Err(e) => self.aborted(&req.alias, &req.cmd, &e.to_string()),
        }
    }

    /// Launch a command with stdout/stderr forwarded to a logger sink.
    pub fn spawn_logged(&self, req: &StartRequest, sink: &str) -> Launch {
        let argv = cmdline::split(&req.cmd);
        if argv.is_empty() {
            return self.aborted(&req.alias, &req.cmd, "the command line is empty");
        }

        let (out_read, out_write) = match self.platform.create_pipe() {
            Ok(pipe) => pipe,
            Err(e) => return self.aborted(&req.alias, &req.cmd, &e.to_string()),
        };

        // Forwarder first, so the pipe has a reader before the
        // command produces output.
        let tag = format!("{}/{}", self.server_id, req.alias);
        let forwarder = SpawnSpec::new(
            self.helper_exe.to_string_lossy().into_owned(),
            vec![
                "write".to_string(),
                "--target".to_string(),
                sink.to_string(),
                "--source".to_string(),
                tag,
            ],
        )
        .stdin(StdioTarget::Fd(out_read));
        let forwarder_pid = match self.platform.spawn(forwarder) {
            Ok(pid) => pid,
            Err(e) => return self.aborted(&req.alias, &req.cmd, &e.to_string()),
        };

        let stderr_fd = match out_write.try_clone() {
            Ok(fd) => fd,
            Err(e) => {
                self.rollback(&[forwarder_pid]);
                return self.aborted(&req.alias, &req.cmd, &e.to_string());
            }
        };
        let spec = self
            .command_spec(&argv, req.workdir.as_deref(), req.env.as_deref(), "1")
            .stdin(StdioTarget::Null)
            .stdout(StdioTarget::Fd(out_write))
            .stderr(StdioTarget::Fd(stderr_fd));
        match self.platform.spawn(spec) {
            Ok(pid) => {
                let link = StdioLink::new(String::new(), None, None, Some(forwarder_pid));
                self.started(req, pid, Some(link))
            }
            Err(e) => {
                self.rollback(&[forwarder_pid]);
                self.aborted(&req.alias, &req.cmd, &e.to_string())
            }
        }
    }

    /// Launch a command bridged to a stdio session.
    ///
    /// Pipeline order: output helper, input helper, command. Any
    /// failure SIGTERMs the members already spawned and reports an
    /// aborted launch; the pipe endpoints drop closed on the way out.
    pub fn spawn_with_stdio(&self, req: &StartStdioRequest, session: &str) -> Launch {
        let argv = cmdline::split(&req.cmd);
        if argv.is_empty() {
            return self.aborted(&req.alias, &req.cmd, "the command line is empty");
        }

        let pipes = self
            .platform
            .create_pipe()
            .and_then(|out| self.platform.create_pipe().map(|inp| (out, inp)));
        let ((out_read, out_write), (in_read, in_write)) = match pipes {
            Ok(pipes) => pipes,
            Err(e) => return self.aborted(&req.alias, &req.cmd, &e.to_string()),
        };

        let output = self
            .attach_helper_spec("write", &req.stdio, session)
            .stdin(StdioTarget::Fd(out_read));
        let output_pid = match self.platform.spawn(output) {
            Ok(pid) => pid,
            Err(e) => return self.aborted(&req.alias, &req.cmd, &e.to_string()),
        };

        let input = self
            .attach_helper_spec("read", &req.stdio, session)
            .stdout(StdioTarget::Fd(in_write));
        let input_pid = match self.platform.spawn(input) {
            Ok(pid) => pid,
            Err(e) => {
                self.rollback(&[output_pid]);
                return self.aborted(&req.alias, &req.cmd, &e.to_string());
            }
        };

        let stderr_fd = match out_write.try_clone() {
            Ok(fd) => fd,
            Err(e) => {
                self.rollback(&[output_pid, input_pid]);
                return self.aborted(&req.alias, &req.cmd, &e.to_string());
            }
        };
        let spec = self
            .command_spec(&argv, req.workdir.as_deref(), req.env.as_deref(), "1")
            .stdin(StdioTarget::Fd(in_read))
            .stdout(StdioTarget::Fd(out_write))
            .stderr(StdioTarget::Fd(stderr_fd));
        match self.platform.spawn(spec) {
            Ok(pid) => {
                let link = StdioLink::new(
                    session.to_string(),
                    Some(req.stdio.clone()),
                    Some(input_pid),
                    Some(output_pid),
                );
                let record = RunRecord::new(&req.alias, pid, &req.cmd)
                    .env(req.env.clone().unwrap_or_default())
                    .link(link);
                let status = self.started_line(&req.alias, &req.cmd, pid);
                Launch {
                    pid,
                    status,
                    record: Some(record),
                }
            }
            Err(e) => {
                self.rollback(&[output_pid, input_pid]);
                self.aborted(&req.alias, &req.cmd, &e.to_string())
            }
        }
    }

    fn attach_helper_spec(&self, mode: &str, stdio_addr: &str, session: &str) -> SpawnSpec {
        SpawnSpec::new(
            self.helper_exe.to_string_lossy().into_owned(),
            vec![
                mode.to_string(),
                "--attach".to_string(),
                stdio_addr.to_string(),
                "--session".to_string(),
                session.to_string(),
            ],
        )
    }

    /// Build the command's spawn spec: resolution, workdir, and the
    /// environment markers every supervised child carries.
    fn command_spec(
        &self,
        argv: &[String],
        workdir: Option<&str>,
        env_overlay: Option<&str>,
        forwarding: &str,
    ) -> SpawnSpec {
        let workdir = workdir.filter(|dir| {
            let exists = Path::new(dir).is_dir();
            if !exists {
                warn!("working directory {} does not exist, ignoring", dir);
            }
            exists
        });
        let program = resolve_program(&argv[0], workdir);

        let mut env = vec![
            (ENV_SUPERVISED.to_string(), "1".to_string()),
            (ENV_FORWARDING_LOG.to_string(), forwarding.to_string()),
        ];
        if let Some(overlay) = env_overlay {
            env.extend(cmdline::parse_env_overlay(overlay));
        }

        SpawnSpec::new(program, argv[1..].to_vec())
            .workdir(workdir.map(PathBuf::from))
            .envs(env)
    }

    fn rollback(&self, pids: &[i32]) {
        for pid in pids {
            if let Err(e) = self.platform.send_signal(*pid, libc::SIGTERM) {
                warn!(pid, error = %e, "failed to roll back helper");
            }
        }
    }

    fn started(&self, req: &StartRequest, pid: i32, link: Option<StdioLink>) -> Launch {
        let mut record = RunRecord::new(&req.alias, pid, &req.cmd)
            .env(req.env.clone().unwrap_or_default());
        if let Some(link) = link {
            record = record.link(link);
        }
        let status = self.started_line(&req.alias, &req.cmd, pid);
        Launch {
            pid,
            status,
            record: Some(record),
        }
    }

    fn started_line(&self, alias: &str, cmd: &str, pid: i32) -> String {
        let line = format!(
            "STARTED: server={} alias={} cmd={} pid={}",
            self.server_id, alias, cmd, pid
        );
        info!("{}", line);
        line
    }

    fn aborted(&self, alias: &str, cmd: &str, reason: &str) -> Launch {
        let status = format!(
            "ABORTED: server={} alias={} cmd={}\nCan't execute command because {}",
            self.server_id, alias, cmd, reason
        );
        error!("{}", status);
        Launch {
            pid: LAUNCH_FAILED,
            status,
            record: None,
        }
    }
}

/// Resolution order: workdir-prefixed when such a file exists, else
/// the name as given (PATH lookup happens at exec time).
fn resolve_program(head: &str, workdir: Option<&str>) -> String {
    if let Some(dir) = workdir {
        let candidate = Path::new(dir).join(head);
        if candidate.is_file() {
            return candidate.to_string_lossy().into_owned();
        }
    }
    head.to_string()
}
