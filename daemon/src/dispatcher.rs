//! Serialized request dispatch
//!
//! Every connection forwards its requests over one mpsc channel to a
//! single dispatcher task and awaits the oneshot reply. Requests are
//! therefore handled strictly one at a time; only the children they
//! launch run concurrently. Validation failures produce
//! `SYNTAX ERROR` responses before any side effect.

use std::path::PathBuf;
use std::sync::Arc;

use runmate_core::launcher::Launcher;
use runmate_core::process::{Platform, SpawnSpec};
use runmate_core::registry::{ProcessRegistry, RunRecord};
use runmate_core::stdio::SessionIds;
use runmate_core::{sysinfo, which};
use schema::{
    ClientConfig, DaemonConfig, Request, Response, StartRequest, StartStdioRequest,
    UserStdioRequest,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::hub::StdioHub;
use ipc::IpcClient;

/// One queued request and where its answer goes.
pub type DispatchMsg = (Request, oneshot::Sender<Response>);

/// The single task that owns request handling.
pub struct Dispatcher {
    config: DaemonConfig,
    platform: Arc<dyn Platform>,
    launcher: Launcher,
    procs: Arc<ProcessRegistry>,
    stdio_procs: Arc<ProcessRegistry>,
    sessions: SessionIds,
    hub: Arc<StdioHub>,
    helper_exe: PathBuf,
    shutdown: watch::Sender<bool>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DaemonConfig,
        platform: Arc<dyn Platform>,
        launcher: Launcher,
        procs: Arc<ProcessRegistry>,
        stdio_procs: Arc<ProcessRegistry>,
        hub: Arc<StdioHub>,
        helper_exe: PathBuf,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        let sessions = SessionIds::new(config.server_id());
        Self {
            config,
            platform,
            launcher,
            procs,
            stdio_procs,
            sessions,
            hub,
            helper_exe,
            shutdown,
        }
    }

    /// Handle queued requests until the channel closes or `exit` is
    /// processed.
    pub async fn run(self, mut rx: mpsc::Receiver<DispatchMsg>) {
        while let Some((request, reply)) = rx.recv().await {
            let is_exit = matches!(request, Request::Exit);
            let response = self.handle(request).await;
            let _ = reply.send(response);
            if is_exit {
                break;
            }
        }
        info!("dispatcher stopped");
    }

    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Start(req) => self.handle_start(req),
            Request::StartStdio(req) => self.handle_start_stdio(req).await,
            Request::UserStdio(req) => self.handle_user_stdio(req),
            Request::Kill { alias, signum } => {
                if alias.is_empty() {
                    return syntax_error("missing alias");
                }
                if signum <= 0 {
                    return syntax_error("missing signal number");
                }
                ack_outcome("kill", self.procs.signal_by_alias(&alias, signum))
            }
            Request::Sigterm { alias } => {
                if alias.is_empty() {
                    return syntax_error("missing alias");
                }
                ack_outcome("sigterm", self.procs.signal_by_alias(&alias, libc::SIGTERM))
            }
            Request::Sigtermall => {
                let delivered = self.procs.signal_all(libc::SIGTERM);
                info!(delivered, "sigtermall");
                Response::Ack {
                    message: "sigtermall OK".to_string(),
                }
            }
            Request::Ps => Response::Procs {
                procs: self.procs.report(),
            },
            Request::Isrunning { alias } => {
                if alias.is_empty() {
                    return syntax_error("missing alias");
                }
                Response::Ack {
                    message: if self.procs.is_running(&alias) {
                        "running".to_string()
                    } else {
                        "not running".to_string()
                    },
                }
            }
            Request::Killstdio { alias } => {
                if alias.is_empty() {
                    return syntax_error("missing alias");
                }
                self.stdio_procs.signal_by_alias(&alias, libc::SIGTERM);
                Response::Ack {
                    message: "killstdio OK".to_string(),
                }
            }
            Request::Which { name } => {
                if name.is_empty() {
                    return syntax_error("missing name");
                }
                let path = which::resolve(&name)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or(name);
                Response::Which { path }
            }
            Request::Sysinfo => Response::Sysinfo(sysinfo::collect()),
            Request::Exit => {
                info!("exit requested, terminating children");
                self.procs.signal_all(libc::SIGTERM);
                self.stdio_procs.signal_all(libc::SIGTERM);
                let _ = self.shutdown.send(true);
                Response::Ack {
                    message: "exit OK".to_string(),
                }
            }
            Request::StdioAttach { .. } => Response::Error {
                message: "stdioAttach must be the first frame on its connection".to_string(),
            },
        }
    }

    fn handle_start(&self, req: StartRequest) -> Response {
        if req.cmd.trim().is_empty() {
            return syntax_error("missing command");
        }
        if req.alias.is_empty() {
            return syntax_error("missing alias");
        }

        let launch = if req.log.is_some() || self.config.log_all {
            let sink = req
                .log
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(&self.config.logger);
            self.launcher.spawn_logged(&req, sink)
        } else {
            self.launcher.spawn_plain(&req)
        };
        if let Some(record) = launch.record {
            self.procs.add(record);
        }
        Response::Started {
            pid: launch.pid,
            status: launch.status,
            session: None,
        }
    }

    async fn handle_start_stdio(&self, req: StartStdioRequest) -> Response {
        if req.cmd.trim().is_empty() {
            return syntax_error("missing command");
        }
        if req.alias.is_empty() {
            return syntax_error("missing alias");
        }
        if req.stdio.is_empty() {
            return syntax_error("missing stdio server");
        }

        let session = self.sessions.next(&req.alias);
        let launch = self.launcher.spawn_with_stdio(&req, &session);
        let Some(record) = launch.record else {
            return Response::Started {
                pid: launch.pid,
                status: launch.status,
                session: None,
            };
        };
        self.procs.add(record);

        // The user terminal opens on the stdio server, which may be
        // this very daemon.
        let user = UserStdioRequest {
            alias: req.alias.clone(),
            session: session.clone(),
            hold: req.hold,
            geometry: req.geometry.clone(),
        };
        let mut status = launch.status;
        let remote = if self.is_local(&req.stdio) {
            self.handle_user_stdio(user)
        } else {
            let client = IpcClient::new(&req.stdio, &self.peer_config());
            match client.send_with_retry(&Request::UserStdio(user)).await {
                Ok(response) => response,
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        };
        match remote {
            Response::Started { status: s, .. } => {
                status.push('\n');
                status.push_str(&s);
            }
            Response::Error { message } => {
                warn!(%message, "user terminal request failed");
                status.push('\n');
                status.push_str(&message);
            }
            _ => {}
        }

        Response::Started {
            pid: launch.pid,
            status,
            session: Some(session),
        }
    }

    /// Open the user-facing terminal for a session on this daemon.
    fn handle_user_stdio(&self, req: UserStdioRequest) -> Response {
        if req.alias.is_empty() {
            return syntax_error("missing alias");
        }
        if req.session.is_empty() {
            return syntax_error("missing session");
        }

        // Materialize the hub entry so helpers can attach regardless
        // of ordering.
        self.hub.channels(&req.session);

        let mut args = vec![if req.hold { "-hold" } else { "+hold" }.to_string()];
        if let Some(geometry) = &req.geometry {
            args.push("-geometry".to_string());
            args.push(geometry.clone());
        }
        args.push("-T".to_string());
        args.push(req.alias.clone());
        args.push("-e".to_string());
        args.push(self.helper_exe.to_string_lossy().into_owned());
        args.push("readwrite".to_string());
        args.push("--attach".to_string());
        args.push(self.config.listen.clone());
        args.push("--session".to_string());
        args.push(req.session.clone());

        match self.platform.spawn(SpawnSpec::new("xterm", args)) {
            Ok(pid) => {
                self.stdio_procs
                    .add(RunRecord::new(&req.alias, pid, "xterm").hold(req.hold));
                Response::Started {
                    pid,
                    status: format!(
                        "STARTED: server={} alias={} cmd=xterm pid={}",
                        self.config.server_id(),
                        req.alias,
                        pid
                    ),
                    session: Some(req.session),
                }
            }
            Err(e) => Response::Started {
                pid: runmate_core::launcher::LAUNCH_FAILED,
                status: format!(
                    "ABORTED: server={} alias={} cmd=xterm\nCan't execute command because {}",
                    self.config.server_id(),
                    req.alias,
                    e
                ),
                session: None,
            },
        }
    }

    fn is_local(&self, stdio_addr: &str) -> bool {
        stdio_addr == self.config.listen || stdio_addr == self.config.server_id()
    }

    fn peer_config(&self) -> ClientConfig {
        ClientConfig {
            retries: self.config.send_retries,
            retry_delay_ms: self.config.send_retry_delay_ms,
        }
    }
}

fn syntax_error(what: &str) -> Response {
    Response::Error {
        message: format!("SYNTAX ERROR: {what}"),
    }
}

fn ack_outcome(op: &str, ok: bool) -> Response {
    Response::Ack {
        message: if ok {
            format!("{op} OK")
        } else {
            format!("{op} FAILED")
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runmate_core::process::mock::MockPlatform;

    fn dispatcher(mock: Arc<MockPlatform>) -> (Dispatcher, Arc<ProcessRegistry>) {
        let config = DaemonConfig {
            listen: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let procs = Arc::new(ProcessRegistry::new(mock.clone()));
        let stdio_procs = Arc::new(ProcessRegistry::new(mock.clone()));
        let launcher = Launcher::new(
            mock.clone(),
            config.server_id(),
            PathBuf::from("/usr/bin/runmated"),
        );
        let (shutdown, _) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            config,
            mock,
            launcher,
            procs.clone(),
            stdio_procs,
            Arc::new(StdioHub::new()),
            PathBuf::from("/usr/bin/runmated"),
            shutdown,
        );
        (dispatcher, procs)
    }

    #[tokio::test]
    async fn start_registers_and_reports() {
        let mock = Arc::new(MockPlatform::new());
        let (dispatcher, procs) = dispatcher(mock);

        let response = dispatcher
            .handle(Request::Start(StartRequest {
                cmd: "sleep 5".to_string(),
                alias: "s1".to_string(),
                ..Default::default()
            }))
            .await;
        match response {
            Response::Started { pid, status, .. } => {
                assert!(pid > 0);
                assert!(status.starts_with("STARTED:"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(procs.len(), 1);

        match dispatcher.handle(Request::Ps).await {
            Response::Procs { procs } => {
                assert_eq!(procs.len(), 1);
                assert_eq!(procs[0].alias, "s1");
                assert_eq!(procs[0].status, "running");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn validation_rejects_without_side_effects() {
        let mock = Arc::new(MockPlatform::new());
        let (dispatcher, procs) = dispatcher(mock.clone());

        for request in [
            Request::Start(StartRequest {
                cmd: String::new(),
                alias: "a".to_string(),
                ..Default::default()
            }),
            Request::Start(StartRequest {
                cmd: "sleep 1".to_string(),
                alias: String::new(),
                ..Default::default()
            }),
            Request::Kill {
                alias: String::new(),
                signum: 15,
            },
            Request::Kill {
                alias: "a".to_string(),
                signum: 0,
            },
            Request::Isrunning {
                alias: String::new(),
            },
            Request::Which {
                name: String::new(),
            },
        ] {
            match dispatcher.handle(request).await {
                Response::Error { message } => {
                    assert!(message.starts_with("SYNTAX ERROR:"), "got: {message}")
                }
                other => panic!("unexpected response: {other:?}"),
            }
        }
        assert!(procs.is_empty());
        assert!(mock.spawns().is_empty());
    }

    #[tokio::test]
    async fn kill_missing_alias_fails_cleanly() {
        let mock = Arc::new(MockPlatform::new());
        let (dispatcher, procs) = dispatcher(mock);

        match dispatcher
            .handle(Request::Kill {
                alias: "ghost".to_string(),
                signum: 15,
            })
            .await
        {
            Response::Ack { message } => assert_eq!(message, "kill FAILED"),
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(procs.is_empty());
    }

    #[tokio::test]
    async fn which_falls_back_to_the_name() {
        let mock = Arc::new(MockPlatform::new());
        let (dispatcher, _) = dispatcher(mock);

        match dispatcher
            .handle(Request::Which {
                name: "no-such-tool-xyz".to_string(),
            })
            .await
        {
            Response::Which { path } => assert_eq!(path, "no-such-tool-xyz"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exit_terminates_children_and_signals_shutdown() {
        let mock = Arc::new(MockPlatform::new());
        let (dispatcher, procs) = dispatcher(mock.clone());
        let mut shutdown_rx = dispatcher.shutdown.subscribe();

        dispatcher
            .handle(Request::Start(StartRequest {
                cmd: "sleep 5".to_string(),
                alias: "s1".to_string(),
                ..Default::default()
            }))
            .await;
        assert_eq!(procs.len(), 1);

        match dispatcher.handle(Request::Exit).await {
            Response::Ack { message } => assert_eq!(message, "exit OK"),
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(*shutdown_rx.borrow_and_update());
        let signals = mock.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].1, libc::SIGTERM);
    }

    #[tokio::test]
    async fn start_stdio_mints_session_and_opens_local_terminal() {
        let mock = Arc::new(MockPlatform::new());
        let (dispatcher, procs) = dispatcher(mock.clone());

        let response = dispatcher
            .handle(Request::StartStdio(StartStdioRequest {
                cmd: "cat".to_string(),
                alias: "shell".to_string(),
                stdio: dispatcher.config.listen.clone(),
                hold: true,
                ..Default::default()
            }))
            .await;
        match response {
            Response::Started {
                pid,
                status,
                session,
            } => {
                assert!(pid > 0);
                let session = session.expect("session id");
                assert!(session.contains("/shell-"));
                assert!(status.contains("cmd=xterm"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(procs.len(), 1);
        assert_eq!(dispatcher.stdio_procs.len(), 1);
        assert_eq!(dispatcher.hub.len(), 1);

        // write helper, read helper, command, xterm
        let spawns = mock.spawns();
        assert_eq!(spawns.len(), 4);
        assert_eq!(spawns[3].program, "xterm");
        assert_eq!(spawns[3].args[0], "-hold");
    }
}
