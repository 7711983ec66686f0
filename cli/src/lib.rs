//! Client library for the runmate CLI
//!
//! Wraps the IPC client with one method per daemon operation and
//! prints the daemon's answers the way the `runmate` binary shows
//! them.

pub mod error;

pub use error::{CliError, Result};

use ipc::IpcClient;
use schema::{ClientConfig, Request, Response, StartRequest, StartStdioRequest};

/// CLI client for communicating with a run-server daemon
pub struct Client {
    inner: IpcClient,
}

impl Client {
    pub fn new(target: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            inner: IpcClient::new(target, config),
        }
    }

    async fn send(&self, request: &Request) -> Result<Response> {
        match self.inner.send_with_retry(request).await? {
            Response::Error { message } => Err(CliError::Daemon(message)),
            response => Ok(response),
        }
    }

    /// Launch a detached command.
    pub async fn start(&self, request: StartRequest) -> Result<()> {
        self.report_started(self.send(&Request::Start(request)).await?)
    }

    /// Launch a command with its stdio bridged to a stdio server.
    pub async fn start_stdio(&self, request: StartStdioRequest) -> Result<()> {
        self.report_started(self.send(&Request::StartStdio(request)).await?)
    }

    fn report_started(&self, response: Response) -> Result<()> {
        match response {
            Response::Started { pid, status, .. } => {
                println!("{status}");
                if pid <= 0 {
                    return Err(CliError::Aborted(status));
                }
                Ok(())
            }
            other => Err(CliError::Daemon(format!("unexpected response: {other:?}"))),
        }
    }

    /// Send an arbitrary signal to an alias.
    pub async fn kill(&self, alias: &str, signum: i32) -> Result<()> {
        self.acked(&Request::Kill {
            alias: alias.to_string(),
            signum,
        })
        .await
    }

    /// Send SIGTERM to an alias.
    pub async fn sigterm(&self, alias: &str) -> Result<()> {
        self.acked(&Request::Sigterm {
            alias: alias.to_string(),
        })
        .await
    }

    /// Send SIGTERM to every registered process.
    pub async fn sigtermall(&self) -> Result<()> {
        self.acked(&Request::Sigtermall).await
    }

    /// List the daemon's registry.
    pub async fn ps(&self) -> Result<()> {
        match self.send(&Request::Ps).await? {
            Response::Procs { procs } => {
                for p in procs {
                    if p.env.is_empty() {
                        println!("(pid {}) (alias {}) (cmd {}) ({})", p.pid, p.alias, p.cmd, p.status);
                    } else {
                        println!(
                            "(pid {}) (alias {}) (cmd {}) (env {}) ({})",
                            p.pid, p.alias, p.cmd, p.env, p.status
                        );
                    }
                }
                Ok(())
            }
            other => Err(CliError::Daemon(format!("unexpected response: {other:?}"))),
        }
    }

    /// Report whether an alias names a live process.
    pub async fn isrunning(&self, alias: &str) -> Result<()> {
        self.acked(&Request::Isrunning {
            alias: alias.to_string(),
        })
        .await
    }

    /// Resolve an executable name on the daemon's PATH.
    pub async fn which(&self, name: &str) -> Result<()> {
        match self
            .send(&Request::Which {
                name: name.to_string(),
            })
            .await?
        {
            Response::Which { path } => {
                println!("{path}");
                Ok(())
            }
            other => Err(CliError::Daemon(format!("unexpected response: {other:?}"))),
        }
    }

    /// Print the daemon's system information snapshot.
    pub async fn sysinfo(&self) -> Result<()> {
        match self.send(&Request::Sysinfo).await? {
            Response::Sysinfo(info) => {
                println!("os: {} ({})", info.os, info.arch);
                println!("hostname: {}", info.hostname);
                println!("user: {}", info.user);
                println!("cpus: {} x {}", info.cpu_count, info.cpu_model);
                println!(
                    "memory: {} KiB total, {} KiB free",
                    info.memory_total_kib, info.memory_free_kib
                );
                println!(
                    "storage: {} bytes total, {} bytes free",
                    info.storage_total_bytes, info.storage_free_bytes
                );
                Ok(())
            }
            other => Err(CliError::Daemon(format!("unexpected response: {other:?}"))),
        }
    }

    /// Ask the daemon to terminate its children and shut down.
    pub async fn exit(&self) -> Result<()> {
        self.acked(&Request::Exit).await
    }

    async fn acked(&self, request: &Request) -> Result<()> {
        match self.send(request).await? {
            Response::Ack { message } => {
                println!("{message}");
                Ok(())
            }
            other => Err(CliError::Daemon(format!("unexpected response: {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use tokio::net::TcpListener;

    fn quick_config() -> ClientConfig {
        ClientConfig {
            retries: 2,
            retry_delay_ms: 10,
        }
    }

    /// One-shot daemon stand-in: answer the first frame with a canned
    /// response and hand the request back for inspection.
    async fn canned_server(response: Response) -> (String, tokio::task::JoinHandle<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let request: Request = ipc::read_frame(&mut reader).await.unwrap();
            ipc::write_frame(reader.get_mut(), &response).await.unwrap();
            request
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn start_succeeds_on_positive_pid() {
        let (addr, server) = canned_server(Response::Started {
            pid: 42,
            status: "STARTED: server=s alias=a cmd=sleep 1 pid=42".to_string(),
            session: None,
        })
        .await;

        let client = Client::new(addr, &quick_config());
        client
            .start(StartRequest {
                cmd: "sleep 1".to_string(),
                alias: "a".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        match server.await.unwrap() {
            Request::Start(r) => assert_eq!(r.alias, "a"),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_maps_nonpositive_pid_to_aborted() {
        let (addr, server) = canned_server(Response::Started {
            pid: -1,
            status: "ABORTED: server=s alias=a cmd=nope".to_string(),
            session: None,
        })
        .await;

        let client = Client::new(addr, &quick_config());
        let result = client
            .start(StartRequest {
                cmd: "nope".to_string(),
                alias: "a".to_string(),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(CliError::Aborted(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn daemon_error_surfaces_as_daemon_variant() {
        let (addr, server) = canned_server(Response::Error {
            message: "SYNTAX ERROR: missing command".to_string(),
        })
        .await;

        let client = Client::new(addr, &quick_config());
        let result = client.sigterm("a").await;
        match result {
            Err(CliError::Daemon(message)) => assert!(message.starts_with("SYNTAX ERROR:")),
            other => panic!("expected daemon error, got {other:?}"),
        }
        server.await.unwrap();
    }
}
