//! Daemon library for the runmate run-server
//!
//! The daemon accepts newline-delimited JSON request frames over TCP.
//! Ordinary requests are queued to a single dispatcher task and
//! answered in order; a `stdioAttach` frame instead upgrades its
//! connection into a raw byte stream bound to a stdio session.

pub mod dispatcher;
pub mod error;
pub mod helpers;
pub mod hub;

pub use error::{DaemonError, Result};

use std::net::SocketAddr;
use std::sync::Arc;

use runmate_core::launcher::Launcher;
use runmate_core::process::unix::UnixPlatform;
use runmate_core::process::Platform;
use runmate_core::reaper::{Reaper, StdioPeer};
use runmate_core::registry::ProcessRegistry;
use schema::{ClientConfig, DaemonConfig, Request, Response, StdioRole};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use dispatcher::{DispatchMsg, Dispatcher};
use hub::StdioHub;

/// Maximum allowed frame size for daemon TCP requests (64KB)
const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Notifies a peer daemon through the regular request channel when a
/// bridged command's terminal must go away.
pub struct IpcStdioPeer {
    config: ClientConfig,
}

#[async_trait::async_trait]
impl StdioPeer for IpcStdioPeer {
    async fn killstdio(&self, addr: &str, alias: &str) {
        let client = ipc::IpcClient::new(addr, &self.config);
        match client
            .send_with_retry(&Request::Killstdio {
                alias: alias.to_string(),
            })
            .await
        {
            Ok(_) => debug!(addr, alias, "peer acknowledged killstdio"),
            Err(e) => warn!(addr, alias, error = %e, "killstdio notification failed"),
        }
    }
}

/// The main daemon server
pub struct Daemon {
    listener: TcpListener,
    local_addr: SocketAddr,
    hub: Arc<StdioHub>,
    dispatch_tx: mpsc::Sender<DispatchMsg>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Daemon {
    /// Bind the listener and start the dispatcher and reaper tasks.
    ///
    /// # Errors
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn bind(mut config: DaemonConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen).await.map_err(|e| {
            DaemonError::Server(format!("Failed to bind to {}: {e}", config.listen))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Server(e.to_string()))?;
        // Helpers and peers must see the resolved address, not :0.
        config.listen = local_addr.to_string();
        if config.server_id.is_none() {
            config.server_id = Some(config.listen.clone());
        }

        let platform: Arc<dyn Platform> = Arc::new(UnixPlatform);
        let procs = Arc::new(ProcessRegistry::new(platform.clone()));
        let stdio_procs = Arc::new(ProcessRegistry::new(platform.clone()));
        let hub = Arc::new(StdioHub::new());
        let helper_exe = std::env::current_exe().map_err(DaemonError::Io)?;
        let launcher = Launcher::new(
            platform.clone(),
            config.server_id().to_string(),
            helper_exe.clone(),
        );

        let peer_config = ClientConfig {
            retries: config.send_retries,
            retry_delay_ms: config.send_retry_delay_ms,
        };
        let reaper = Reaper::new(
            platform.clone(),
            procs.clone(),
            stdio_procs.clone(),
            config.listen.clone(),
            Arc::new(IpcStdioPeer {
                config: peer_config,
            }),
        );
        tokio::spawn(async move {
            if let Err(e) = reaper.run().await {
                error!("reaper stopped: {}", e);
            }
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(64);
        let dispatcher = Dispatcher::new(
            config,
            platform,
            launcher,
            procs,
            stdio_procs,
            hub.clone(),
            helper_exe,
            shutdown_tx,
        );
        tokio::spawn(dispatcher.run(dispatch_rx));

        info!("Daemon listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            hub,
            dispatch_tx,
            shutdown_rx,
        })
    }

    /// The address actually bound, with any `:0` port resolved.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until an `exit` request shuts the daemon
    /// down.
    pub async fn serve(mut self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        let dispatch_tx = self.dispatch_tx.clone();
                        let hub = self.hub.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatch_tx, hub).await {
                                warn!("Error handling connection: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        info!("Daemon shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    dispatch_tx: mpsc::Sender<DispatchMsg>,
    hub: Arc<StdioHub>,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut frame = Vec::with_capacity(1024);

    loop {
        frame.clear();
        let n = reader.read_until(b'\n', &mut frame).await?;
        if n == 0 {
            break;
        }

        if frame.len() > MAX_FRAME_SIZE {
            return Err(DaemonError::Connection(format!(
                "Request size {} exceeds maximum allowed size of {} bytes",
                frame.len(),
                MAX_FRAME_SIZE
            )));
        }

        if matches!(frame.last(), Some(b'\n')) {
            frame.pop();
            if matches!(frame.last(), Some(b'\r')) {
                frame.pop();
            }
        }
        if frame.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(e) => {
                let response = Response::Error {
                    message: format!("SYNTAX ERROR: malformed request: {e}"),
                };
                write_response(reader.get_mut(), &response).await?;
                continue;
            }
        };

        if let Request::StdioAttach { session, role } = request {
            return attach(reader, &session, role, &hub).await;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if dispatch_tx.send((request, reply_tx)).await.is_err() {
            let response = Response::Error {
                message: "daemon is shutting down".to_string(),
            };
            write_response(reader.get_mut(), &response).await?;
            break;
        }
        let response = reply_rx.await.unwrap_or(Response::Error {
            message: "daemon is shutting down".to_string(),
        });
        write_response(reader.get_mut(), &response).await?;
    }

    Ok(())
}

async fn write_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    ipc::write_frame(stream, response)
        .await
        .map_err(DaemonError::Ipc)
}

async fn ack(stream: &mut TcpStream, message: &str) -> Result<()> {
    write_response(
        stream,
        &Response::Ack {
            message: message.to_string(),
        },
    )
    .await
}

/// Turn an upgraded connection into its session role. Runs for the
/// rest of the connection's life.
async fn attach(
    mut reader: BufReader<TcpStream>,
    session: &str,
    role: StdioRole,
    hub: &StdioHub,
) -> Result<()> {
    debug!(session, ?role, "connection attached");
    let channels = hub.channels(session);
    match role {
        StdioRole::Output => {
            ack(reader.get_mut(), "attached: output").await?;
            let mut buf = [0_u8; 4096];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                // No terminal attached yet is fine; bytes before the
                // first subscriber are dropped.
                let _ = channels.output_tx.send(buf[..n].to_vec());
            }
            // The command side is gone: end the session for everyone.
            hub.remove(session);
            Ok(())
        }
        StdioRole::Input => {
            let Some(mut input_rx) = hub.take_input_rx(session) else {
                let response = Response::Error {
                    message: format!("session {session} already has an input drain"),
                };
                write_response(reader.get_mut(), &response).await?;
                return Ok(());
            };
            drop(channels);
            ack(reader.get_mut(), "attached: input").await?;
            let stream = reader.get_mut();
            while let Some(bytes) = input_rx.recv().await {
                if stream.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
        StdioRole::Terminal => {
            // Subscribe before acking: output written right after the
            // ack must reach this terminal.
            let mut output_rx = channels.output_tx.subscribe();
            let input_tx = channels.input_tx.clone();
            // Keeping `channels` alive would hold the broadcast
            // sender open past the session's removal.
            drop(channels);
            ack(reader.get_mut(), "attached: terminal").await?;

            // The terminal client sends nothing before the ack, so no
            // payload can be stuck in the read buffer here.
            let stream = reader.into_inner();
            let (mut read_half, mut write_half) = stream.into_split();
            let mut buf = [0_u8; 4096];
            loop {
                tokio::select! {
                    result = output_rx.recv() => match result {
                        Ok(bytes) => {
                            if write_half.write_all(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(session, skipped, "terminal lagged, dropping output");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    result = read_half.read(&mut buf) => {
                        let n = result?;
                        if n == 0 {
                            break;
                        }
                        if input_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(())
        }
    }
}
