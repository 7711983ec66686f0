//! runmated — the runmate run-server daemon binary
//!
//! `serve` runs the daemon; `write`, `read`, and `readwrite` are the
//! internal helper sub-modes the launcher spawns for stdio plumbing.

use clap::{Parser, Subcommand};
use daemon::{helpers, Daemon, DaemonError};
use schema::{ClientConfig, DaemonConfig};
use tracing::error;

#[derive(Parser)]
#[command(name = "runmated", about = "runmate run-server daemon", version)]
struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:9340")]
        listen: String,
        /// Identity stamped into session ids and status lines
        #[arg(long)]
        server_id: Option<String>,
        /// Default logger sink for logged launches
        #[arg(long)]
        logger: Option<String>,
        /// Capture stdout/stderr of every start through the logger
        #[arg(long)]
        log_all: bool,
    },
    /// Internal: forward stdin into a session or logger sink
    #[command(hide = true)]
    Write {
        /// Logger sink address (line-forwarding mode)
        #[arg(long)]
        target: Option<String>,
        /// Stdio server address (session mode)
        #[arg(long)]
        attach: Option<String>,
        #[arg(long)]
        session: Option<String>,
        /// Tag prepended to each forwarded log line
        #[arg(long)]
        source: Option<String>,
    },
    /// Internal: drain session input to stdout
    #[command(hide = true)]
    Read {
        #[arg(long)]
        attach: String,
        #[arg(long)]
        session: String,
    },
    /// Internal: bidirectional terminal bridge
    #[command(hide = true)]
    Readwrite {
        #[arg(long)]
        attach: String,
        #[arg(long)]
        session: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = runmate_core::utils::init_tracing(&cli.log_level) {
        eprintln!("failed to initialize logging: {e}");
    }

    let config = ClientConfig::default();
    let result = match cli.command {
        Command::Serve {
            listen,
            server_id,
            logger,
            log_all,
        } => {
            let mut daemon_config = DaemonConfig {
                listen,
                server_id,
                log_all,
                ..Default::default()
            };
            if let Some(logger) = logger {
                daemon_config.logger = logger;
            }
            serve(daemon_config).await
        }
        Command::Write {
            target,
            attach,
            session,
            source,
        } => match (attach, session) {
            (Some(addr), Some(session)) => {
                helpers::forward_output_session(&addr, &session, &config).await
            }
            _ => match target {
                Some(target) => {
                    helpers::forward_output_log(&target, source.as_deref().unwrap_or(""), &config)
                        .await
                }
                None => Err(DaemonError::Server(
                    "write requires either --attach/--session or --target".to_string(),
                )),
            },
        },
        Command::Read { attach, session } => helpers::drain_input(&attach, &session, &config).await,
        Command::Readwrite { attach, session } => {
            helpers::terminal_bridge(&attach, &session, &config).await
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{e}");
        std::process::exit(2);
    }
}

async fn serve(config: DaemonConfig) -> daemon::Result<()> {
    let daemon = Daemon::bind(config).await?;
    daemon.serve().await
}
