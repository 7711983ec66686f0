//! runmate — command-line client for the run-server daemon
//!
//! Every subcommand maps onto one request frame sent to the daemon
//! named by `--on`.

use clap::{Parser, Subcommand};
use cli::Client;
use schema::{ClientConfig, StartRequest, StartStdioRequest};
use tracing::error;

#[derive(Parser)]
#[command(name = "runmate", about = "Client for the runmate run-server", version)]
struct Cli {
    /// Target daemon address
    #[arg(long, global = true, default_value = "127.0.0.1:9340")]
    on: String,

    /// Connect attempts before giving up
    #[arg(long, global = true, default_value_t = 3)]
    retries: u32,

    /// Delay between connect attempts, in milliseconds
    #[arg(long, global = true, default_value_t = 250)]
    retry_delay_ms: u64,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch a command on the daemon
    Start {
        /// Alias to register the process under
        #[arg(long = "as")]
        alias: String,
        /// Full command line, quote-aware
        #[arg(long)]
        cmd: String,
        /// Working directory for the child
        #[arg(long)]
        workdir: Option<String>,
        /// Extra environment, KEY=VALUE pairs separated by ';'
        #[arg(long)]
        env: Option<String>,
        /// Capture output through a logger sink; with no value the
        /// daemon's default sink is used
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        log: Option<String>,
        /// Bridge the command's stdio to a terminal on this daemon
        #[arg(long)]
        stdio: Option<String>,
        /// Keep the terminal window open after the command exits
        #[arg(long, requires = "stdio")]
        hold: bool,
        /// X geometry string for the terminal window
        #[arg(long, requires = "stdio")]
        geometry: Option<String>,
    },
    /// Send a signal to an alias
    Kill { alias: String, signum: i32 },
    /// Send SIGTERM to an alias
    Sigterm { alias: String },
    /// Send SIGTERM to every registered process
    Sigtermall,
    /// List the daemon's registry
    Ps,
    /// Check whether an alias names a live process
    Isrunning { alias: String },
    /// Resolve an executable name on the daemon's PATH
    Which { name: String },
    /// Print the daemon's system information
    Sysinfo,
    /// Terminate every child and shut the daemon down
    Exit,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = runmate_core::utils::init_tracing(&cli.log_level) {
        eprintln!("failed to initialize logging: {e}");
    }

    let config = ClientConfig {
        retries: cli.retries,
        retry_delay_ms: cli.retry_delay_ms,
    };
    let client = Client::new(cli.on.clone(), &config);

    let result = match cli.command {
        Command::Start {
            alias,
            cmd,
            workdir,
            env,
            log,
            stdio,
            hold,
            geometry,
        } => match stdio {
            Some(stdio) => {
                client
                    .start_stdio(StartStdioRequest {
                        cmd,
                        alias,
                        stdio,
                        workdir,
                        env,
                        log,
                        hold,
                        geometry,
                    })
                    .await
            }
            None => {
                client
                    .start(StartRequest {
                        cmd,
                        alias,
                        workdir,
                        env,
                        log,
                    })
                    .await
            }
        },
        Command::Kill { alias, signum } => client.kill(&alias, signum).await,
        Command::Sigterm { alias } => client.sigterm(&alias).await,
        Command::Sigtermall => client.sigtermall().await,
        Command::Ps => client.ps().await,
        Command::Isrunning { alias } => client.isrunning(&alias).await,
        Command::Which { name } => client.which(&name).await,
        Command::Sysinfo => client.sysinfo().await,
        Command::Exit => client.exit().await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        eprintln!("{e}");
        std::process::exit(2);
    }
}
