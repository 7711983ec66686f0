//! Helper sub-modes of the daemon binary
//!
//! The launcher re-invokes `runmated` as the stdio plumbing of each
//! launched command:
//!
//! - `write` with a session attaches to the stdio server and ships
//!   the command's output (the helper's stdin) into the session; with
//!   a plain target it forwards stdin line-by-line to a logger sink,
//!   each line tagged with its source.
//! - `read` attaches as the input drain and copies terminal
//!   keystrokes to stdout (the command's stdin).
//! - `readwrite` is the terminal side, run inside `xterm`: keystrokes
//!   up, session output down.
//!
//! Connection failures surface as `ABORTED` output and a non-zero
//! exit; a bounded number of connect retries covers daemon startup
//! races.

use schema::{ClientConfig, StdioRole};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::{DaemonError, Result};

/// `write --attach … --session …`: command output into the session.
pub async fn forward_output_session(
    target: &str,
    session: &str,
    config: &ClientConfig,
) -> Result<()> {
    let mut stream = ipc::connect_attach(target, session, StdioRole::Output, config).await?;
    let mut input = tokio::io::stdin();
    let copied = tokio::io::copy(&mut input, &mut stream).await?;
    debug!(copied, session, "output forwarder finished");
    Ok(())
}

/// `write --target … --source …`: stdin lines to a logger sink.
pub async fn forward_output_log(target: &str, source: &str, config: &ClientConfig) -> Result<()> {
    let mut stream = ipc::connect_with_retry(target, config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let framed = format!("[{source}] {line}\n");
        stream.write_all(framed.as_bytes()).await?;
    }
    debug!(source, "log forwarder finished");
    Ok(())
}

/// `read --attach … --session …`: session input onto stdout.
pub async fn drain_input(target: &str, session: &str, config: &ClientConfig) -> Result<()> {
    let mut stream = ipc::connect_attach(target, session, StdioRole::Input, config).await?;
    let mut output = tokio::io::stdout();
    let copied = tokio::io::copy(&mut stream, &mut output).await?;
    output.flush().await?;
    debug!(copied, session, "input drain finished");
    Ok(())
}

/// `readwrite --attach … --session …`: the user-facing terminal
/// bridge. Ends when either direction closes.
pub async fn terminal_bridge(target: &str, session: &str, config: &ClientConfig) -> Result<()> {
    let stream = ipc::connect_attach(target, session, StdioRole::Terminal, config).await?;
    let (mut read_half, mut write_half) = stream.into_split();

    let up = async {
        let mut input = tokio::io::stdin();
        let _ = tokio::io::copy(&mut input, &mut write_half).await;
        write_half.shutdown().await.ok();
    };
    let down = async {
        let mut output = tokio::io::stdout();
        let result = tokio::io::copy(&mut read_half, &mut output).await;
        output.flush().await.ok();
        result
    };

    tokio::select! {
        _ = up => Ok(()),
        result = down => {
            result.map_err(DaemonError::Io)?;
            Ok(())
        }
    }
}
