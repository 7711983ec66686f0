//! Zombie collection
//!
//! The daemon owns child collection for the whole process. A SIGCHLD
//! never mutates anything from signal context: the tokio signal
//! stream only wakes the reaper task, which then sweeps
//! `waitpid(-1, WNOHANG)` until no more children are waitable. Each
//! reaped pid is reconciled against the primary registry first, then
//! the stdio registry, and otherwise discarded. Teardown directives
//! coming back from a registry are executed here, outside any lock.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use crate::process::Platform;
use crate::registry::{CleanOutcome, ProcessRegistry, TeardownDirective};
use crate::Result;

/// Reaches the daemon hosting a session's user terminal.
#[async_trait::async_trait]
pub trait StdioPeer: Send + Sync {
    /// Ask `addr` to terminate the terminal registered for `alias`.
    async fn killstdio(&self, addr: &str, alias: &str);
}

/// Collects exited children and reconciles the registries.
pub struct Reaper {
    platform: Arc<dyn Platform>,
    procs: Arc<ProcessRegistry>,
    stdio_procs: Arc<ProcessRegistry>,
    /// This daemon's listen address, for short-circuiting teardown
    /// notifications addressed to ourselves.
    local_addr: String,
    peer: Arc<dyn StdioPeer>,
}

impl Reaper {
    pub fn new(
        platform: Arc<dyn Platform>,
        procs: Arc<ProcessRegistry>,
        stdio_procs: Arc<ProcessRegistry>,
        local_addr: impl Into<String>,
        peer: Arc<dyn StdioPeer>,
    ) -> Self {
        Self {
            platform,
            procs,
            stdio_procs,
            local_addr: local_addr.into(),
            peer,
        }
    }

    /// Runs for the life of the daemon, woken only by SIGCHLD.
    pub async fn run(self) -> Result<()> {
        let mut sigchld = signal(SignalKind::child())?;
        while sigchld.recv().await.is_some() {
            self.sweep().await;
        }
        Ok(())
    }

    /// One full collection pass. Public so tests can drive it
    /// without delivering signals.
    pub async fn sweep(&self) {
        while let Some(pid) = self.platform.reap_next() {
            match self.procs.clean_zombie(pid) {
                CleanOutcome::Teardown(directive) => self.teardown(directive).await,
                CleanOutcome::Removed { alias } => info!(%alias, pid, "process reaped"),
                CleanOutcome::Marked => debug!(pid, "session member reaped"),
                CleanOutcome::NotFound => match self.stdio_procs.clean_zombie(pid) {
                    CleanOutcome::Teardown(directive) => self.teardown(directive).await,
                    CleanOutcome::Removed { alias } => {
                        info!(%alias, pid, "stdio terminal reaped")
                    }
                    CleanOutcome::Marked => debug!(pid, "stdio member reaped"),
                    CleanOutcome::NotFound => debug!(pid, "reaped untracked child"),
                },
            }
        }
    }

    async fn teardown(&self, directive: TeardownDirective) {
        info!(
            alias = %directive.alias,
            session = %directive.session,
            "tearing down stdio session"
        );
        for pid in &directive.signal_pids {
            if let Err(e) = self.platform.send_signal(*pid, libc::SIGTERM) {
                debug!(pid, error = %e, "session member already gone");
            }
        }
        let Some(addr) = &directive.stdio_addr else {
            return;
        };
        if addr == &self.local_addr {
            if !self.stdio_procs.signal_by_alias(&directive.alias, libc::SIGTERM) {
                debug!(alias = %directive.alias, "no local terminal to terminate");
            }
        } else {
            self.peer.killstdio(addr, &directive.alias).await;
        }
    }
}

/// Peer that drops notifications, for daemons running standalone.
pub struct NoPeer;

#[async_trait::async_trait]
impl StdioPeer for NoPeer {
    async fn killstdio(&self, addr: &str, alias: &str) {
        warn!(addr, alias, "no stdio peer configured, notification dropped");
    }
}
