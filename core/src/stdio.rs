//! Stdio session identifiers
//!
//! A session id names one bridged command across both daemons and its
//! helper processes. The id embeds the originating server, the daemon
//! pid, and a per-daemon counter so that restarting either side can
//! never collide with a live session.

use std::sync::atomic::{AtomicU64, Ordering};

/// Mints session ids of the form `{server-id}/{daemon-pid}/{alias}-{n}`.
pub struct SessionIds {
    server_id: String,
    counter: AtomicU64,
}

impl SessionIds {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self, alias: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}/{}/{}-{}", self.server_id, std::process::id(), alias, n)
    }
}
