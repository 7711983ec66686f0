//! In-daemon rendezvous point for stdio sessions
//!
//! Helpers on the command side and the user terminal all connect to
//! the stdio daemon and upgrade their connections for a session. The
//! hub pairs them up: command output fans out over a broadcast
//! channel (a terminal may attach before or after the first bytes),
//! terminal keystrokes funnel through an mpsc channel drained by
//! exactly one input helper.
//!
//! Entries are created lazily on first use, so attachment order
//! between the helpers and the `userStdio` request does not matter.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

const OUTPUT_CAPACITY: usize = 256;
const INPUT_CAPACITY: usize = 64;

/// Channel handles for one session.
#[derive(Clone)]
pub struct SessionChannels {
    /// Command output, fanned out to terminal attachments.
    pub output_tx: broadcast::Sender<Vec<u8>>,
    /// Terminal keystrokes, drained by the input helper.
    pub input_tx: mpsc::Sender<Vec<u8>>,
}

struct SessionEntry {
    channels: SessionChannels,
    /// Held until the input helper attaches; exactly one drain.
    input_rx: Option<mpsc::Receiver<Vec<u8>>>,
}

/// All live stdio sessions on this daemon.
pub struct StdioHub {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl Default for StdioHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioHub {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Channel handles for `session`, creating the entry on first use.
    pub fn channels(&self, session: &str) -> SessionChannels {
        let mut sessions = self.lock();
        sessions
            .entry(session.to_string())
            .or_insert_with(|| {
                debug!(session, "creating stdio session entry");
                let (output_tx, _) = broadcast::channel(OUTPUT_CAPACITY);
                let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
                SessionEntry {
                    channels: SessionChannels {
                        output_tx,
                        input_tx,
                    },
                    input_rx: Some(input_rx),
                }
            })
            .channels
            .clone()
    }

    /// Claim the input drain for `session`; only the first caller wins.
    pub fn take_input_rx(&self, session: &str) -> Option<mpsc::Receiver<Vec<u8>>> {
        // Materialize the entry first so attachment order is free.
        self.channels(session);
        self.lock().get_mut(session)?.input_rx.take()
    }

    /// Drop a session. Receivers observe the closed channels and
    /// detach on their own.
    pub fn remove(&self, session: &str) {
        if self.lock().remove(session).is_some() {
            debug!(session, "removed stdio session entry");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_are_created_once() {
        let hub = StdioHub::new();
        let first = hub.channels("s");
        let second = hub.channels("s");
        assert_eq!(hub.len(), 1);

        // Both handles reach the same broadcast channel.
        let mut rx = second.output_tx.subscribe();
        first.output_tx.send(b"hello".to_vec()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn input_drain_is_exclusive() {
        let hub = StdioHub::new();
        let mut rx = hub.take_input_rx("s").expect("first claim");
        assert!(hub.take_input_rx("s").is_none());

        hub.channels("s").input_tx.send(b"keys".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"keys");
    }

    #[tokio::test]
    async fn removal_closes_the_input_channel() {
        let hub = StdioHub::new();
        let mut rx = hub.take_input_rx("s").expect("claim");
        hub.remove("s");
        assert!(rx.recv().await.is_none());
        assert!(hub.is_empty());
    }
}
