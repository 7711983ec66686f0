//! Thread-safe registry of supervised processes
//!
//! One `ProcessRegistry` holds every process a daemon launched and is
//! the single source of truth for signalling, liveness checks, and
//! the `ps` listing. A second instance on the stdio-server side holds
//! the user terminal records. The registry is an explicit object
//! handed to the dispatcher and the reaper, never a global.
//!
//! Locking is one coarse mutex around the whole record vector; every
//! operation completes without awaiting, so the dispatcher can call
//! in from async context safely. Teardown work discovered while
//! cleaning a record is returned as a directive and executed by the
//! caller outside the lock.

use std::sync::{Arc, Mutex, MutexGuard};

use schema::ProcSummary;
use tracing::{debug, info, warn};

use crate::process::Platform;

/// Lifecycle of a registry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Launched, believed alive.
    Running,
    /// The command was reaped but linked helpers are still pending.
    Exited,
    /// A signal delivery failed; the record lingers until reaped.
    SignalFailed,
}

/// Bookkeeping for a record whose stdio is bridged through helpers.
#[derive(Debug)]
pub struct StdioLink {
    /// Session identifier, empty for plain logged launches.
    pub session: String,
    /// Daemon hosting the user terminal, if any.
    pub stdio_addr: Option<String>,
    pub input_pid: Option<i32>,
    pub output_pid: Option<i32>,
    cleaned_cmd: bool,
    cleaned_input: bool,
    cleaned_output: bool,
    torn_down: bool,
}

impl StdioLink {
    pub fn new(
        session: String,
        stdio_addr: Option<String>,
        input_pid: Option<i32>,
        output_pid: Option<i32>,
    ) -> Self {
        Self {
            session,
            stdio_addr,
            input_pid,
            output_pid,
            cleaned_cmd: false,
            cleaned_input: input_pid.is_none(),
            cleaned_output: output_pid.is_none(),
            torn_down: false,
        }
    }

    fn all_cleaned(&self) -> bool {
        self.cleaned_cmd && self.cleaned_input && self.cleaned_output
    }
}

/// One supervised process.
#[derive(Debug)]
pub struct RunRecord {
    pub alias: String,
    pub pid: i32,
    pub cmd: String,
    /// Environment overlay text the process was started with.
    pub env: String,
    /// Held records ignore alias signals.
    pub hold: bool,
    pub state: ProcState,
    pub link: Option<StdioLink>,
}

impl RunRecord {
    pub fn new(alias: impl Into<String>, pid: i32, cmd: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            pid,
            cmd: cmd.into(),
            env: String::new(),
            hold: false,
            state: ProcState::Running,
            link: None,
        }
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn hold(mut self, hold: bool) -> Self {
        self.hold = hold;
        self
    }

    pub fn link(mut self, link: StdioLink) -> Self {
        self.link = Some(link);
        self
    }
}

/// What `clean_zombie` wants done after the lock is released.
#[derive(Debug)]
pub enum CleanOutcome {
    /// The pid does not belong to this registry.
    NotFound,
    /// A member of a linked record was marked; teardown already ran.
    Marked,
    /// The record (or its last linked member) was removed.
    Removed { alias: String },
    /// First exit within a linked record: tear the session down.
    Teardown(TeardownDirective),
}

/// Issued at most once per linked record.
#[derive(Debug)]
pub struct TeardownDirective {
    pub alias: String,
    pub session: String,
    /// Daemon hosting the user terminal; `None` for logged launches.
    pub stdio_addr: Option<String>,
    /// Members still alive when the first one exited.
    pub signal_pids: Vec<i32>,
}

enum Member {
    Cmd,
    Input,
    Output,
}

fn member_of(rec: &RunRecord, pid: i32) -> Option<Member> {
    if rec.pid == pid {
        return Some(Member::Cmd);
    }
    let link = rec.link.as_ref()?;
    if link.input_pid == Some(pid) {
        return Some(Member::Input);
    }
    if link.output_pid == Some(pid) {
        return Some(Member::Output);
    }
    None
}

/// Registry of every process a daemon is supervising.
pub struct ProcessRegistry {
    platform: Arc<dyn Platform>,
    records: Mutex<Vec<RunRecord>>,
}

impl ProcessRegistry {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            records: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RunRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a freshly launched process. Never fails; duplicate
    /// aliases are allowed and later lookups prefer the newest.
    pub fn add(&self, record: RunRecord) {
        debug!(alias = %record.alias, pid = record.pid, "registering process");
        self.lock().push(record);
    }

    /// Send `signum` to the most recently added record for `alias`.
    ///
    /// Returns true when the signal was delivered (or the record is
    /// held, which swallows signals by design of the hold flag).
    pub fn signal_by_alias(&self, alias: &str, signum: i32) -> bool {
        let mut records = self.lock();
        for rec in records.iter_mut().rev() {
            if rec.alias != alias || rec.state == ProcState::Exited {
                continue;
            }
            if rec.hold {
                debug!(alias, pid = rec.pid, "record is held, signal skipped");
                return true;
            }
            return match self.platform.send_signal(rec.pid, signum) {
                Ok(()) => {
                    info!(alias, pid = rec.pid, signum, "signal delivered");
                    true
                }
                Err(e) => {
                    warn!(alias, pid = rec.pid, signum, error = %e, "signal failed");
                    rec.state = ProcState::SignalFailed;
                    false
                }
            };
        }
        false
    }

    /// Best-effort signal to every record; returns how many deliveries
    /// succeeded.
    pub fn signal_all(&self, signum: i32) -> usize {
        let mut records = self.lock();
        let mut delivered = 0;
        for rec in records.iter_mut() {
            if rec.state == ProcState::Exited || rec.hold {
                continue;
            }
            match self.platform.send_signal(rec.pid, signum) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(alias = %rec.alias, pid = rec.pid, error = %e, "signal failed");
                    rec.state = ProcState::SignalFailed;
                }
            }
        }
        delivered
    }

    /// Whether the most recent record for `alias` names a live process.
    pub fn is_running(&self, alias: &str) -> bool {
        let records = self.lock();
        records
            .iter()
            .rev()
            .find(|r| r.alias == alias && r.state != ProcState::Exited)
            .map(|r| self.platform.is_alive(r.pid))
            .unwrap_or(false)
    }

    /// Reconcile one reaped pid with the registry.
    ///
    /// Plain records are removed outright. For a linked record the
    /// matching member is marked; the first exit yields a
    /// [`TeardownDirective`] for the caller to execute outside the
    /// lock, and the record is removed once every member is cleaned.
    pub fn clean_zombie(&self, pid: i32) -> CleanOutcome {
        let mut records = self.lock();
        let Some(i) = records.iter().position(|r| member_of(r, pid).is_some()) else {
            return CleanOutcome::NotFound;
        };
        let Some(member) = member_of(&records[i], pid) else {
            return CleanOutcome::NotFound;
        };
        if records[i].link.is_none() {
            let rec = records.remove(i);
            return CleanOutcome::Removed { alias: rec.alias };
        }

        if matches!(member, Member::Cmd) {
            records[i].state = ProcState::Exited;
        }
        let alias = records[i].alias.clone();
        let cmd_pid = records[i].pid;
        let rec = &mut records[i];
        let Some(link) = rec.link.as_mut() else {
            return CleanOutcome::NotFound;
        };
        match member {
            Member::Cmd => link.cleaned_cmd = true,
            Member::Input => link.cleaned_input = true,
            Member::Output => link.cleaned_output = true,
        }
        if link.all_cleaned() {
            let rec = records.remove(i);
            return CleanOutcome::Removed { alias: rec.alias };
        }
        if link.torn_down {
            return CleanOutcome::Marked;
        }
        link.torn_down = true;

        let mut signal_pids = Vec::new();
        if !link.cleaned_cmd {
            signal_pids.push(cmd_pid);
        }
        if !link.cleaned_input {
            if let Some(p) = link.input_pid {
                signal_pids.push(p);
            }
        }
        if !link.cleaned_output {
            if let Some(p) = link.output_pid {
                signal_pids.push(p);
            }
        }
        CleanOutcome::Teardown(TeardownDirective {
            alias,
            session: link.session.clone(),
            stdio_addr: link.stdio_addr.clone(),
            signal_pids,
        })
    }

    /// Snapshot for the `ps` listing.
    pub fn report(&self) -> Vec<ProcSummary> {
        let records = self.lock();
        records
            .iter()
            .filter(|r| r.state != ProcState::Exited)
            .map(|r| ProcSummary {
                alias: r.alias.clone(),
                pid: r.pid,
                cmd: r.cmd.clone(),
                env: r.env.clone(),
                status: if self.platform.is_alive(r.pid) {
                    "running".to_string()
                } else {
                    "zombie".to_string()
                },
                hold: r.hold,
            })
            .collect()
    }

    /// Number of records, including linked ones pending teardown.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
