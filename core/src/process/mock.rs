//! Scriptable platform implementation for tests
//!
//! `MockPlatform` hands out fake pids, records every spawn and signal,
//! and lets a test drive child exits explicitly. Registry, launcher,
//! and reaper tests run against it without touching the OS.

use std::collections::{HashSet, VecDeque};
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{Platform, SpawnSpec, StdioTarget};
use crate::{CoreError, Result};

/// Outcome scripted for an upcoming spawn.
#[derive(Debug, Clone)]
pub enum SpawnScript {
    Succeed,
    Fail(String),
}

/// What the mock remembers about one spawn call.
#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub pid: i32,
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// True when the corresponding stream was wired to a pipe fd.
    pub stdin_piped: bool,
    pub stdout_piped: bool,
    pub stderr_piped: bool,
}

#[derive(Debug, Default)]
struct MockState {
    next_pid: i32,
    alive: HashSet<i32>,
    script: VecDeque<SpawnScript>,
    spawns: Vec<SpawnRecord>,
    signals: Vec<(i32, i32)>,
    pending_reaps: VecDeque<i32>,
}

/// In-memory stand-in for [`super::unix::UnixPlatform`].
#[derive(Debug)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_pid: 1000,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue an outcome for the next unscripted spawn call.
    pub fn script_spawn(&self, outcome: SpawnScript) {
        self.lock().script.push_back(outcome);
    }

    /// Mark a pid as exited and queue it for the next reap sweep.
    pub fn exited(&self, pid: i32) {
        let mut state = self.lock();
        state.alive.remove(&pid);
        state.pending_reaps.push_back(pid);
    }

    pub fn spawns(&self) -> Vec<SpawnRecord> {
        self.lock().spawns.clone()
    }

    pub fn signals(&self) -> Vec<(i32, i32)> {
        self.lock().signals.clone()
    }
}

impl Platform for MockPlatform {
    fn spawn(&self, spec: SpawnSpec) -> Result<i32> {
        let mut state = self.lock();
        match state.script.pop_front() {
            Some(SpawnScript::Fail(reason)) => return Err(CoreError::Spawn(reason)),
            Some(SpawnScript::Succeed) | None => {}
        }
        let pid = state.next_pid;
        state.next_pid += 1;
        state.alive.insert(pid);
        state.spawns.push(SpawnRecord {
            pid,
            program: spec.program,
            args: spec.args,
            workdir: spec.workdir,
            env: spec.env,
            stdin_piped: matches!(spec.stdin, StdioTarget::Fd(_)),
            stdout_piped: matches!(spec.stdout, StdioTarget::Fd(_)),
            stderr_piped: matches!(spec.stderr, StdioTarget::Fd(_)),
        });
        Ok(pid)
    }

    fn send_signal(&self, pid: i32, signum: i32) -> Result<()> {
        let mut state = self.lock();
        if !state.alive.contains(&pid) {
            return Err(CoreError::Signal(format!("No such process: {}", pid)));
        }
        state.signals.push((pid, signum));
        Ok(())
    }

    fn is_alive(&self, pid: i32) -> bool {
        self.lock().alive.contains(&pid)
    }

    fn create_pipe(&self) -> Result<(OwnedFd, OwnedFd)> {
        nix::unistd::pipe().map_err(|e| CoreError::Pipe(format!("Failed to create pipe: {}", e)))
    }

    fn reap_next(&self) -> Option<i32> {
        self.lock().pending_reaps.pop_front()
    }
}
