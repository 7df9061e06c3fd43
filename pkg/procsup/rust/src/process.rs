// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::attributes::ProcessAttributes;
use crate::command::{Command, signal_name};
use crate::engine::SubmitHandle;
use crate::env::split_env_entries;
use crate::journal::EventJournal;
use log::{info, warn};
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::time::timeout;

/// Resolves to `true` once the watcher has recorded the child's exit.
pub type ExitSignal = watch::Receiver<bool>;

/// Point-in-time view of a managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub pid: Option<u32>,
    pub alive: bool,
    pub attributes: ProcessAttributes,
    /// Journal lines, oldest first.
    pub events: Vec<String>,
    pub exit_code: Option<i32>,
    pub exit_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRecord {
    pub pid: u32,
    pub code: i32,
    pub description: String,
}

impl ExitRecord {
    fn from_status(pid: u32, status: ExitStatus) -> Self {
        Self {
            pid,
            // Killed by a signal: no exit code.
            code: status.code().unwrap_or(-1),
            description: status.to_string(),
        }
    }
}

struct LiveHandle {
    pid: u32,
    exited: ExitSignal,
}

enum Lifecycle {
    /// Never spawned.
    Idle,
    /// Spawned and not yet reaped.
    Running(LiveHandle),
    /// Reaped; the last exit is kept until the next spawn.
    Exited(ExitRecord),
}

struct RunState {
    lifecycle: Lifecycle,
    /// Set when a stop, kill or restart asked the current child to go away,
    /// so its exit does not trigger an automatic restart.
    halted: bool,
    journal: EventJournal,
}

pub struct ManagedProcess {
    id: String,
    attributes: ProcessAttributes,
    submitter: SubmitHandle,
    restart_grace: Duration,
    restart_submit_timeout: Duration,
    state: Mutex<RunState>,
}

impl ManagedProcess {
    pub fn new(
        id: String,
        attributes: ProcessAttributes,
        submitter: SubmitHandle,
        restart_grace: Duration,
        restart_submit_timeout: Duration,
    ) -> Self {
        Self {
            id,
            attributes,
            submitter,
            restart_grace,
            restart_submit_timeout,
            state: Mutex::new(RunState {
                lifecycle: Lifecycle::Idle,
                halted: false,
                journal: EventJournal::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attributes(&self) -> &ProcessAttributes {
        &self.attributes
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lock().lifecycle, Lifecycle::Running(_))
    }

    pub fn record_info(&self, message: impl Into<String>) {
        self.lock().journal.info(message);
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.lock().journal.error(message);
    }

    /// Spawn the process unless it is already running. Every failure is
    /// journaled and leaves no live handle behind. Returns whether a child
    /// was spawned.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut state = self.lock();
        if matches!(state.lifecycle, Lifecycle::Running(_)) {
            return false;
        }

        let files = match open_files(&self.attributes.files) {
            Ok(files) => files,
            Err(e) => {
                warn!("[{}] {e}", self.id);
                state.journal.error(e);
                return false;
            }
        };
        state
            .journal
            .info(format!("open files {:?} success", self.attributes.files));

        let child = match self.build_command(&files, &mut state.journal) {
            Ok(mut cmd) => cmd.spawn(),
            Err(e) => Err(e),
        };
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    "[{}] failed to spawn: {}: {e}",
                    self.id, self.attributes.cmd
                );
                state.journal.error(format!("start failed: {e}"));
                return false;
            }
        };
        let Some(pid) = child.id() else {
            state.journal.error("start failed: child exited before it was tracked");
            return false;
        };

        let (exited_tx, exited_rx) = watch::channel(false);
        state.lifecycle = Lifecycle::Running(LiveHandle {
            pid,
            exited: exited_rx,
        });
        state.halted = false;
        state.journal.info(format!("start success, pid: {pid}"));
        info!(
            "[{}] spawned (pid={pid}, cmd={})",
            self.id, self.attributes.cmd
        );

        tokio::spawn(Arc::clone(self).watch(child, pid, files, exited_tx));
        true
    }

    fn build_command(
        &self,
        files: &[File],
        journal: &mut EventJournal,
    ) -> std::io::Result<tokio::process::Command> {
        let attrs = &self.attributes;
        let mut cmd = tokio::process::Command::new(&attrs.cmd);
        if let Some((arg0, args)) = attrs.argv.split_first() {
            cmd.arg0(arg0);
            cmd.args(args);
        }
        if !attrs.dir.is_empty() {
            cmd.current_dir(&attrs.dir);
        }
        if !attrs.env.is_empty() {
            let (vars, rejected) = split_env_entries(&attrs.env);
            if !rejected.is_empty() {
                journal.error(format!("ignoring malformed env entries: {rejected:?}"));
            }
            cmd.env_clear();
            cmd.envs(vars);
        }

        cmd.stdin(stdio_for(files, 0)?);
        cmd.stdout(stdio_for(files, 1)?);
        cmd.stderr(stdio_for(files, 2)?);
        map_extra_fds(&mut cmd, files);
        Ok(cmd)
    }

    /// Reap one child. `files` are exactly the handles opened for this spawn.
    async fn watch(
        self: Arc<Self>,
        mut child: Child,
        pid: u32,
        files: Vec<File>,
        exited: watch::Sender<bool>,
    ) {
        let outcome = child.wait().await;

        let auto_restart = {
            let mut state = self.lock();
            let record = match outcome {
                Ok(status) => {
                    state
                        .journal
                        .info(format!("wait success, pid: {pid}, {status}"));
                    ExitRecord::from_status(pid, status)
                }
                Err(e) => {
                    state.journal.error(format!("wait failed, pid: {pid}: {e}"));
                    ExitRecord {
                        pid,
                        code: -1,
                        description: format!("wait failed: {e}"),
                    }
                }
            };
            info!("[{}] exited with {}", self.id, record.description);
            if matches!(&state.lifecycle, Lifecycle::Running(live) if live.pid == pid) {
                state.lifecycle = Lifecycle::Exited(record);
            }
            self.attributes.restart && !state.halted
        };

        drop(files);
        exited.send_replace(true);

        if auto_restart {
            info!("[{}] scheduling automatic restart", self.id);
            let restart = Command::Restart {
                id: self.id.clone(),
                grace: self.restart_grace,
            };
            if let Err(e) = self
                .submitter
                .submit(restart, self.restart_submit_timeout)
                .await
            {
                warn!("[{}] automatic restart not queued: {e}", self.id);
            }
        }
    }

    /// Deliver `signal` to the live child. No-op without one.
    pub fn signal(&self, signal: Option<Signal>) -> bool {
        let mut state = self.lock();
        self.signal_locked(&mut state, signal)
    }

    fn signal_locked(&self, state: &mut RunState, sig: Option<Signal>) -> bool {
        let Lifecycle::Running(live) = &state.lifecycle else {
            return false;
        };
        let pid = live.pid;
        let name = signal_name(sig);
        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) => {
                state
                    .journal
                    .info(format!("signal {name} success, pid: {pid}"));
                true
            }
            Err(e) => {
                warn!("[{}] failed to send {name}: {e}", self.id);
                state
                    .journal
                    .error(format!("signal {name} failed, pid: {pid}: {e}"));
                false
            }
        }
    }

    /// Ask the live child to terminate with `sig` and mark the exit as
    /// requested. Returns a handle on the exit, or `None` if nothing runs.
    pub fn request_stop(&self, sig: Signal) -> Option<ExitSignal> {
        let mut state = self.lock();
        let exited = match &state.lifecycle {
            Lifecycle::Running(live) => live.exited.clone(),
            _ => return None,
        };
        state.halted = true;
        info!("[{}] sending {}", self.id, sig.as_str());
        self.signal_locked(&mut state, Some(sig));
        Some(exited)
    }

    pub fn metadata(&self) -> Metadata {
        let state = self.lock();
        let (pid, alive, exit) = match &state.lifecycle {
            Lifecycle::Idle => (None, false, None),
            Lifecycle::Running(live) => (
                Some(live.pid),
                signal::kill(Pid::from_raw(live.pid as i32), None).is_ok(),
                None,
            ),
            Lifecycle::Exited(record) => (Some(record.pid), false, Some(record)),
        };
        Metadata {
            id: self.id.clone(),
            pid,
            alive,
            attributes: self.attributes.clone(),
            events: state.journal.events().map(ToString::to_string).collect(),
            exit_code: exit.map(|r| r.code),
            exit_data: exit.map(|r| r.description.clone()),
        }
    }
}

/// Wait up to `limit` for the exit behind `exited` to be recorded.
pub async fn wait_for_exit(exited: &mut ExitSignal, limit: Duration) -> bool {
    timeout(limit, exited.wait_for(|done| *done)).await.is_ok()
}

fn open_files(paths: &[String]) -> Result<Vec<File>, String> {
    paths
        .iter()
        .map(|path| {
            OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .mode(0o666)
                .open(path)
                .map_err(|e| format!("open file {path} failed: {e}"))
        })
        .collect()
}

fn stdio_for(files: &[File], index: usize) -> std::io::Result<Stdio> {
    match files.get(index) {
        Some(file) => Ok(Stdio::from(file.try_clone()?)),
        None => Ok(Stdio::null()),
    }
}

/// Expose `files[3..]` to the child so entry `i` becomes descriptor `i`.
fn map_extra_fds(cmd: &mut tokio::process::Command, files: &[File]) {
    let mut staged: Vec<RawFd> = files.iter().skip(3).map(AsRawFd::as_raw_fd).collect();
    if staged.is_empty() {
        return;
    }
    // Sources are first copied above the highest target so a dup2 never
    // overwrites a source that is still pending.
    let floor = (3 + staged.len()) as libc::c_int;
    // SAFETY: only fcntl and dup2 run between fork and exec, and `staged` is
    // allocated before the fork.
    unsafe {
        cmd.pre_exec(move || {
            for fd in staged.iter_mut() {
                let copy = libc::fcntl(*fd, libc::F_DUPFD_CLOEXEC, floor);
                if copy == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                *fd = copy;
            }
            for (i, &fd) in staged.iter().enumerate() {
                if libc::dup2(fd, 3 + i as libc::c_int) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}
