// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The supervision engine: registry, serialized command loop and the schedule
//! trigger bound to it.

use crate::attributes::ProcessAttributes;
use crate::command::Command;
use crate::error::{EngineError, SubmitError};
use crate::process::{ManagedProcess, Metadata};
use crate::schedule::ScheduleTrigger;
use crate::shutdown::{shutdown_all, stop_gracefully};
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub queue_capacity: usize,
    /// Grace carried by restarts a watcher requests after a crash.
    pub restart_grace: Duration,
    /// How long a watcher waits for queue room when requesting a restart.
    pub restart_submit_timeout: Duration,
    /// Bound on waiting for the reap after SIGKILL.
    pub kill_wait: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            restart_grace: Duration::from_secs(1),
            restart_submit_timeout: Duration::from_secs(1),
            kill_wait: Duration::from_secs(5),
        }
    }
}

/// Cloneable producer side of the command queue.
#[derive(Clone, Debug)]
pub struct SubmitHandle {
    tx: mpsc::Sender<Command>,
}

impl SubmitHandle {
    pub fn channel(capacity: usize) -> (SubmitHandle, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (SubmitHandle { tx }, rx)
    }

    /// Enqueue `command`, waiting at most `timeout` for room.
    pub async fn submit(&self, command: Command, timeout: Duration) -> Result<(), SubmitError> {
        self.tx
            .send_timeout(command, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SubmitError::Busy(timeout),
                SendTimeoutError::Closed(_) => SubmitError::Closed,
            })
    }
}

pub struct Supervisor {
    settings: EngineSettings,
    registry: Mutex<HashMap<String, Arc<ManagedProcess>>>,
    handle: SubmitHandle,
    rx: Mutex<Option<mpsc::Receiver<Command>>>,
    trigger: ScheduleTrigger,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl Supervisor {
    pub fn new(settings: EngineSettings) -> Self {
        let (handle, rx) = SubmitHandle::channel(settings.queue_capacity);
        Self {
            settings,
            registry: Mutex::new(HashMap::new()),
            handle,
            rx: Mutex::new(Some(rx)),
            trigger: ScheduleTrigger::new(),
        }
    }

    pub fn handle(&self) -> SubmitHandle {
        self.handle.clone()
    }

    pub async fn submit(&self, command: Command, timeout: Duration) -> Result<(), SubmitError> {
        self.handle.submit(command, timeout).await
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<ManagedProcess>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, id: &str) -> Option<Arc<ManagedProcess>> {
        self.registry().get(id).cloned()
    }

    fn processes(&self) -> Vec<Arc<ManagedProcess>> {
        self.registry().values().cloned().collect()
    }

    /// Consume commands one at a time until `token` is cancelled. In-flight
    /// dispatch completes before the loop checks for cancellation again.
    pub async fn run(&self, token: CancellationToken) -> Result<(), EngineError> {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EngineError::AlreadyRunning)?;

        info!("supervisor loop started");
        self.trigger.start();
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = rx.recv() => match received {
                    Some(command) => self.dispatch(command).await,
                    None => break,
                },
            }
        }
        self.trigger.stop();
        rx.close();
        info!("supervisor loop stopped");
        Ok(())
    }

    /// Snapshot every managed process, sorted by identifier.
    pub fn list(&self) -> Vec<Metadata> {
        let mut out: Vec<Metadata> = self.processes().iter().map(|p| p.metadata()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Stop every running child with a shared `grace` deadline.
    pub async fn shutdown(&self, grace: Duration) {
        let processes = self.processes();
        shutdown_all(&processes, grace, self.settings.kill_wait).await;
    }

    async fn dispatch(&self, command: Command) {
        debug!("dispatching {command}");
        match command {
            Command::Start(attributes) => self.create(attributes),
            Command::Kill { id, prune } => {
                let Some(process) = self.target(&id) else {
                    return;
                };
                process.request_stop(Signal::SIGKILL);
                if prune {
                    self.prune(&id);
                }
            }
            Command::Stop { id, grace, prune } => {
                let Some(process) = self.target(&id) else {
                    return;
                };
                stop_gracefully(&process, grace, self.settings.kill_wait).await;
                if prune {
                    self.prune(&id);
                }
            }
            Command::Restart { id, grace } => {
                let Some(process) = self.target(&id) else {
                    return;
                };
                stop_gracefully(&process, grace, self.settings.kill_wait).await;
                process.start();
            }
            Command::Signal { id, signal } => {
                if let Some(process) = self.target(&id) {
                    process.signal(signal);
                }
            }
        }
    }

    fn target(&self, id: &str) -> Option<Arc<ManagedProcess>> {
        let found = self.lookup(id);
        if found.is_none() {
            debug!("[{id}] not managed, ignoring");
        }
        found
    }

    fn create(&self, attributes: ProcessAttributes) {
        let id = Uuid::new_v4().to_string();
        let process = Arc::new(ManagedProcess::new(
            id.clone(),
            attributes,
            self.handle.clone(),
            self.settings.restart_grace,
            self.settings.restart_submit_timeout,
        ));
        self.registry().insert(id.clone(), Arc::clone(&process));
        info!("[{id}] registered (cmd={})", process.attributes().cmd);

        let Some(expression) = process.attributes().schedule() else {
            process.start();
            return;
        };

        let weak: Weak<ManagedProcess> = Arc::downgrade(&process);
        let action = Arc::new(move || {
            if let Some(process) = weak.upgrade()
                && !process.is_running()
            {
                process.start();
            }
        });
        match self.trigger.add_schedule(&id, expression, action) {
            Ok(()) => process.record_info(format!("scheduled: {expression}")),
            Err(e) => {
                warn!("[{id}] {e}");
                process.record_error(e.to_string());
            }
        }
    }

    fn prune(&self, id: &str) {
        self.trigger.remove(id);
        if self.registry().remove(id).is_some() {
            info!("[{id}] pruned");
        }
    }
}
