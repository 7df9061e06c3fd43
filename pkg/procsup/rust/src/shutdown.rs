// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::process::{ManagedProcess, wait_for_exit};
use log::{info, warn};
use nix::sys::signal::Signal;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// SIGTERM, wait up to `grace` for the exit, then SIGKILL and wait up to
/// `kill_wait` for the reap. Returns false if nothing was running.
pub async fn stop_gracefully(process: &ManagedProcess, grace: Duration, kill_wait: Duration) -> bool {
    let Some(mut exited) = process.request_stop(Signal::SIGTERM) else {
        return false;
    };
    if wait_for_exit(&mut exited, grace).await {
        return true;
    }
    warn!(
        "[{}] stop timeout ({}ms) reached, sending SIGKILL",
        process.id(),
        grace.as_millis()
    );
    process.signal(Some(Signal::SIGKILL));
    if !wait_for_exit(&mut exited, kill_wait).await {
        warn!("[{}] still running after SIGKILL, giving up", process.id());
    }
    true
}

/// Send SIGTERM to every running process, wait until a shared deadline, then
/// SIGKILL stragglers.
pub async fn shutdown_all(processes: &[Arc<ManagedProcess>], grace: Duration, kill_wait: Duration) {
    let mut pending = Vec::new();
    for proc in processes {
        if let Some(exited) = proc.request_stop(Signal::SIGTERM) {
            pending.push((proc, exited));
        }
    }
    if pending.is_empty() {
        return;
    }
    info!("waiting for {} process(es) to exit", pending.len());

    let deadline = Instant::now() + grace;
    for (proc, mut exited) in pending {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if wait_for_exit(&mut exited, remaining).await {
            continue;
        }
        warn!("[{}] shutdown timeout reached, sending SIGKILL", proc.id());
        proc.signal(Some(Signal::SIGKILL));
        if !wait_for_exit(&mut exited, kill_wait).await {
            warn!("[{}] still running after SIGKILL, giving up", proc.id());
        }
    }
}
