// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Cron-driven start triggers.
//!
//! Each registered schedule runs in its own task that sleeps until the next
//! occurrence and then calls the fire action. Actions must return quickly;
//! they run on the schedule's task and delay only that schedule.

use crate::duration::parse_duration;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub type FireAction = Arc<dyn Fn() + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },
}

/// A parsed schedule expression.
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let trimmed = expression.trim();
        let invalid = |reason: String| ScheduleError::InvalidExpression {
            expression: expression.to_string(),
            reason,
        };

        if let Some(every) = trimmed.strip_prefix("@every") {
            let period = parse_duration(every).map_err(|e| invalid(e.to_string()))?;
            if period.is_zero() {
                return Err(invalid("period must be positive".to_string()));
            }
            return Ok(Schedule::Every(period));
        }

        let normalized = normalize_cron_expr(trimmed);
        cron::Schedule::from_str(&normalized)
            .map(|s| Schedule::Cron(Box::new(s)))
            .map_err(|e| invalid(e.to_string()))
    }
}

impl Schedule {
    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(schedule) => schedule.after(&after).next(),
            Schedule::Every(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|p| after.checked_add_signed(p)),
        }
    }
}

/// Standard 5-field cron ("m h dom mon dow") gets a leading seconds field.
fn normalize_cron_expr(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

struct Entry {
    schedule: Arc<Schedule>,
    action: FireAction,
    cancel: Option<CancellationToken>,
}

struct TriggerState {
    token: CancellationToken,
    running: bool,
    entries: HashMap<String, Entry>,
}

/// Owns every registered schedule. Schedules added before `start` are held
/// until it is called; those added while running begin immediately.
pub struct ScheduleTrigger {
    state: Mutex<TriggerState>,
}

impl Default for ScheduleTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleTrigger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TriggerState {
                token: CancellationToken::new(),
                running: false,
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `action` to fire on every occurrence of `expression`. A
    /// schedule already registered under `key` is replaced.
    pub fn add_schedule(
        &self,
        key: &str,
        expression: &str,
        action: FireAction,
    ) -> Result<(), ScheduleError> {
        let schedule = Arc::new(expression.parse::<Schedule>()?);
        let mut state = self.lock();
        let mut entry = Entry {
            schedule,
            action,
            cancel: None,
        };
        if state.running {
            entry.cancel = Some(spawn_entry(key, &entry, &state.token));
        }
        if let Some(old) = state.entries.insert(key.to_string(), entry)
            && let Some(cancel) = old.cancel
        {
            cancel.cancel();
        }
        debug!("[{key}] schedule registered: {expression}");
        Ok(())
    }

    /// Cancel and forget the schedule registered under `key`.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.lock().entries.remove(key);
        match removed {
            Some(entry) => {
                if let Some(cancel) = entry.cancel {
                    cancel.cancel();
                }
                debug!("[{key}] schedule removed");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn start(&self) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.running {
            return;
        }
        if state.token.is_cancelled() {
            state.token = CancellationToken::new();
        }
        state.running = true;
        for (key, entry) in state.entries.iter_mut() {
            entry.cancel = Some(spawn_entry(key, entry, &state.token));
        }
    }

    /// Cancel every schedule task. Registrations are kept, so a later
    /// `start` resumes them.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.running = false;
        state.token.cancel();
        for entry in state.entries.values_mut() {
            entry.cancel = None;
        }
    }
}

impl Drop for ScheduleTrigger {
    fn drop(&mut self) {
        self.lock().token.cancel();
    }
}

fn spawn_entry(key: &str, entry: &Entry, parent: &CancellationToken) -> CancellationToken {
    let cancel = parent.child_token();
    tokio::spawn(fire_loop(
        key.to_string(),
        Arc::clone(&entry.schedule),
        Arc::clone(&entry.action),
        cancel.clone(),
    ));
    cancel
}

async fn fire_loop(
    key: String,
    schedule: Arc<Schedule>,
    action: FireAction,
    cancel: CancellationToken,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        // The wall clock can trail the timer slightly; never fire the same
        // occurrence twice.
        let reference = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = schedule.next_after(reference) else {
            warn!("[{key}] schedule has no upcoming occurrence");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        debug!("[{key}] schedule fired");
        last_fire = Some(next);
        action();
    }
}
