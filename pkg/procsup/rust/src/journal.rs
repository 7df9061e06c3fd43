// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// Number of events retained per process.
pub const JOURNAL_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Info,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Info => write!(f, "info"),
            EventKind::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub kind: EventKind,
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = self.time.to_rfc3339_opts(SecondsFormat::Secs, true);
        write!(f, "{stamp} {} {}", self.kind, self.message)
    }
}

/// Fixed-capacity ring of the most recent events. Once full, every push
/// overwrites the oldest slot.
#[derive(Debug)]
pub struct EventJournal {
    slots: [Option<Event>; JOURNAL_CAPACITY],
    next: usize,
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl EventJournal {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            next: 0,
        }
    }

    pub fn push(&mut self, kind: EventKind, message: impl Into<String>) {
        self.slots[self.next] = Some(Event {
            time: Utc::now(),
            kind,
            message: message.into(),
        });
        self.next = (self.next + 1) % JOURNAL_CAPACITY;
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(EventKind::Info, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(EventKind::Error, message);
    }

    /// Events in chronological order, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        (0..JOURNAL_CAPACITY)
            .map(move |i| (self.next + i) % JOURNAL_CAPACITY)
            .filter_map(move |idx| self.slots[idx].as_ref())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
