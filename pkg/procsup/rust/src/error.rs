// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::time::Duration;
use thiserror::Error;

/// Returned when a command cannot be admitted to the engine queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("command queue busy: no room after {0:?}")]
    Busy(Duration),
    #[error("command queue closed")]
    Closed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("supervisor loop already running")]
    AlreadyRunning,
}
