// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Launch parameters of a managed process. Fixed when the process is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessAttributes {
    /// Working directory of the child.
    pub dir: String,
    /// Path of the executable.
    pub cmd: String,
    /// Full argument vector; `argv[0]` is the name the child sees.
    #[serde(default)]
    pub argv: Vec<String>,
    /// `KEY=VALUE` entries. Empty means the child inherits the daemon's environment.
    #[serde(default)]
    pub env: Vec<String>,
    /// Paths opened for append and wired to stdin, stdout and stderr in order.
    #[serde(default)]
    pub files: Vec<String>,
    /// Respawn the process whenever it exits on its own.
    #[serde(default)]
    pub restart: bool,
    /// Cron expression; when set the first spawn waits for the schedule.
    #[serde(default)]
    pub cron: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttributesError {
    #[error("dir is required")]
    MissingDir,
    #[error("cmd is required")]
    MissingCmd,
    #[error("at least one file is required")]
    MissingFiles,
}

impl ProcessAttributes {
    /// Checks the fields a start request must carry.
    pub fn validate(&self) -> Result<(), AttributesError> {
        if self.dir.trim().is_empty() {
            return Err(AttributesError::MissingDir);
        }
        if self.cmd.trim().is_empty() {
            return Err(AttributesError::MissingCmd);
        }
        if self.files.iter().all(|f| f.trim().is_empty()) {
            return Err(AttributesError::MissingFiles);
        }
        Ok(())
    }

    /// The cron expression, ignoring blank values.
    pub fn schedule(&self) -> Option<&str> {
        self.cron
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }
}
