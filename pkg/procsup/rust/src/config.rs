// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::attributes::ProcessAttributes;
use crate::duration;
use crate::engine::EngineSettings;
use anyhow::{Context, Result};
use log::{LevelFilter, debug, warn};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the daemon configuration file.
pub const CONFIG_ENV: &str = "DD_PROCSUP_CONFIG";

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Unix,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Unix => write!(f, "unix"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub network: Network,
    /// `host:port` for tcp, a socket path for unix.
    pub address: String,
    pub log_level: String,
    pub queue_capacity: usize,
    /// Admission timeout for commands arriving over RPC.
    #[serde(deserialize_with = "duration::deserialize")]
    pub submit_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub restart_grace: Duration,
    /// Stop every running child before the daemon exits.
    pub stop_on_shutdown: bool,
    #[serde(deserialize_with = "duration::deserialize")]
    pub shutdown_grace: Duration,
    /// Directory of process manifests started at boot.
    pub processes_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            network: Network::Tcp,
            address: DEFAULT_ADDRESS.to_string(),
            log_level: "info".to_string(),
            queue_capacity: engine.queue_capacity,
            submit_timeout: Duration::from_secs(10),
            restart_grace: engine.restart_grace,
            stop_on_shutdown: false,
            shutdown_grace: Duration::from_secs(5),
            processes_dir: None,
        }
    }
}

impl DaemonConfig {
    /// Read the configuration at `path`, or the defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn log_level(&self) -> Result<LevelFilter> {
        self.log_level
            .parse()
            .with_context(|| format!("invalid log level: {}", self.log_level))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            queue_capacity: self.queue_capacity,
            restart_grace: self.restart_grace,
            ..EngineSettings::default()
        }
    }
}

/// `--config` wins over the environment variable.
pub fn config_path(flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

/// Scan a directory for `*.yaml`/`*.yml` manifests, sorted by file name.
/// Files that fail to parse or validate are logged and skipped.
pub fn load_manifests(dir: &Path) -> Result<Vec<(String, ProcessAttributes)>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read processes directory: {}", dir.display()))?;

    let mut manifests: Vec<PathBuf> = entries
        .filter_map(|e| match e {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!("skipping unreadable entry in {}: {e}", dir.display());
                None
            }
        })
        .filter(|path| {
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                debug!("skipping non-YAML file: {}", path.display());
            }
            is_yaml
        })
        .collect();
    manifests.sort();

    let mut loaded = Vec::new();
    for path in manifests {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        match parse_manifest(&path) {
            Ok(attrs) => loaded.push((name, attrs)),
            Err(e) => warn!("skipping {}: {e:#}", path.display()),
        }
    }
    Ok(loaded)
}

fn parse_manifest(path: &Path) -> Result<ProcessAttributes> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let attrs: ProcessAttributes =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    attrs.validate()?;
    Ok(attrs)
}
