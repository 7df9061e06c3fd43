// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use dd_procsup::Supervisor;
use dd_procsup::command::Command;
use dd_procsup::config::{self, DaemonConfig, Network};
use dd_procsup::rpc::{self, Listener, RpcService};
use log::{error, info, warn};
use simple_logger::SimpleLogger;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "dd-procsupd", version, about = "Process supervisor daemon")]
struct Args {
    /// YAML configuration file (falls back to $DD_PROCSUP_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    network: Option<Network>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: Args) -> Result<DaemonConfig> {
    let path = config::config_path(args.config);
    let mut cfg = DaemonConfig::load(path.as_deref())?;
    if let Some(network) = args.network {
        cfg.network = network;
    }
    if let Some(address) = args.address {
        cfg.address = address;
    }
    if let Some(level) = args.log_level {
        cfg.log_level = level;
    }
    Ok(cfg)
}

async fn submit_manifests(supervisor: &Supervisor, dir: &Path, timeout: Duration) {
    let manifests = match config::load_manifests(dir) {
        Ok(manifests) => manifests,
        Err(e) => {
            warn!("no boot processes loaded: {e:#}");
            return;
        }
    };
    info!("loaded {} process manifest(s) from {}", manifests.len(), dir.display());
    for (name, attributes) in manifests {
        match supervisor.submit(Command::Start(attributes), timeout).await {
            Ok(()) => info!("[{name}] submitted"),
            Err(e) => error!("[{name}] not submitted: {e}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = load_config(Args::parse())?;
    SimpleLogger::new()
        .with_level(cfg.log_level()?)
        .init()
        .context("failed to initialise logger")?;
    info!(
        "dd-procsupd starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let listener = Listener::bind(cfg.network, &cfg.address).await?;

    let supervisor = Arc::new(Supervisor::new(cfg.engine_settings()));
    let token = CancellationToken::new();

    let engine = {
        let supervisor = Arc::clone(&supervisor);
        let token = token.clone();
        tokio::spawn(async move { supervisor.run(token).await })
    };

    if let Some(dir) = &cfg.processes_dir {
        submit_manifests(&supervisor, dir, cfg.submit_timeout).await;
    }

    {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
                _ = token.cancelled() => return,
            }
            token.cancel();
        });
    }

    let service = RpcService::new(Arc::clone(&supervisor), cfg.submit_timeout);
    rpc::serve(listener, service, token.clone()).await;

    match engine.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("supervisor loop failed: {e}"),
        Err(e) => error!("supervisor task panicked: {e}"),
    }

    if cfg.stop_on_shutdown {
        info!("stopping managed processes");
        supervisor.shutdown(cfg.shutdown_grace).await;
    }

    info!("dd-procsupd shutting down");
    Ok(())
}
