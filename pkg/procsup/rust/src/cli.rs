// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::attributes::ProcessAttributes;
use crate::config::{DEFAULT_ADDRESS, Network};
use crate::duration::{DurationError, parse_duration};
use crate::process::Metadata;
use crate::rpc::Client;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use tabwriter::TabWriter;

#[derive(Parser, Debug)]
#[command(name = "dd-procsup", version, about = "Control a dd-procsupd daemon")]
pub struct Cli {
    /// Transport used to reach the daemon.
    #[arg(long, value_enum, default_value_t = Network::Tcp, global = true)]
    pub network: Network,
    /// Daemon address: host:port for tcp, a socket path for unix.
    #[arg(long, default_value = DEFAULT_ADDRESS, global = true)]
    pub address: String,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Show every managed process.
    List {
        /// Include argv, env, files and recent events.
        #[arg(long)]
        verbose: bool,
    },
    /// Register a new process and start it (or schedule it with --cron).
    Start(StartArgs),
    /// Send SIGKILL.
    Kill {
        #[arg(long)]
        uuid: String,
        /// Forget the process afterwards.
        #[arg(long)]
        prune: bool,
    },
    /// Send SIGTERM, then SIGKILL once the grace period runs out.
    Stop {
        #[arg(long)]
        uuid: String,
        #[arg(long, default_value = "5s", value_parser = check_duration)]
        gracefully: String,
        #[arg(long)]
        prune: bool,
    },
    /// Stop, then start again under the same uuid.
    Restart {
        #[arg(long)]
        uuid: String,
        #[arg(long, default_value = "5s", value_parser = check_duration)]
        gracefully: String,
    },
    /// Deliver a signal by name (TERM, SIGHUP, usr1...).
    Signal {
        #[arg(long)]
        uuid: String,
        #[arg(long, default_value = "")]
        signal: String,
    },
}

#[derive(Args, Debug)]
pub struct StartArgs {
    #[arg(long)]
    pub dir: String,
    #[arg(long)]
    pub cmd: String,
    /// Comma separated; the first entry is the name the process sees.
    #[arg(long, value_delimiter = ',')]
    pub argv: Vec<String>,
    /// Comma separated KEY=VALUE entries.
    #[arg(long, value_delimiter = ',')]
    pub env: Vec<String>,
    /// Comma separated stdin, stdout and stderr paths.
    #[arg(long, value_delimiter = ',', required = true)]
    pub files: Vec<String>,
    #[arg(long)]
    pub restart: bool,
    #[arg(long)]
    pub cron: Option<String>,
}

impl From<StartArgs> for ProcessAttributes {
    fn from(args: StartArgs) -> Self {
        ProcessAttributes {
            dir: args.dir,
            cmd: args.cmd,
            argv: args.argv,
            env: args.env,
            files: args.files,
            restart: args.restart,
            cron: args.cron.filter(|c| !c.trim().is_empty()),
        }
    }
}

fn check_duration(raw: &str) -> Result<String, DurationError> {
    parse_duration(raw).map(|_| raw.to_string())
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut client = Client::connect(cli.network, &cli.address).await?;
    match cli.command {
        CliCommand::List { verbose } => {
            let processes = client.list().await?;
            render(io::stdout().lock(), &processes, verbose)?;
        }
        CliCommand::Start(args) => client.start(args.into()).await?,
        CliCommand::Kill { uuid, prune } => client.kill(&uuid, prune).await?,
        CliCommand::Stop {
            uuid,
            gracefully,
            prune,
        } => client.stop(&uuid, Some(&gracefully), prune).await?,
        CliCommand::Restart { uuid, gracefully } => {
            client.restart(&uuid, Some(&gracefully)).await?
        }
        CliCommand::Signal { uuid, signal } => client.signal(&uuid, &signal).await?,
    }
    Ok(())
}

fn dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Write the process table, then one detail block per process if `verbose`.
/// Nothing is written when there are no processes.
pub fn render(out: impl Write, processes: &[Metadata], verbose: bool) -> io::Result<()> {
    if processes.is_empty() {
        return Ok(());
    }
    let mut tw = TabWriter::new(out);
    writeln!(tw, "UUID\tPID\tALIVE\tRESTART\tCRON\tEXIT\tCMD")?;
    for meta in processes {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            meta.id,
            dash(meta.pid),
            meta.alive,
            meta.attributes.restart,
            meta.attributes.schedule().unwrap_or("-"),
            dash(meta.exit_data.as_deref()),
            meta.attributes.cmd,
        )?;
    }
    if verbose {
        for meta in processes {
            writeln!(tw)?;
            writeln!(tw, "{}:", meta.id)?;
            writeln!(tw, "\tdir:\t{}", meta.attributes.dir)?;
            writeln!(tw, "\targv:\t{}", meta.attributes.argv.join(" "))?;
            writeln!(tw, "\tenv:\t{}", meta.attributes.env.join(" "))?;
            writeln!(tw, "\tfiles:\t{}", meta.attributes.files.join(" "))?;
            writeln!(tw, "\tevents:")?;
            for event in &meta.events {
                writeln!(tw, "\t\t{event}")?;
            }
        }
    }
    tw.flush()
}
