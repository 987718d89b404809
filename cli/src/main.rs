// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # vigil CLI
//!
//! Drives the activation orchestration engine in-process:
//!
//! - `vigil run`: activate an instance and tail its output until it exits
//!   or Ctrl-C deactivates it
//! - `vigil resolve`: show which launch strategy a mode + source set
//!   resolves to
//! - `vigil replay`: re-publish and print a stored object log

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vigil_core::infrastructure::settings::EngineSettings;

mod commands;

use commands::{ReplayCommand, ResolveCommand, RunCommand};

/// vigil, the activation orchestration engine
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to engine settings file (YAML)
    #[arg(
        short,
        long,
        global = true,
        env = "VIGIL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Activate an instance and tail its output
    Run(RunCommand),
    /// Show the launch strategy for a mode and source set
    Resolve(ResolveCommand),
    /// Re-publish and print a stored object log
    Replay(ReplayCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = EngineSettings::load(cli.config.as_deref())
        .context("failed to load engine settings")?;

    match cli.command {
        Command::Run(cmd) => cmd.execute(settings).await,
        Command::Resolve(cmd) => cmd.execute(),
        Command::Replay(cmd) => cmd.execute(settings).await,
    }
}
