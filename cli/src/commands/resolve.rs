// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `vigil resolve`: show the launch strategy for a mode and source set.

use anyhow::Result;
use colored::Colorize;

use vigil_core::domain::activation::DeploymentMode;
use vigil_core::domain::resolver::resolve;

use super::parse_sources;

#[derive(clap::Args)]
pub struct ResolveCommand {
    /// Deployment mode: local or container
    #[arg(long, default_value = "container")]
    mode: DeploymentMode,

    /// Ruleset source declaration as JSON; repeatable
    #[arg(long = "source", value_name = "JSON")]
    sources: Vec<String>,
}

impl ResolveCommand {
    pub fn execute(self) -> Result<()> {
        let sources = parse_sources(&self.sources)?;
        let strategy = resolve(self.mode, &sources);
        println!("{}", strategy.to_string().bold());
        Ok(())
    }
}
