// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `vigil replay`: re-publish and print a stored object log.

use anyhow::{bail, Result};
use uuid::Uuid;

use vigil_core::domain::activation::{InstanceId, LogId};
use vigil_core::infrastructure::settings::EngineSettings;

use super::run::build_engine;

#[derive(clap::Args)]
pub struct ReplayCommand {
    /// Activation instance id (sets the broadcast topic)
    #[arg(value_name = "INSTANCE_ID")]
    instance_id: Uuid,

    /// Object log id to replay
    #[arg(long, value_name = "LOG_ID")]
    log_id: Uuid,
}

impl ReplayCommand {
    pub async fn execute(self, settings: EngineSettings) -> Result<()> {
        if settings.database_url.is_none() {
            bail!("replay requires a configured database_url");
        }
        let engine = build_engine(&settings).await?;
        let text = engine
            .orchestrator
            .replay_log(InstanceId(self.instance_id), LogId(self.log_id))
            .await?;
        print!("{text}");
        Ok(())
    }
}
