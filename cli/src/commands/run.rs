// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `vigil run`: activate an instance in-process and tail its output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use tracing::debug;
use uuid::Uuid;

use vigil_core::application::orchestrator::ActivationOrchestrator;
use vigil_core::domain::activation::{
    ActivationInstance, ActivationStatus, DeploymentMode, InstanceId, LaunchRequest, LogId,
    RestartPolicy,
};
use vigil_core::domain::repository::{
    ActivationInstanceRepository, ActivationLogRepository,
};
use vigil_core::infrastructure::broadcast::{BroadcastError, BroadcastHub};
use vigil_core::infrastructure::container::ContainerBackend;
use vigil_core::infrastructure::process::ProcessBackend;
use vigil_core::infrastructure::repositories::{
    InMemoryActivationStore, PostgresActivationStore,
};
use vigil_core::infrastructure::settings::EngineSettings;

use super::parse_sources;

/// The engine assembled for one CLI invocation.
pub struct Engine {
    pub orchestrator: Arc<ActivationOrchestrator>,
    pub instances: Arc<dyn ActivationInstanceRepository>,
}

/// Wire up backends, hub and storage from settings. Postgres when a
/// database URL is configured, in-memory otherwise.
pub async fn build_engine(settings: &EngineSettings) -> Result<Engine> {
    let (logs, instances): (
        Arc<dyn ActivationLogRepository>,
        Arc<dyn ActivationInstanceRepository>,
    ) = match &settings.database_url {
        Some(url) => {
            let store = Arc::new(
                PostgresActivationStore::connect(url)
                    .await
                    .context("failed to connect to database")?,
            );
            store
                .ensure_schema()
                .await
                .context("failed to apply storage schema")?;
            (store.clone(), store)
        }
        None => {
            debug!("no database configured; using in-memory storage");
            let store = Arc::new(InMemoryActivationStore::new());
            (store.clone(), store)
        }
    };

    let hub = Arc::new(BroadcastHub::new(settings.broadcast_capacity));
    let process = Arc::new(ProcessBackend::from_settings(settings));
    let container = Arc::new(
        ContainerBackend::new(settings).context("failed to set up container backend")?,
    );

    Ok(Engine {
        orchestrator: Arc::new(ActivationOrchestrator::new(
            process, container, hub, logs, instances.clone(),
        )),
        instances,
    })
}

#[derive(clap::Args)]
pub struct RunCommand {
    /// Activation name
    #[arg(long, default_value = "cli-activation")]
    name: String,

    /// Deployment mode: local or container
    #[arg(long, default_value = "local")]
    mode: DeploymentMode,

    /// Rulebook file (YAML)
    #[arg(long, value_name = "FILE")]
    rulebook: PathBuf,

    /// Inventory file
    #[arg(long, value_name = "FILE")]
    inventory: Option<PathBuf>,

    /// Extra-vars file
    #[arg(long, value_name = "FILE")]
    extra_vars: Option<PathBuf>,

    /// Execution environment (image reference in container mode)
    #[arg(long, default_value = "quay.io/vigil/evaluator:latest")]
    image: String,

    /// Working directory (required in local mode)
    #[arg(long)]
    workdir: Option<String>,

    /// Ruleset source declaration as JSON, e.g.
    /// '{"type":"websocket","config":{"port":10000}}'; repeatable
    #[arg(long = "source", value_name = "JSON")]
    sources: Vec<String>,
}

impl RunCommand {
    pub async fn execute(self, settings: EngineSettings) -> Result<()> {
        let sources = parse_sources(&self.sources)?;
        let rulesets = tokio::fs::read_to_string(&self.rulebook)
            .await
            .with_context(|| format!("failed to read {}", self.rulebook.display()))?;
        let inventory = match &self.inventory {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => String::new(),
        };
        let extra_vars = match &self.extra_vars {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => String::new(),
        };

        let engine = build_engine(&settings).await?;
        let instance_id = InstanceId::new();
        let log_id = LogId::new();

        let now = Utc::now();
        engine
            .instances
            .save(&ActivationInstance {
                id: instance_id,
                name: self.name.clone(),
                rulebook_id: Uuid::new_v4(),
                inventory_id: Uuid::new_v4(),
                extra_var_id: Uuid::new_v4(),
                execution_environment: self.image.clone(),
                working_directory: self.workdir.clone(),
                deployment_mode: self.mode,
                log_id,
                status: ActivationStatus::Pending,
                restart_policy: RestartPolicy::Never,
                restart_count: 0,
                restarted_at: None,
                created_at: now,
                modified_at: now,
            })
            .await
            .context("failed to save activation instance")?;

        // Subscribe before activating so no early output is missed.
        let mut receiver = engine.orchestrator.hub().subscribe(&instance_id.topic());

        let strategy = engine
            .orchestrator
            .activate(LaunchRequest {
                instance_id,
                log_id,
                deployment_mode: self.mode,
                execution_environment: self.image,
                rulesets,
                ruleset_sources: sources,
                inventory,
                extra_vars,
                working_directory: self.workdir,
                host: settings.server_host.clone(),
                port: settings.server_port,
            })
            .await?;

        eprintln!(
            "{} {} ({})",
            "activated".green().bold(),
            instance_id,
            strategy
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(Duration::from_millis(200));

        loop {
            tokio::select! {
                frame = receiver.recv() => match frame {
                    Ok(frame) => print_frame(frame.text()),
                    Err(BroadcastError::Lagged(_)) => continue,
                    Err(_) => break,
                },
                _ = &mut ctrl_c => {
                    eprintln!("{}", "deactivating...".yellow());
                    engine.orchestrator.deactivate(instance_id).await?;
                    break;
                }
                _ = ticker.tick() => {
                    if !engine.orchestrator.is_active(instance_id).await {
                        break;
                    }
                }
            }
        }

        // Flush frames that arrived before the instance wound down.
        while let Ok(frame) = receiver.try_recv() {
            print_frame(frame.text());
        }

        if let Some(instance) = engine.instances.find(instance_id).await? {
            eprintln!("{} {}", "final status:".bold(), instance.status);
        }
        Ok(())
    }
}

/// Row-log frames are single lines without their terminator; object-log
/// frames are raw decoded text that keeps its own newlines.
fn print_frame(text: &str) {
    if text.ends_with('\n') {
        print!("{text}");
    } else {
        println!("{text}");
    }
}
