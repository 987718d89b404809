// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one activation instance (one concrete execution of an
/// activation, with its own handle and logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Broadcast topic for this instance's live output.
    pub fn topic(&self) -> String {
        format!("/activation_instance/{}", self.0)
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to an instance's object-log storage. Allocated when the instance
/// is created and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogId(pub Uuid);

impl LogId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Local,
    Container,
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::Local => write!(f, "local"),
            DeploymentMode::Container => write!(f, "container"),
        }
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(DeploymentMode::Local),
            "container" => Ok(DeploymentMode::Container),
            other => Err(format!("unknown deployment mode: {other}")),
        }
    }
}

/// Lifecycle states of one activation instance.
///
/// `Starting` may fail directly to `Stopped` (launch error); `Running` moves
/// to `Stopped` on natural exit without an explicit deactivate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationStatus {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationStatus::Pending => write!(f, "pending"),
            ActivationStatus::Starting => write!(f, "starting"),
            ActivationStatus::Running => write!(f, "running"),
            ActivationStatus::Stopping => write!(f, "stopping"),
            ActivationStatus::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for ActivationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActivationStatus::Pending),
            "starting" => Ok(ActivationStatus::Starting),
            "running" => Ok(ActivationStatus::Running),
            "stopping" => Ok(ActivationStatus::Stopping),
            "stopped" => Ok(ActivationStatus::Stopped),
            other => Err(format!("unknown activation status: {other}")),
        }
    }
}

/// Restart bookkeeping carried on the entity for an external controller.
/// The engine records nothing here on its own: there is no restart
/// scheduler in this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::OnFailure => write!(f, "on-failure"),
            RestartPolicy::Never => write!(f, "never"),
        }
    }
}

impl std::str::FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(RestartPolicy::Always),
            "on-failure" => Ok(RestartPolicy::OnFailure),
            "never" => Ok(RestartPolicy::Never),
            other => Err(format!("unknown restart policy: {other}")),
        }
    }
}

/// One activation instance as the engine sees it. Entity rows are created
/// and deleted by the surrounding CRUD layer; the engine only transitions
/// `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationInstance {
    pub id: InstanceId,
    pub name: String,
    pub rulebook_id: Uuid,
    pub inventory_id: Uuid,
    pub extra_var_id: Uuid,
    pub execution_environment: String,
    /// Required when `deployment_mode` is `Local`.
    pub working_directory: Option<String>,
    pub deployment_mode: DeploymentMode,
    pub log_id: LogId,
    pub status: ActivationStatus,
    pub restart_policy: RestartPolicy,
    pub restart_count: i32,
    pub restarted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A declared event-input adapter feeding events into a running instance,
/// e.g. `{"type": "websocket", "config": {"port": 10000}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetSource {
    #[serde(rename = "type")]
    pub source_type: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// The already-resolved inputs to `activate`. Entity lookup happens in the
/// surrounding layer; the engine performs no database reads of its own.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub instance_id: InstanceId,
    pub log_id: LogId,
    pub deployment_mode: DeploymentMode,
    /// Image reference (container mode) or runtime tag handed to the
    /// evaluator's environment (local mode).
    pub execution_environment: String,
    pub rulesets: String,
    pub ruleset_sources: Vec<RulesetSource>,
    pub inventory: String,
    pub extra_vars: String,
    pub working_directory: Option<String>,
    /// Host/port a container-with-event-channel dials back to.
    pub host: String,
    pub port: u16,
}
