// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Engine configuration, loadable from a YAML file with environment
/// overrides. Every field has a default so a bare `EngineSettings::default()`
/// is a working development setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Evaluator binary spawned for local-mode activations.
    #[serde(default = "default_evaluator_bin")]
    pub evaluator_bin: String,

    /// Explicit Docker socket path; auto-detect when unset.
    #[serde(default)]
    pub docker_socket: Option<String>,

    /// Host advertised to containers that dial back for inbound events.
    #[serde(default = "default_server_host")]
    pub server_host: String,

    /// Port advertised alongside `server_host`.
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Postgres connection string; in-memory storage when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Frames a slow observer may lag before old ones are dropped.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Grace period before a container stop escalates to a kill.
    #[serde(default = "default_container_stop_timeout")]
    pub container_stop_timeout_secs: i64,
}

fn default_evaluator_bin() -> String {
    "vigil-eval".to_string()
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_broadcast_capacity() -> usize {
    1000
}

fn default_container_stop_timeout() -> i64 {
    10
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            evaluator_bin: default_evaluator_bin(),
            docker_socket: None,
            server_host: default_server_host(),
            server_port: default_server_port(),
            database_url: None,
            broadcast_capacity: default_broadcast_capacity(),
            container_stop_timeout_secs: default_container_stop_timeout(),
        }
    }
}

impl EngineSettings {
    /// Load settings: file (when given), then `VIGIL_*` environment
    /// overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("VIGIL_EVALUATOR_BIN") {
            self.evaluator_bin = value;
        }
        if let Ok(value) = std::env::var("VIGIL_DOCKER_SOCKET") {
            self.docker_socket = Some(value);
        }
        if let Ok(value) = std::env::var("VIGIL_SERVER_HOST") {
            self.server_host = value;
        }
        if let Ok(value) = std::env::var("VIGIL_SERVER_PORT") {
            if let Ok(port) = value.parse() {
                self.server_port = port;
            }
        }
        if let Ok(value) = std::env::var("VIGIL_DATABASE_URL") {
            self.database_url = Some(value);
        }
    }
}
