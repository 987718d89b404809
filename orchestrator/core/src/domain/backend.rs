// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::process::Child;

use crate::domain::activation::LaunchRequest;
use crate::domain::resolver::LaunchStrategy;

/// Lazy, unbounded sequence of raw output bytes from a running handle.
/// Produced once at start time; not restartable.
pub type OutputStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Live reference to a started process or container. Owned exclusively by
/// the registry entry for its instance; never shared across instances.
#[derive(Debug)]
pub enum ExecutionHandle {
    LocalProcess {
        pid: Option<u32>,
        child: Child,
    },
    Container {
        /// Runtime-assigned container id.
        container_id: String,
    },
}

impl ExecutionHandle {
    pub fn describe(&self) -> String {
        match self {
            ExecutionHandle::LocalProcess { pid, .. } => match pid {
                Some(pid) => format!("process pid {pid}"),
                None => "process (exited)".to_string(),
            },
            ExecutionHandle::Container { container_id } => {
                format!("container {container_id}")
            }
        }
    }
}

/// A freshly started handle together with its output stream.
pub struct StartedActivation {
    pub handle: ExecutionHandle,
    pub output: OutputStream,
}

impl std::fmt::Debug for StartedActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartedActivation")
            .field("handle", &self.handle)
            .field("output", &"<stream>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    /// A field required by the chosen mode is missing. Raised before
    /// anything is spawned.
    #[error("invalid activation configuration: {0}")]
    Configuration(String),
    #[error("failed to spawn evaluator process: {0}")]
    SpawnFailed(String),
    /// The container runtime rejected or failed the request (image pull,
    /// daemon error, resource exhaustion).
    #[error("container runtime error: {0}")]
    RuntimeApi(String),
    #[error("failed to stop handle: {0}")]
    StopFailed(String),
}

/// Uniform capability over the local-process and container launch paths.
///
/// `stop` must be safe to call on an already-stopped handle and must make
/// the handle's output stream observe end-of-stream promptly.
#[async_trait]
pub trait ActivationBackend: Send + Sync {
    async fn start(
        &self,
        strategy: LaunchStrategy,
        request: &LaunchRequest,
    ) -> Result<StartedActivation, LaunchError>;

    async fn stop(&self, handle: &mut ExecutionHandle) -> Result<(), LaunchError>;
}
