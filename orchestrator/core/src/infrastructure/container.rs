// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::domain::activation::LaunchRequest;
use crate::domain::backend::{
    ActivationBackend, ExecutionHandle, LaunchError, OutputStream, StartedActivation,
};
use crate::domain::resolver::LaunchStrategy;
use crate::infrastructure::settings::EngineSettings;

/// Launches the evaluator as a container created from the activation's
/// execution environment (image reference).
///
/// Rulesets, inventory and extra-vars travel in the container environment.
/// The event-channel strategy additionally injects the advertised host and
/// port the container dials back to for inbound events.
pub struct ContainerBackend {
    docker: Docker,
    stop_timeout_secs: i64,
}

impl ContainerBackend {
    pub fn new(settings: &EngineSettings) -> Result<Self, LaunchError> {
        let docker = match &settings.docker_socket {
            Some(path) => Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| {
            LaunchError::RuntimeApi(format!("failed to connect to container runtime: {e}"))
        })?;
        Ok(Self {
            docker,
            stop_timeout_secs: settings.container_stop_timeout_secs,
        })
    }

    /// Verify the container runtime daemon is reachable.
    pub async fn healthcheck(&self) -> Result<(), LaunchError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| LaunchError::RuntimeApi(format!("container runtime unreachable: {e}")))
    }
}

fn build_env(strategy: LaunchStrategy, request: &LaunchRequest) -> Vec<String> {
    let mut env = vec![
        format!("VIGIL_RULESETS={}", request.rulesets),
        format!("VIGIL_INVENTORY={}", request.inventory),
        format!("VIGIL_EXTRA_VARS={}", request.extra_vars),
    ];
    if strategy == LaunchStrategy::ContainerEventChannel {
        env.push(format!("VIGIL_EVENT_HOST={}", request.host));
        env.push(format!("VIGIL_EVENT_PORT={}", request.port));
    }
    env
}

/// Gone-already responses from the daemon: the handle is stopped or
/// removed, which is what the caller wanted.
fn is_already_gone(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304 | 404 | 409,
            ..
        }
    )
}

#[async_trait]
impl ActivationBackend for ContainerBackend {
    async fn start(
        &self,
        strategy: LaunchStrategy,
        request: &LaunchRequest,
    ) -> Result<StartedActivation, LaunchError> {
        let image = request.execution_environment.as_str();
        if image.is_empty() {
            return Err(LaunchError::Configuration(
                "container deployment requires an execution environment image".to_string(),
            ));
        }

        let options = CreateContainerOptions {
            name: format!("vigil-activation-{}", request.instance_id),
            platform: None,
        };
        let config = Config {
            image: Some(image.to_string()),
            env: Some(build_env(strategy, request)),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| LaunchError::RuntimeApi(e.to_string()))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| LaunchError::RuntimeApi(format!("failed to start container: {e}")))?;

        // Combined stdout/stderr as one followed stream; it observes
        // end-of-stream when the container stops.
        let logs = self.docker.logs(
            &created.id,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        let output: OutputStream = Box::pin(logs.map(|item| {
            item.map(|log| log.into_bytes())
                .map_err(std::io::Error::other)
        }));

        info!(
            instance_id = %request.instance_id,
            container_id = %created.id,
            image,
            %strategy,
            "activation container started"
        );
        Ok(StartedActivation {
            handle: ExecutionHandle::Container {
                container_id: created.id,
            },
            output,
        })
    }

    async fn stop(&self, handle: &mut ExecutionHandle) -> Result<(), LaunchError> {
        let ExecutionHandle::Container { container_id } = handle else {
            return Err(LaunchError::StopFailed(
                "container backend cannot stop a process handle".to_string(),
            ));
        };

        match self
            .docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: self.stop_timeout_secs,
                }),
            )
            .await
        {
            Ok(()) => debug!(%container_id, "container stopped"),
            Err(err) if is_already_gone(&err) => {
                debug!(%container_id, "container already stopped")
            }
            Err(err) => {
                return Err(LaunchError::StopFailed(format!(
                    "failed to stop container {container_id}: {err}"
                )))
            }
        }

        match self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => debug!(%container_id, "container removed"),
            Err(err) if is_already_gone(&err) => {
                debug!(%container_id, "container already removed")
            }
            Err(err) => warn!(%container_id, "failed to remove container: {err}"),
        }
        Ok(())
    }
}
