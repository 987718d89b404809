// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::stream;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use crate::domain::activation::LaunchRequest;
use crate::domain::backend::{
    ActivationBackend, ExecutionHandle, LaunchError, OutputStream, StartedActivation,
};
use crate::domain::resolver::LaunchStrategy;
use crate::infrastructure::settings::EngineSettings;

/// Launches the evaluator as a local operating-system process.
///
/// Rulesets, inventory and extra-vars are materialized as files inside the
/// activation's working directory and handed to the evaluator as
/// arguments; the execution-environment reference rides in its
/// environment.
pub struct ProcessBackend {
    evaluator_bin: String,
}

impl ProcessBackend {
    pub fn new(evaluator_bin: impl Into<String>) -> Self {
        Self {
            evaluator_bin: evaluator_bin.into(),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.evaluator_bin.clone())
    }

    async fn materialize_payloads(
        &self,
        workdir: &Path,
        request: &LaunchRequest,
    ) -> Result<(PathBuf, PathBuf, PathBuf), LaunchError> {
        let dir = workdir.join(format!("activation-{}", request.instance_id));
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            LaunchError::SpawnFailed(format!(
                "failed to prepare working directory {}: {e}",
                dir.display()
            ))
        })?;

        let rulebook = dir.join("rulebook.yml");
        let inventory = dir.join("inventory.yml");
        let vars = dir.join("vars.yml");
        for (path, contents) in [
            (&rulebook, &request.rulesets),
            (&inventory, &request.inventory),
            (&vars, &request.extra_vars),
        ] {
            tokio::fs::write(path, contents).await.map_err(|e| {
                LaunchError::SpawnFailed(format!("failed to write {}: {e}", path.display()))
            })?;
        }
        Ok((rulebook, inventory, vars))
    }
}

#[async_trait]
impl ActivationBackend for ProcessBackend {
    async fn start(
        &self,
        _strategy: LaunchStrategy,
        request: &LaunchRequest,
    ) -> Result<StartedActivation, LaunchError> {
        let workdir = request
            .working_directory
            .as_deref()
            .filter(|wd| !wd.is_empty())
            .ok_or_else(|| {
                LaunchError::Configuration(
                    "local deployment requires a working directory".to_string(),
                )
            })?;
        let workdir = Path::new(workdir);

        let (rulebook, inventory, vars) = self.materialize_payloads(workdir, request).await?;

        let mut child = Command::new(&self.evaluator_bin)
            .arg("--rulebook")
            .arg(&rulebook)
            .arg("--inventory")
            .arg(&inventory)
            .arg("--vars")
            .arg(&vars)
            .env(
                "VIGIL_EXECUTION_ENVIRONMENT",
                &request.execution_environment,
            )
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(bin = %self.evaluator_bin, "failed to spawn evaluator: {e}");
                LaunchError::SpawnFailed(e.to_string())
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::SpawnFailed("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LaunchError::SpawnFailed("stderr was not captured".to_string()))?;

        // Both pipes merged into one chunk stream; interleaving across the
        // two is best-effort, order within each pipe is preserved.
        let output: OutputStream = Box::pin(stream::select(
            ReaderStream::new(stdout),
            ReaderStream::new(stderr),
        ));

        let pid = child.id();
        info!(instance_id = %request.instance_id, pid, "evaluator process started");
        Ok(StartedActivation {
            handle: ExecutionHandle::LocalProcess { pid, child },
            output,
        })
    }

    async fn stop(&self, handle: &mut ExecutionHandle) -> Result<(), LaunchError> {
        let ExecutionHandle::LocalProcess { pid, child } = handle else {
            return Err(LaunchError::StopFailed(
                "process backend cannot stop a container handle".to_string(),
            ));
        };

        // Killing an already-exited process is a no-op; wait() then just
        // reaps it.
        if let Err(err) = child.start_kill() {
            debug!("kill skipped: {err}");
        }
        match child.wait().await {
            Ok(status) => debug!(?pid, %status, "evaluator process reaped"),
            Err(err) => {
                return Err(LaunchError::StopFailed(format!(
                    "failed to reap evaluator process: {err}"
                )))
            }
        }
        *pid = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::activation::{DeploymentMode, InstanceId, LogId};
    use futures::StreamExt;

    fn request(working_directory: Option<String>) -> LaunchRequest {
        LaunchRequest {
            instance_id: InstanceId::new(),
            log_id: LogId::new(),
            deployment_mode: DeploymentMode::Local,
            execution_environment: "local".to_string(),
            rulesets: "- name: demo\n".to_string(),
            ruleset_sources: vec![],
            inventory: "all: {}\n".to_string(),
            extra_vars: "{}\n".to_string(),
            working_directory,
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }

    #[tokio::test]
    async fn missing_working_directory_is_rejected_before_spawn() {
        let backend = ProcessBackend::new("definitely-not-a-real-binary");
        let err = backend
            .start(LaunchStrategy::LocalProcess, &request(None))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Configuration(_)));
    }

    #[tokio::test]
    async fn unknown_evaluator_binary_fails_launch() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new("vigil-eval-does-not-exist");
        let err = backend
            .start(
                LaunchStrategy::LocalProcess,
                &request(Some(dir.path().to_string_lossy().into_owned())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn spawned_process_streams_output_until_exit() {
        let dir = tempfile::tempdir().unwrap();
        // `echo` prints its arguments and exits: a one-shot evaluator.
        let backend = ProcessBackend::new("echo");
        let started = backend
            .start(
                LaunchStrategy::LocalProcess,
                &request(Some(dir.path().to_string_lossy().into_owned())),
            )
            .await
            .unwrap();

        let StartedActivation { mut handle, output } = started;
        let chunks: Vec<_> = output.collect().await;
        let text: String = chunks
            .into_iter()
            .map(|c| String::from_utf8_lossy(&c.unwrap()).into_owned())
            .collect();
        assert!(text.contains("--rulebook"));
        assert!(text.contains("rulebook.yml"));

        backend.stop(&mut handle).await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_on_an_exited_process() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new("echo");
        let StartedActivation { mut handle, output } = backend
            .start(
                LaunchStrategy::LocalProcess,
                &request(Some(dir.path().to_string_lossy().into_owned())),
            )
            .await
            .unwrap();

        // Let the process finish, then stop twice.
        let _ = output.collect::<Vec<_>>().await;
        backend.stop(&mut handle).await.unwrap();
        backend.stop(&mut handle).await.unwrap();
        match handle {
            ExecutionHandle::LocalProcess { pid, .. } => assert!(pid.is_none()),
            other => panic!("unexpected handle: {other:?}"),
        }
    }

    #[tokio::test]
    async fn payload_files_land_in_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new("echo");
        let req = request(Some(dir.path().to_string_lossy().into_owned()));
        let StartedActivation { mut handle, output } = backend
            .start(LaunchStrategy::LocalProcess, &req)
            .await
            .unwrap();
        let _ = output.collect::<Vec<_>>().await;
        backend.stop(&mut handle).await.unwrap();

        let activation_dir = dir
            .path()
            .join(format!("activation-{}", req.instance_id));
        let rulebook = std::fs::read_to_string(activation_dir.join("rulebook.yml")).unwrap();
        assert_eq!(rulebook, "- name: demo\n");
    }
}
