// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The orchestrator: composes resolver, backends, registry, log sink and
//! broadcast hub into `activate` / `deactivate` / `replay_log`.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::registry::{ActivationRegistry, RegistryError};
use crate::application::supervisor;
use crate::domain::activation::{
    ActivationStatus, DeploymentMode, InstanceId, LaunchRequest, LogId,
};
use crate::domain::backend::{ActivationBackend, ExecutionHandle, LaunchError, StartedActivation};
use crate::domain::codec::decode_chunk;
use crate::domain::repository::{
    ActivationInstanceRepository, ActivationLogRepository, PersistenceError,
};
use crate::domain::resolver::{resolve, LaunchStrategy};
use crate::infrastructure::broadcast::{BroadcastHub, OutputFrame};

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("activation instance {0} is already active")]
    AlreadyActive(InstanceId),
}

/// Coordinates activation lifecycles.
///
/// `activate` returns once the handle is started and registered; output
/// draining continues in a detached task per instance. Instance status
/// moves `Starting → Running → Stopping → Stopped`, with `Starting →
/// Stopped` on launch failure and `Running → Stopped` on natural exit.
pub struct ActivationOrchestrator {
    process_backend: Arc<dyn ActivationBackend>,
    container_backend: Arc<dyn ActivationBackend>,
    registry: ActivationRegistry,
    hub: Arc<BroadcastHub>,
    logs: Arc<dyn ActivationLogRepository>,
    instances: Arc<dyn ActivationInstanceRepository>,
}

impl ActivationOrchestrator {
    pub fn new(
        process_backend: Arc<dyn ActivationBackend>,
        container_backend: Arc<dyn ActivationBackend>,
        hub: Arc<BroadcastHub>,
        logs: Arc<dyn ActivationLogRepository>,
        instances: Arc<dyn ActivationInstanceRepository>,
    ) -> Self {
        Self {
            process_backend,
            container_backend,
            registry: ActivationRegistry::new(),
            hub,
            logs,
            instances,
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Launch an activation instance. No retry at this layer: launch
    /// errors are surfaced as-is and the instance is marked stopped.
    pub async fn activate(
        self: &Arc<Self>,
        request: LaunchRequest,
    ) -> Result<LaunchStrategy, ActivationError> {
        let instance_id = request.instance_id;

        if request.deployment_mode == DeploymentMode::Local
            && request
                .working_directory
                .as_deref()
                .filter(|wd| !wd.is_empty())
                .is_none()
        {
            return Err(LaunchError::Configuration(
                "local deployment requires a working directory".to_string(),
            )
            .into());
        }

        let strategy = resolve(request.deployment_mode, &request.ruleset_sources);
        info!(%instance_id, %strategy, "activating instance");
        self.set_status(instance_id, ActivationStatus::Starting).await;

        let backend = self.backend_for(strategy);
        let StartedActivation { handle, output } = match backend.start(strategy, &request).await {
            Ok(started) => started,
            Err(err) => {
                warn!(%instance_id, "launch failed: {err}");
                self.set_status(instance_id, ActivationStatus::Stopped).await;
                return Err(err.into());
            }
        };

        if let Err(RegistryError::AlreadyActive { id, mut rejected }) =
            self.registry.register(instance_id, handle).await
        {
            // Stop the just-started duplicate so it cannot leak.
            warn!(%id, handle = %rejected.describe(), "duplicate activation; stopping new handle");
            if let Err(stop_err) = self.stop_handle(&mut rejected).await {
                warn!(%id, "failed to stop duplicate handle: {stop_err}");
            }
            // The original activation is still live; its status stands.
            self.set_status(id, ActivationStatus::Running).await;
            return Err(ActivationError::AlreadyActive(id));
        }

        self.set_status(instance_id, ActivationStatus::Running).await;

        let log_id = request.log_id;
        let this = Arc::clone(self);
        let drain = tokio::spawn(async move {
            match strategy {
                LaunchStrategy::LocalProcess => {
                    supervisor::drain_row_log(
                        instance_id,
                        output,
                        this.logs.clone(),
                        this.hub.clone(),
                    )
                    .await;
                }
                LaunchStrategy::Container | LaunchStrategy::ContainerEventChannel => {
                    supervisor::drain_object_log(
                        instance_id,
                        log_id,
                        output,
                        this.logs.clone(),
                        this.hub.clone(),
                    )
                    .await;
                }
            }
            this.finish_drain(instance_id).await;
        });
        self.registry.attach_drain(instance_id, drain).await;

        Ok(strategy)
    }

    /// Stop an activation instance. Idempotent: an id with no live entry
    /// succeeds as a no-op, and cleanup cannot race the drain task's own
    /// teardown because registry removal is single-winner.
    pub async fn deactivate(&self, instance_id: InstanceId) -> Result<(), ActivationError> {
        let Some(mut entry) = self.registry.remove(instance_id).await else {
            debug!(%instance_id, "deactivate: no live entry");
            return Ok(());
        };

        self.set_status(instance_id, ActivationStatus::Stopping).await;
        info!(%instance_id, handle = %entry.handle.describe(), "deactivating instance");

        if let Err(err) = self.stop_handle(&mut entry.handle).await {
            warn!(%instance_id, "stop failed: {err}");
        }
        // The stop above forces end-of-stream, so the drain task finishes
        // even if it was blocked on a read.
        if let Some(drain) = entry.drain.take() {
            if let Err(err) = drain.await {
                warn!(%instance_id, "drain task panicked: {err}");
            }
        }
        self.set_status(instance_id, ActivationStatus::Stopped).await;
        Ok(())
    }

    pub async fn is_active(&self, instance_id: InstanceId) -> bool {
        self.registry.is_active(instance_id).await
    }

    /// Replay a stored object log: decode its chunks in order with
    /// leftover carry, republish each piece on the instance topic, and
    /// return the full recovered text.
    pub async fn replay_log(
        &self,
        instance_id: InstanceId,
        log_id: LogId,
    ) -> Result<String, PersistenceError> {
        let topic = instance_id.topic();
        let mut chunks = self.logs.read_chunks(log_id).await?;
        let mut leftover = Vec::new();
        let mut recovered = String::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let text = decode_chunk(&mut leftover, &chunk);
            if !text.is_empty() {
                self.hub.publish(&topic, OutputFrame::stdout(text.clone()));
                recovered.push_str(&text);
            }
        }
        if !leftover.is_empty() {
            let tail = String::from_utf8_lossy(&leftover).into_owned();
            self.hub.publish(&topic, OutputFrame::stdout(tail.clone()));
            recovered.push_str(&tail);
        }
        Ok(recovered)
    }

    fn backend_for(&self, strategy: LaunchStrategy) -> &Arc<dyn ActivationBackend> {
        match strategy {
            LaunchStrategy::LocalProcess => &self.process_backend,
            LaunchStrategy::Container | LaunchStrategy::ContainerEventChannel => {
                &self.container_backend
            }
        }
    }

    async fn stop_handle(&self, handle: &mut ExecutionHandle) -> Result<(), LaunchError> {
        match handle {
            ExecutionHandle::LocalProcess { .. } => self.process_backend.stop(handle).await,
            ExecutionHandle::Container { .. } => self.container_backend.stop(handle).await,
        }
    }

    /// Natural end-of-stream cleanup, run by the drain task itself. A
    /// concurrent `deactivate` may have removed the entry first; removal
    /// is single-winner, so cleanup happens exactly once.
    async fn finish_drain(self: &Arc<Self>, instance_id: InstanceId) {
        if let Some(mut entry) = self.registry.remove(instance_id).await {
            if let Err(err) = self.stop_handle(&mut entry.handle).await {
                warn!(%instance_id, "failed to reap handle: {err}");
            }
            self.set_status(instance_id, ActivationStatus::Stopped).await;
            info!(%instance_id, "activation instance exited");
        }
    }

    /// Status recording is best-effort: a failed write is logged, never
    /// fatal to the lifecycle it describes.
    async fn set_status(&self, instance_id: InstanceId, status: ActivationStatus) {
        if let Err(err) = self.instances.update_status(instance_id, status).await {
            warn!(%instance_id, %status, "failed to record status: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::activation::RulesetSource;
    use crate::domain::backend::OutputStream;
    use crate::infrastructure::repositories::memory::InMemoryActivationStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Backend whose output streams are fed by test-held channels, so the
    /// tests control end-of-stream. `stop` drops the sender, which makes
    /// the stream observe EOF, the same contract real backends honor.
    #[derive(Default)]
    struct MockBackend {
        started: Mutex<Vec<(InstanceId, LaunchStrategy)>>,
        stopped: Mutex<Vec<String>>,
        senders: Mutex<HashMap<String, mpsc::UnboundedSender<std::io::Result<Bytes>>>>,
        fail_next: Mutex<Option<LaunchError>>,
        counter: Mutex<u32>,
    }

    impl MockBackend {
        fn send(&self, handle_id: &str, bytes: &[u8]) {
            let senders = self.senders.lock();
            senders[handle_id]
                .send(Ok(Bytes::copy_from_slice(bytes)))
                .unwrap();
        }

        fn close(&self, handle_id: &str) {
            self.senders.lock().remove(handle_id);
        }

        fn started_count(&self) -> usize {
            self.started.lock().len()
        }

        fn stopped_handles(&self) -> Vec<String> {
            self.stopped.lock().clone()
        }
    }

    #[async_trait]
    impl ActivationBackend for MockBackend {
        async fn start(
            &self,
            strategy: LaunchStrategy,
            request: &LaunchRequest,
        ) -> Result<StartedActivation, LaunchError> {
            if let Some(err) = self.fail_next.lock().take() {
                return Err(err);
            }
            let handle_id = {
                let mut counter = self.counter.lock();
                *counter += 1;
                format!("mock-{}", *counter)
            };
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().insert(handle_id.clone(), tx);
            self.started.lock().push((request.instance_id, strategy));

            let output: OutputStream = Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }));
            Ok(StartedActivation {
                handle: ExecutionHandle::Container {
                    container_id: handle_id,
                },
                output,
            })
        }

        async fn stop(&self, handle: &mut ExecutionHandle) -> Result<(), LaunchError> {
            let ExecutionHandle::Container { container_id } = handle else {
                return Err(LaunchError::StopFailed("unexpected handle".into()));
            };
            self.stopped.lock().push(container_id.clone());
            self.senders.lock().remove(container_id);
            Ok(())
        }
    }

    struct Harness {
        orchestrator: Arc<ActivationOrchestrator>,
        backend: Arc<MockBackend>,
        store: Arc<InMemoryActivationStore>,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MockBackend::default());
        let store = Arc::new(InMemoryActivationStore::new());
        let orchestrator = Arc::new(ActivationOrchestrator::new(
            backend.clone(),
            backend.clone(),
            Arc::new(BroadcastHub::with_default_capacity()),
            store.clone(),
            store.clone(),
        ));
        Harness {
            orchestrator,
            backend,
            store,
        }
    }

    fn request(mode: DeploymentMode, sources: Vec<RulesetSource>) -> LaunchRequest {
        LaunchRequest {
            instance_id: InstanceId::new(),
            log_id: LogId::new(),
            deployment_mode: mode,
            execution_environment: "quay.io/vigil/evaluator:latest".to_string(),
            rulesets: "- name: demo\n".to_string(),
            ruleset_sources: sources,
            inventory: "all: {}\n".to_string(),
            extra_vars: "{}\n".to_string(),
            working_directory: Some("/tmp".to_string()),
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }

    async fn wait_until_inactive(orchestrator: &Arc<ActivationOrchestrator>, id: InstanceId) {
        for _ in 0..200 {
            if !orchestrator.is_active(id).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("instance {id} never became inactive");
    }

    #[tokio::test]
    async fn activate_drains_until_natural_exit() {
        let h = harness();
        let req = request(DeploymentMode::Local, vec![]);
        let id = req.instance_id;

        let strategy = h.orchestrator.activate(req).await.unwrap();
        assert_eq!(strategy, LaunchStrategy::LocalProcess);
        assert!(h.orchestrator.is_active(id).await);

        h.backend.send("mock-1", b"first\nsecond\n");
        h.backend.close("mock-1");
        wait_until_inactive(&h.orchestrator, id).await;

        assert_eq!(
            h.store.lines(id),
            vec![(0, "first".to_string()), (1, "second".to_string())]
        );
        assert_eq!(
            h.store.status_history(id),
            vec![
                ActivationStatus::Starting,
                ActivationStatus::Running,
                ActivationStatus::Stopped,
            ]
        );
        // Natural exit still reaps the handle.
        assert_eq!(h.backend.stopped_handles(), vec!["mock-1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_activate_fails_and_stops_new_handle() {
        let h = harness();
        let req = request(DeploymentMode::Container, vec![]);
        let id = req.instance_id;

        h.orchestrator.activate(req.clone()).await.unwrap();
        let err = h.orchestrator.activate(req).await.unwrap_err();
        assert!(matches!(err, ActivationError::AlreadyActive(dup) if dup == id));

        // Both launches started a handle; only the duplicate was stopped,
        // leaving exactly one live.
        assert_eq!(h.backend.started_count(), 2);
        assert_eq!(h.backend.stopped_handles(), vec!["mock-2".to_string()]);
        assert!(h.orchestrator.is_active(id).await);

        h.orchestrator.deactivate(id).await.unwrap();
    }

    #[tokio::test]
    async fn local_mode_without_working_directory_never_spawns() {
        let h = harness();
        let mut req = request(DeploymentMode::Local, vec![]);
        req.working_directory = None;

        let err = h.orchestrator.activate(req).await.unwrap_err();
        assert!(matches!(
            err,
            ActivationError::Launch(LaunchError::Configuration(_))
        ));
        assert_eq!(h.backend.started_count(), 0);

        let mut req = request(DeploymentMode::Local, vec![]);
        req.working_directory = Some(String::new());
        let err = h.orchestrator.activate(req).await.unwrap_err();
        assert!(matches!(
            err,
            ActivationError::Launch(LaunchError::Configuration(_))
        ));
        assert_eq!(h.backend.started_count(), 0);
    }

    #[tokio::test]
    async fn launch_failure_marks_instance_stopped() {
        let h = harness();
        *h.backend.fail_next.lock() = Some(LaunchError::RuntimeApi("image pull failed".into()));
        let req = request(DeploymentMode::Container, vec![]);
        let id = req.instance_id;

        let err = h.orchestrator.activate(req).await.unwrap_err();
        assert!(matches!(
            err,
            ActivationError::Launch(LaunchError::RuntimeApi(_))
        ));
        assert_eq!(
            h.store.status_history(id),
            vec![ActivationStatus::Starting, ActivationStatus::Stopped]
        );
        assert!(!h.orchestrator.is_active(id).await);
    }

    #[tokio::test]
    async fn deactivate_unknown_instance_is_a_no_op() {
        let h = harness();
        h.orchestrator.deactivate(InstanceId::new()).await.unwrap();
        assert_eq!(h.backend.stopped_handles().len(), 0);
    }

    #[tokio::test]
    async fn deactivate_unblocks_a_drain_waiting_on_output() {
        let h = harness();
        let req = request(DeploymentMode::Container, vec![]);
        let id = req.instance_id;

        h.orchestrator.activate(req).await.unwrap();
        // No output is ever produced; the drain is parked on its read.
        h.orchestrator.deactivate(id).await.unwrap();

        assert!(!h.orchestrator.is_active(id).await);
        assert_eq!(h.backend.stopped_handles(), vec!["mock-1".to_string()]);
        assert_eq!(
            h.store.status_history(id),
            vec![
                ActivationStatus::Starting,
                ActivationStatus::Running,
                ActivationStatus::Stopping,
                ActivationStatus::Stopped,
            ]
        );
    }

    #[tokio::test]
    async fn container_strategy_uses_object_log() {
        let h = harness();
        let req = request(
            DeploymentMode::Container,
            vec![RulesetSource {
                source_type: Some("websocket".to_string()),
                config: serde_json::json!({"port": 10000}),
            }],
        );
        let id = req.instance_id;
        let log_id = req.log_id;

        let strategy = h.orchestrator.activate(req).await.unwrap();
        assert_eq!(strategy, LaunchStrategy::ContainerEventChannel);

        h.backend.send("mock-1", "container says hi\n".as_bytes());
        h.backend.close("mock-1");
        wait_until_inactive(&h.orchestrator, id).await;

        assert_eq!(h.store.object_bytes(log_id), b"container says hi\n".to_vec());
        assert!(h.store.lines(id).is_empty());
    }

    #[tokio::test]
    async fn replay_reconstructs_text_split_across_chunks() {
        let h = harness();
        let id = InstanceId::new();
        let log_id = LogId::new();

        // Store a log whose chunk boundary falls inside "ü".
        let bytes = "überwachung läuft\n".as_bytes();
        h.store.append_chunk(log_id, &bytes[..1]).await.unwrap();
        h.store.append_chunk(log_id, &bytes[1..]).await.unwrap();

        let mut receiver = h.orchestrator.hub().subscribe(&id.topic());
        let recovered = h.orchestrator.replay_log(id, log_id).await.unwrap();
        assert_eq!(recovered, "überwachung läuft\n");

        let mut republished = String::new();
        while let Ok(frame) = receiver.try_recv() {
            republished.push_str(frame.text());
        }
        assert_eq!(republished, recovered);
    }
}
