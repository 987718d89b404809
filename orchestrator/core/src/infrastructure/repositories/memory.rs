// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;

use crate::domain::activation::{ActivationInstance, ActivationStatus, InstanceId, LogId};
use crate::domain::repository::{
    ActivationInstanceRepository, ActivationLogRepository, PersistenceError,
};

/// In-memory storage: the unit-test double and the backing store for CLI
/// runs without a database. Implements the same contracts as the Postgres
/// store.
#[derive(Debug, Default)]
pub struct InMemoryActivationStore {
    lines: Mutex<HashMap<InstanceId, Vec<(i32, String)>>>,
    chunks: Mutex<HashMap<LogId, Vec<Bytes>>>,
    instances: Mutex<HashMap<InstanceId, ActivationInstance>>,
    status_history: Mutex<HashMap<InstanceId, Vec<ActivationStatus>>>,
}

impl InMemoryActivationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored `(line_number, text)` rows for one instance, in append order.
    pub fn lines(&self, instance_id: InstanceId) -> Vec<(i32, String)> {
        self.lines
            .lock()
            .get(&instance_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The full object log as one contiguous byte vector.
    pub fn object_bytes(&self, log_id: LogId) -> Vec<u8> {
        self.chunks
            .lock()
            .get(&log_id)
            .map(|chunks| chunks.iter().flat_map(|c| c.iter().copied()).collect())
            .unwrap_or_default()
    }

    /// Every status this instance moved through, in order.
    pub fn status_history(&self, instance_id: InstanceId) -> Vec<ActivationStatus> {
        self.status_history
            .lock()
            .get(&instance_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActivationLogRepository for InMemoryActivationStore {
    async fn append_line(
        &self,
        instance_id: InstanceId,
        line_number: i32,
        text: &str,
    ) -> Result<(), PersistenceError> {
        self.lines
            .lock()
            .entry(instance_id)
            .or_default()
            .push((line_number, text.to_string()));
        Ok(())
    }

    async fn append_chunk(&self, log_id: LogId, chunk: &[u8]) -> Result<(), PersistenceError> {
        self.chunks
            .lock()
            .entry(log_id)
            .or_default()
            .push(Bytes::copy_from_slice(chunk));
        Ok(())
    }

    async fn read_chunks(
        &self,
        log_id: LogId,
    ) -> Result<BoxStream<'static, Result<Bytes, PersistenceError>>, PersistenceError> {
        let chunks = self
            .chunks
            .lock()
            .get(&log_id)
            .cloned()
            .unwrap_or_default();
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}

#[async_trait]
impl ActivationInstanceRepository for InMemoryActivationStore {
    async fn save(&self, instance: &ActivationInstance) -> Result<(), PersistenceError> {
        self.instances
            .lock()
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn find(
        &self,
        id: InstanceId,
    ) -> Result<Option<ActivationInstance>, PersistenceError> {
        Ok(self.instances.lock().get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: InstanceId,
        status: ActivationStatus,
    ) -> Result<(), PersistenceError> {
        self.status_history.lock().entry(id).or_default().push(status);
        if let Some(instance) = self.instances.lock().get_mut(&id) {
            instance.status = status;
            instance.modified_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::activation::{DeploymentMode, RestartPolicy};
    use futures::StreamExt;
    use uuid::Uuid;

    fn instance() -> ActivationInstance {
        let now = Utc::now();
        ActivationInstance {
            id: InstanceId::new(),
            name: "demo".to_string(),
            rulebook_id: Uuid::new_v4(),
            inventory_id: Uuid::new_v4(),
            extra_var_id: Uuid::new_v4(),
            execution_environment: "quay.io/vigil/evaluator:latest".to_string(),
            working_directory: None,
            deployment_mode: DeploymentMode::Container,
            log_id: LogId::new(),
            status: ActivationStatus::Pending,
            restart_policy: RestartPolicy::OnFailure,
            restart_count: 0,
            restarted_at: None,
            created_at: now,
            modified_at: now,
        }
    }

    #[tokio::test]
    async fn chunks_read_back_in_append_order() {
        let store = InMemoryActivationStore::new();
        let log_id = LogId::new();
        store.append_chunk(log_id, b"first ").await.unwrap();
        store.append_chunk(log_id, b"second").await.unwrap();

        let mut chunks = store.read_chunks(log_id).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = chunks.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, b"first second");
        assert_eq!(store.object_bytes(log_id), b"first second");
    }

    #[tokio::test]
    async fn reading_an_unknown_log_yields_an_empty_stream() {
        let store = InMemoryActivationStore::new();
        let mut chunks = store.read_chunks(LogId::new()).await.unwrap();
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn save_find_and_status_update_round_trip() {
        let store = InMemoryActivationStore::new();
        let instance = instance();
        let id = instance.id;

        store.save(&instance).await.unwrap();
        store
            .update_status(id, ActivationStatus::Running)
            .await
            .unwrap();

        let found = store.find(id).await.unwrap().unwrap();
        assert_eq!(found.status, ActivationStatus::Running);
        assert_eq!(found.name, "demo");
        assert_eq!(store.status_history(id), vec![ActivationStatus::Running]);

        assert!(store.find(InstanceId::new()).await.unwrap().is_none());
    }
}
