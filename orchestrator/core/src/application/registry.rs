// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::activation::InstanceId;
use crate::domain::backend::ExecutionHandle;

/// One live activation: its execution handle and, once spawned, the drain
/// task supervising its output.
#[derive(Debug)]
pub struct RegistryEntry {
    pub handle: ExecutionHandle,
    pub drain: Option<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// A live entry already exists for this id. The rejected handle is
    /// handed back so the caller can stop it instead of leaking it.
    #[error("activation instance {id} is already active")]
    AlreadyActive {
        id: InstanceId,
        rejected: ExecutionHandle,
    },
}

/// Process-wide table of live activation handles.
///
/// Instance-owned and injectable, not a language-level global, so tests can
/// run isolated orchestrators in parallel. All mutations go through one
/// lock; check-then-insert is atomic under it.
#[derive(Debug, Default)]
pub struct ActivationRegistry {
    entries: Mutex<HashMap<InstanceId, RegistryEntry>>,
}

impl ActivationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly started handle. Fails if an entry already exists,
    /// returning the rejected handle to the caller.
    pub async fn register(
        &self,
        id: InstanceId,
        handle: ExecutionHandle,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&id) {
            return Err(RegistryError::AlreadyActive {
                id,
                rejected: handle,
            });
        }
        entries.insert(id, RegistryEntry { handle, drain: None });
        Ok(())
    }

    /// Attach the drain task supervising this entry. Returns false if the
    /// entry is already gone (the drain finished and cleaned up first).
    pub async fn attach_drain(&self, id: InstanceId, drain: JoinHandle<()>) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.drain = Some(drain);
                true
            }
            None => {
                debug!(%id, "drain task outlived its registry entry");
                false
            }
        }
    }

    /// Remove and return the entry, if any. Idempotent: deactivation and
    /// natural-exit cleanup may both call this for the same id.
    pub async fn remove(&self, id: InstanceId) -> Option<RegistryEntry> {
        self.entries.lock().await.remove(&id)
    }

    pub async fn is_active(&self, id: InstanceId) -> bool {
        self.entries.lock().await.contains_key(&id)
    }

    pub async fn active_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_handle(id: &str) -> ExecutionHandle {
        ExecutionHandle::Container {
            container_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn register_then_lookup_then_remove() {
        let registry = ActivationRegistry::new();
        let id = InstanceId::new();

        registry.register(id, container_handle("c1")).await.unwrap();
        assert!(registry.is_active(id).await);
        assert_eq!(registry.active_count().await, 1);

        let entry = registry.remove(id).await.unwrap();
        assert!(matches!(entry.handle, ExecutionHandle::Container { .. }));
        assert!(!registry.is_active(id).await);
    }

    #[tokio::test]
    async fn duplicate_register_returns_rejected_handle() {
        let registry = ActivationRegistry::new();
        let id = InstanceId::new();

        registry.register(id, container_handle("first")).await.unwrap();
        let err = registry
            .register(id, container_handle("second"))
            .await
            .unwrap_err();

        let RegistryError::AlreadyActive { id: err_id, rejected } = err;
        assert_eq!(err_id, id);
        match rejected {
            ExecutionHandle::Container { container_id } => assert_eq!(container_id, "second"),
            other => panic!("unexpected handle: {other:?}"),
        }
        // The first handle is untouched.
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = ActivationRegistry::new();
        let id = InstanceId::new();

        registry.register(id, container_handle("c1")).await.unwrap();
        assert!(registry.remove(id).await.is_some());
        assert!(registry.remove(id).await.is_none());
        assert!(registry.remove(InstanceId::new()).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_registers_for_one_id_have_exactly_one_winner() {
        let registry = std::sync::Arc::new(ActivationRegistry::new());
        let id = InstanceId::new();

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .register(id, container_handle(&format!("c{n}")))
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn attach_drain_after_removal_reports_missing_entry() {
        let registry = ActivationRegistry::new();
        let id = InstanceId::new();

        registry.register(id, container_handle("c1")).await.unwrap();
        registry.remove(id).await;

        let drain = tokio::spawn(async {});
        assert!(!registry.attach_drain(id, drain).await);
    }
}
