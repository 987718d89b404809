// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::activation::{ActivationInstance, ActivationStatus, InstanceId, LogId};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Durable, append-only storage for activation output.
///
/// Two policies share one trait: per-line rows (process-backed instances)
/// and a growing chunk-addressed byte object (container-backed instances).
/// Appends are best-effort from the drain task's point of view: a failure
/// is logged there, never fatal.
#[async_trait]
pub trait ActivationLogRepository: Send + Sync {
    /// Append one output line. `line_number` is monotonically increasing
    /// per instance, starting at 0, no gaps.
    async fn append_line(
        &self,
        instance_id: InstanceId,
        line_number: i32,
        text: &str,
    ) -> Result<(), PersistenceError>;

    /// Append one raw chunk to the object log addressed by `log_id`.
    async fn append_chunk(&self, log_id: LogId, chunk: &[u8]) -> Result<(), PersistenceError>;

    /// Read the object log back as chunks, in append order. Boundaries are
    /// arbitrary; readers recover text with the leftover-carrying decoder.
    async fn read_chunks(
        &self,
        log_id: LogId,
    ) -> Result<BoxStream<'static, Result<Bytes, PersistenceError>>, PersistenceError>;
}

/// Entity state shared with the surrounding CRUD layer. The engine only
/// ever transitions `status`; creation and deletion happen outside.
#[async_trait]
pub trait ActivationInstanceRepository: Send + Sync {
    async fn save(&self, instance: &ActivationInstance) -> Result<(), PersistenceError>;

    async fn find(&self, id: InstanceId) -> Result<Option<ActivationInstance>, PersistenceError>;

    async fn update_status(
        &self,
        id: InstanceId,
        status: ActivationStatus,
    ) -> Result<(), PersistenceError>;
}
