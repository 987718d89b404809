// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::activation::{
    ActivationInstance, ActivationStatus, InstanceId, LogId,
};
use crate::domain::repository::{
    ActivationInstanceRepository, ActivationLogRepository, PersistenceError,
};

/// Postgres-backed activation storage.
///
/// Row logs go to `activation_instance_logs`; object logs are an ordered
/// chunk sequence in `activation_instance_log_chunks` (bigserial order is
/// append order, chunk boundaries stay arbitrary).
pub struct PostgresActivationStore {
    pool: PgPool,
}

impl PostgresActivationStore {
    pub fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Apply the storage DDL. Idempotent.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activation_instances (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                rulebook_id UUID NOT NULL,
                inventory_id UUID NOT NULL,
                extra_var_id UUID NOT NULL,
                execution_environment TEXT NOT NULL,
                working_directory TEXT,
                deployment_mode TEXT NOT NULL,
                log_id UUID NOT NULL,
                status TEXT NOT NULL,
                restart_policy TEXT NOT NULL,
                restart_count INT NOT NULL DEFAULT 0,
                restarted_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                modified_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activation_instance_logs (
                id BIGSERIAL PRIMARY KEY,
                activation_instance_id UUID NOT NULL,
                line_number INT NOT NULL,
                log TEXT NOT NULL,
                UNIQUE (activation_instance_id, line_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activation_instance_log_chunks (
                id BIGSERIAL PRIMARY KEY,
                log_id UUID NOT NULL,
                chunk BYTEA NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ActivationLogRepository for PostgresActivationStore {
    async fn append_line(
        &self,
        instance_id: InstanceId,
        line_number: i32,
        text: &str,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO activation_instance_logs (activation_instance_id, line_number, log)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(instance_id.0)
        .bind(line_number)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(())
    }

    async fn append_chunk(&self, log_id: LogId, chunk: &[u8]) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO activation_instance_log_chunks (log_id, chunk)
            VALUES ($1, $2)
            "#,
        )
        .bind(log_id.0)
        .bind(chunk)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(())
    }

    async fn read_chunks(
        &self,
        log_id: LogId,
    ) -> Result<BoxStream<'static, Result<Bytes, PersistenceError>>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT chunk
            FROM activation_instance_log_chunks
            WHERE log_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(log_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk: Vec<u8> = row
                .try_get("chunk")
                .map_err(|e| PersistenceError::Database(e.to_string()))?;
            chunks.push(Bytes::from(chunk));
        }
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}

#[async_trait]
impl ActivationInstanceRepository for PostgresActivationStore {
    async fn save(&self, instance: &ActivationInstance) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO activation_instances
                (id, name, rulebook_id, inventory_id, extra_var_id,
                 execution_environment, working_directory, deployment_mode,
                 log_id, status, restart_policy, restart_count, restarted_at,
                 created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                execution_environment = EXCLUDED.execution_environment,
                working_directory = EXCLUDED.working_directory,
                deployment_mode = EXCLUDED.deployment_mode,
                status = EXCLUDED.status,
                restart_policy = EXCLUDED.restart_policy,
                restart_count = EXCLUDED.restart_count,
                restarted_at = EXCLUDED.restarted_at,
                modified_at = EXCLUDED.modified_at
            "#,
        )
        .bind(instance.id.0)
        .bind(&instance.name)
        .bind(instance.rulebook_id)
        .bind(instance.inventory_id)
        .bind(instance.extra_var_id)
        .bind(&instance.execution_environment)
        .bind(&instance.working_directory)
        .bind(instance.deployment_mode.to_string())
        .bind(instance.log_id.0)
        .bind(instance.status.to_string())
        .bind(instance.restart_policy.to_string())
        .bind(instance.restart_count)
        .bind(instance.restarted_at)
        .bind(instance.created_at)
        .bind(instance.modified_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(())
    }

    async fn find(
        &self,
        id: InstanceId,
    ) -> Result<Option<ActivationInstance>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, rulebook_id, inventory_id, extra_var_id,
                   execution_environment, working_directory, deployment_mode,
                   log_id, status, restart_policy, restart_count, restarted_at,
                   created_at, modified_at
            FROM activation_instances
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };

        let deployment_mode: String = get(&row, "deployment_mode")?;
        let status: String = get(&row, "status")?;
        let restart_policy: String = get(&row, "restart_policy")?;

        Ok(Some(ActivationInstance {
            id: InstanceId(get(&row, "id")?),
            name: get(&row, "name")?,
            rulebook_id: get(&row, "rulebook_id")?,
            inventory_id: get(&row, "inventory_id")?,
            extra_var_id: get(&row, "extra_var_id")?,
            execution_environment: get(&row, "execution_environment")?,
            working_directory: get(&row, "working_directory")?,
            deployment_mode: deployment_mode
                .parse()
                .map_err(PersistenceError::Serialization)?,
            log_id: LogId(get(&row, "log_id")?),
            status: status.parse().map_err(PersistenceError::Serialization)?,
            restart_policy: restart_policy
                .parse()
                .map_err(PersistenceError::Serialization)?,
            restart_count: get(&row, "restart_count")?,
            restarted_at: get(&row, "restarted_at")?,
            created_at: get(&row, "created_at")?,
            modified_at: get(&row, "modified_at")?,
        }))
    }

    async fn update_status(
        &self,
        id: InstanceId,
        status: ActivationStatus,
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE activation_instances
            SET status = $2, modified_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(status.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(format!(
                "activation instance {id}"
            )));
        }
        Ok(())
    }
}

fn get<'r, T>(row: &'r sqlx::postgres::PgRow, column: &str) -> Result<T, PersistenceError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| PersistenceError::Database(e.to_string()))
}
