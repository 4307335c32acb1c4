//! Run engine contract and the built-in Postgres implementation.
//!
//! The engine owns a run after creation. The trigger pipeline hands it a
//! fully assembled run shape inside the run-creation transaction; a
//! successful return means the run row is durable and enqueued for
//! dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use tracing::debug;

use crate::errors::EngineError;
use crate::models::{RunStatus, TaskRun};

/// Name of the unique index backing idempotency keys; a violation on it is
/// a late idempotency hit, not a failure.
const IDEMPOTENCY_INDEX: &str = "task_runs_env_task_idempotency_key";

/// The fully assembled shape of a run about to be persisted.
#[derive(Debug, Clone)]
pub struct TriggerRunRequest {
    pub id: String,
    pub friendly_id: String,
    pub number: i32,
    pub environment_id: String,
    pub project_id: String,
    pub organization_id: String,
    pub task_identifier: String,
    pub idempotency_key: Option<String>,
    pub status: RunStatus,
    pub queue_name: String,
    pub master_queue: String,
    pub payload: Option<String>,
    pub payload_type: String,
    pub context: Option<Value>,
    pub metadata: Option<String>,
    pub metadata_type: String,
    pub seed_metadata: Option<String>,
    pub seed_metadata_type: Option<String>,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub concurrency_key: Option<String>,
    pub delay_until: Option<DateTime<Utc>>,
    pub queued_at: Option<DateTime<Utc>>,
    pub ttl: Option<String>,
    pub max_attempts: Option<i32>,
    pub tags: Vec<String>,
    pub tag_ids: Vec<String>,
    pub depth: i32,
    pub parent_task_run_id: Option<String>,
    pub root_task_run_id: Option<String>,
    pub batch_id: Option<String>,
    pub resume_parent_on_completion: bool,
    pub locked_to_version_id: Option<String>,
    pub is_test: bool,
}

/// Downstream execution engine.
#[async_trait]
pub trait RunEngine: Send + Sync {
    /// Persist the run inside the caller's transaction and hand it to the
    /// execution queue.
    async fn trigger(
        &self,
        run: TriggerRunRequest,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<TaskRun, EngineError>;
}

/// Engine that persists runs into `task_runs` and enqueues non-delayed runs
/// onto the `run_queue` handoff table. Delayed runs are enqueued later by
/// the dispatcher once their delay elapses.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresRunEngine;

impl PostgresRunEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RunEngine for PostgresRunEngine {
    async fn trigger(
        &self,
        run: TriggerRunRequest,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<TaskRun, EngineError> {
        let inserted = sqlx::query_as::<_, TaskRun>(
            r"
            INSERT INTO task_runs (
                id, friendly_id, number, environment_id, project_id, organization_id,
                task_identifier, idempotency_key, status, queue_name, master_queue,
                payload, payload_type, context, metadata, metadata_type,
                seed_metadata, seed_metadata_type, trace_id, span_id, parent_span_id,
                concurrency_key, delay_until, queued_at, ttl, max_attempts,
                tags, tag_ids, depth, parent_task_run_id, root_task_run_id,
                batch_id, resume_parent_on_completion, locked_to_version_id, is_test
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21,
                $22, $23, $24, $25, $26,
                $27, $28, $29, $30, $31,
                $32, $33, $34, $35
            )
            RETURNING *
            ",
        )
        .bind(&run.id)
        .bind(&run.friendly_id)
        .bind(run.number)
        .bind(&run.environment_id)
        .bind(&run.project_id)
        .bind(&run.organization_id)
        .bind(&run.task_identifier)
        .bind(&run.idempotency_key)
        .bind(run.status)
        .bind(&run.queue_name)
        .bind(&run.master_queue)
        .bind(&run.payload)
        .bind(&run.payload_type)
        .bind(&run.context)
        .bind(&run.metadata)
        .bind(&run.metadata_type)
        .bind(&run.seed_metadata)
        .bind(&run.seed_metadata_type)
        .bind(&run.trace_id)
        .bind(&run.span_id)
        .bind(&run.parent_span_id)
        .bind(&run.concurrency_key)
        .bind(run.delay_until)
        .bind(run.queued_at)
        .bind(&run.ttl)
        .bind(run.max_attempts)
        .bind(&run.tags)
        .bind(&run.tag_ids)
        .bind(run.depth)
        .bind(&run.parent_task_run_id)
        .bind(&run.root_task_run_id)
        .bind(&run.batch_id)
        .bind(run.resume_parent_on_completion)
        .bind(&run.locked_to_version_id)
        .bind(run.is_test)
        .fetch_one(&mut **tx)
        .await
        .map_err(|error| match &error {
            sqlx::Error::Database(db_error)
                if db_error.is_unique_violation()
                    && db_error.constraint() == Some(IDEMPOTENCY_INDEX) =>
            {
                EngineError::IdempotencyConflict
            }
            _ => EngineError::Database(error),
        })?;

        if inserted.delay_until.is_none() {
            sqlx::query(
                r"
                INSERT INTO run_queue (run_id, master_queue, queue_name)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(&inserted.id)
            .bind(&inserted.master_queue)
            .bind(&inserted.queue_name)
            .execute(&mut **tx)
            .await?;
        }

        debug!(
            run_id = %inserted.friendly_id,
            number = inserted.number,
            queue = %inserted.queue_name,
            delayed = inserted.delay_until.is_some(),
            "run persisted"
        );

        Ok(inserted)
    }
}
