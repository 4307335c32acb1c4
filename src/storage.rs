//! Raw queries the trigger pipeline issues against Postgres.

use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{
    BackgroundWorker, BackgroundWorkerTask, BatchTaskRun, TaskRun, TaskRunAttempt,
};

/// Promotion label marking the worker currently serving an environment.
pub const CURRENT_DEPLOYMENT_LABEL: &str = "current-deployment";

/// Apply the crate's migrations to the given database.
pub async fn setup_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Looks up a run by the idempotency unique tuple.
pub(crate) async fn find_run_by_idempotency_key(
    pool: &PgPool,
    environment_id: &str,
    task_identifier: &str,
    idempotency_key: &str,
) -> Result<Option<TaskRun>, sqlx::Error> {
    sqlx::query_as::<_, TaskRun>(
        r"
        SELECT * FROM task_runs
        WHERE environment_id = $1 AND task_identifier = $2 AND idempotency_key = $3
        ",
    )
    .bind(environment_id)
    .bind(task_identifier)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_run_by_id(pool: &PgPool, id: &str) -> Result<TaskRun, sqlx::Error> {
    sqlx::query_as::<_, TaskRun>("SELECT * FROM task_runs WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

pub(crate) async fn find_attempt_by_friendly_id(
    pool: &PgPool,
    friendly_id: &str,
) -> Result<Option<TaskRunAttempt>, sqlx::Error> {
    sqlx::query_as::<_, TaskRunAttempt>(
        r"
        SELECT id, friendly_id, task_run_id, status, created_at
        FROM task_run_attempts
        WHERE friendly_id = $1
        ",
    )
    .bind(friendly_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_attempt_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<TaskRunAttempt, sqlx::Error> {
    sqlx::query_as::<_, TaskRunAttempt>(
        r"
        SELECT id, friendly_id, task_run_id, status, created_at
        FROM task_run_attempts
        WHERE id = $1
        ",
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_batch_by_friendly_id(
    pool: &PgPool,
    friendly_id: &str,
) -> Result<Option<BatchTaskRun>, sqlx::Error> {
    sqlx::query_as::<_, BatchTaskRun>(
        r"
        SELECT id, friendly_id, environment_id, dependent_task_attempt_id, created_at
        FROM batch_task_runs
        WHERE friendly_id = $1
        ",
    )
    .bind(friendly_id)
    .fetch_optional(pool)
    .await
}

/// Finds the worker promoted to serve an environment, if any.
pub(crate) async fn find_current_worker(
    pool: &PgPool,
    environment_id: &str,
) -> Result<Option<BackgroundWorker>, sqlx::Error> {
    sqlx::query_as::<_, BackgroundWorker>(
        r"
        SELECT w.id, w.friendly_id, w.version, w.project_id, w.environment_id,
               w.content_hash, w.created_at
        FROM worker_deployment_promotions p
        JOIN background_workers w ON w.id = p.worker_id
        WHERE p.environment_id = $1 AND p.label = $2
        ",
    )
    .bind(environment_id)
    .bind(CURRENT_DEPLOYMENT_LABEL)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_worker_task(
    pool: &PgPool,
    worker_id: &str,
    slug: &str,
) -> Result<Option<BackgroundWorkerTask>, sqlx::Error> {
    sqlx::query_as::<_, BackgroundWorkerTask>(
        r"
        SELECT id, worker_id, slug, queue_config, created_at
        FROM background_worker_tasks
        WHERE worker_id = $1 AND slug = $2
        ",
    )
    .bind(worker_id)
    .bind(slug)
    .fetch_optional(pool)
    .await
}

/// Resolves a version pin to a worker inside the run-creation transaction.
pub(crate) async fn find_worker_by_version(
    tx: &mut Transaction<'_, Postgres>,
    project_id: &str,
    environment_id: &str,
    version: &str,
) -> Result<Option<BackgroundWorker>, sqlx::Error> {
    sqlx::query_as::<_, BackgroundWorker>(
        r"
        SELECT id, friendly_id, version, project_id, environment_id, content_hash, created_at
        FROM background_workers
        WHERE project_id = $1 AND environment_id = $2 AND version = $3
        ",
    )
    .bind(project_id)
    .bind(environment_id)
    .bind(version)
    .fetch_optional(&mut **tx)
    .await
}

/// Highest persisted run number for a `(environment, task)` pair; seeds the
/// counter row on first use.
pub(crate) async fn latest_run_number(
    tx: &mut Transaction<'_, Postgres>,
    environment_id: &str,
    task_identifier: &str,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r"
        SELECT COALESCE(MAX(number), 0) FROM task_runs
        WHERE environment_id = $1 AND task_identifier = $2
        ",
    )
    .bind(environment_id)
    .bind(task_identifier)
    .fetch_one(&mut **tx)
    .await
}
