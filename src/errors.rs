use crate::models::{AttemptStatus, RunStatus};

/// Error type for triggering task runs.
///
/// The first two variants are caller errors and map onto 4xx responses in an
/// embedding API; everything else is a collaborator failure and retryable.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// The request is malformed or references state it must not reference.
    #[error("{0}")]
    Validation(String),

    /// The owning organization has no credit left to trigger runs.
    #[error("cannot trigger task as the organization has run out of credits")]
    OutOfEntitlement,

    /// Database error from the trigger pipeline's own queries.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload or metadata could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The payload offload upload failed.
    #[error("object store upload failed: {0}")]
    ObjectStore(#[source] anyhow::Error),

    /// The entitlement service failed (not a denial; denials are
    /// [`TriggerError::OutOfEntitlement`]).
    #[error("entitlement lookup failed: {0}")]
    Entitlement(#[source] anyhow::Error),

    /// The event repository failed to record the trigger span.
    #[error("trace event error: {0}")]
    Events(#[source] anyhow::Error),

    /// The run engine rejected or failed the trigger call.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl TriggerError {
    /// Validation error for a dependent attempt already past its last
    /// transition.
    pub(crate) fn attempt_terminal(task_identifier: &str, status: AttemptStatus) -> Self {
        Self::Validation(format!(
            "cannot trigger {task_identifier} as the dependent attempt has a status of {status}"
        ))
    }

    /// Validation error for a dependent run already in a terminal state.
    pub(crate) fn run_terminal(task_identifier: &str, status: RunStatus) -> Self {
        Self::Validation(format!(
            "cannot trigger {task_identifier} as the dependent run has a status of {status}"
        ))
    }
}

/// Error returned by a [`RunEngine`](crate::RunEngine) implementation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A run with the same `(environment, task, idempotency key)` already
    /// exists. The trigger pipeline treats this as a late idempotency hit,
    /// re-reads the existing run and returns it.
    #[error("a run with the same idempotency key already exists")]
    IdempotencyConflict,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
