//! Database row types and status lifecycles.
//!
//! Runs and attempts have engine-owned lifecycles; this crate only creates
//! runs in their initial state and gates dependencies on the terminal
//! predicates below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;

/// The kind of an execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "environment_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentType {
    Development,
    Production,
    Staging,
    Preview,
}

impl EnvironmentType {
    /// Development environments skip entitlement checks and get a default
    /// run TTL.
    pub fn is_development(self) -> bool {
        matches!(self, EnvironmentType::Development)
    }
}

/// An authenticated execution context belonging to a project and
/// organization. Read-only to the trigger pipeline.
#[derive(Debug, Clone, FromRow)]
pub struct Environment {
    pub id: String,
    pub env_type: EnvironmentType,
    pub project_id: String,
    pub organization_id: String,
    pub maximum_concurrency_limit: i32,
}

/// A registered code bundle for an environment.
#[derive(Debug, Clone, FromRow)]
pub struct BackgroundWorker {
    pub id: String,
    pub friendly_id: String,
    pub version: String,
    pub project_id: String,
    pub environment_id: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A task definition exported by a worker, unique on `(worker, slug)`.
#[derive(Debug, Clone, FromRow)]
pub struct BackgroundWorkerTask {
    pub id: String,
    pub worker_id: String,
    pub slug: String,
    /// Structured blob carrying an optional queue name override; parsed
    /// leniently into [`QueueConfig`].
    pub queue_config: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// The queue settings a worker declares for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub name: Option<String>,
    pub concurrency_limit: Option<i32>,
}

/// Lifecycle of a run. Owned by the engine after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "run_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Delayed,
    WaitingForDeploy,
    Executing,
    WaitingToResume,
    RetryingAfterFailure,
    Paused,
    Canceled,
    Interrupted,
    CompletedSuccessfully,
    CompletedWithErrors,
    SystemFailure,
    Crashed,
    Expired,
    TimedOut,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Delayed => "DELAYED",
            RunStatus::WaitingForDeploy => "WAITING_FOR_DEPLOY",
            RunStatus::Executing => "EXECUTING",
            RunStatus::WaitingToResume => "WAITING_TO_RESUME",
            RunStatus::RetryingAfterFailure => "RETRYING_AFTER_FAILURE",
            RunStatus::Paused => "PAUSED",
            RunStatus::Canceled => "CANCELED",
            RunStatus::Interrupted => "INTERRUPTED",
            RunStatus::CompletedSuccessfully => "COMPLETED_SUCCESSFULLY",
            RunStatus::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            RunStatus::SystemFailure => "SYSTEM_FAILURE",
            RunStatus::Crashed => "CRASHED",
            RunStatus::Expired => "EXPIRED",
            RunStatus::TimedOut => "TIMED_OUT",
        }
    }

    /// True when no forward transition can occur anymore.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            RunStatus::Canceled
                | RunStatus::Interrupted
                | RunStatus::CompletedSuccessfully
                | RunStatus::CompletedWithErrors
                | RunStatus::SystemFailure
                | RunStatus::Crashed
                | RunStatus::Expired
                | RunStatus::TimedOut
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one execution attempt of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Pending,
    Executing,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Pending => "PENDING",
            AttemptStatus::Executing => "EXECUTING",
            AttemptStatus::Paused => "PAUSED",
            AttemptStatus::Completed => "COMPLETED",
            AttemptStatus::Failed => "FAILED",
            AttemptStatus::Canceled => "CANCELED",
        }
    }

    /// True when the attempt is past its last transition.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            AttemptStatus::Completed | AttemptStatus::Failed | AttemptStatus::Canceled
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable record of one task invocation.
///
/// Created exclusively by the trigger pipeline; mutated thereafter only by
/// the engine.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskRun {
    pub id: String,
    pub friendly_id: String,
    /// Per-(environment, task) monotonic counter, starting at 1.
    pub number: i32,
    pub environment_id: String,
    pub project_id: String,
    pub organization_id: String,
    pub task_identifier: String,
    pub idempotency_key: Option<String>,
    pub status: RunStatus,
    pub queue_name: String,
    pub master_queue: String,
    /// Inline serialized payload, or a storage locator when
    /// `payload_type` is `application/store`.
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
    /// Set iff `delay_until` is not set.
    pub queued_at: Option<DateTime<Utc>>,
    pub ttl: Option<String>,
    pub max_attempts: Option<i32>,
    pub tags: Vec<String>,
    pub tag_ids: Vec<String>,
    /// `parent.depth + 1` when any parent or dependent reference exists,
    /// else 0.
    pub depth: i32,
    pub parent_task_run_id: Option<String>,
    pub root_task_run_id: Option<String>,
    pub batch_id: Option<String>,
    pub resume_parent_on_completion: bool,
    pub locked_to_version_id: Option<String>,
    pub is_test: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One execution attempt of a run. The trigger pipeline only reads its
/// status and its run join to gate dependencies.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRunAttempt {
    pub id: String,
    pub friendly_id: String,
    pub task_run_id: String,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
}

/// An attempt together with the run it belongs to.
#[derive(Debug, Clone)]
pub struct AttemptWithRun {
    pub attempt: TaskRunAttempt,
    pub task_run: TaskRun,
}

/// A fan-out batch. Carries an optional dependent attempt whose terminal
/// status gates child creation.
#[derive(Debug, Clone, FromRow)]
pub struct BatchTaskRun {
    pub id: String,
    pub friendly_id: String,
    pub environment_id: String,
    pub dependent_task_attempt_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A batch together with its dependent attempt join, when one exists.
#[derive(Debug, Clone)]
pub struct BatchWithDependentAttempt {
    pub batch: BatchTaskRun,
    pub dependent_attempt: Option<AttemptWithRun>,
}

/// A project-scoped tag, upserted per tag string.
#[derive(Debug, Clone, FromRow)]
pub struct TagRecord {
    pub id: String,
    pub name: String,
    pub project_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_run_statuses() {
        assert!(RunStatus::CompletedSuccessfully.is_final());
        assert!(RunStatus::Canceled.is_final());
        assert!(RunStatus::TimedOut.is_final());
        assert!(!RunStatus::Pending.is_final());
        assert!(!RunStatus::Executing.is_final());
        assert!(!RunStatus::Delayed.is_final());
    }

    #[test]
    fn final_attempt_statuses() {
        assert!(AttemptStatus::Failed.is_final());
        assert!(AttemptStatus::Completed.is_final());
        assert!(!AttemptStatus::Executing.is_final());
        assert!(!AttemptStatus::Paused.is_final());
    }

    #[test]
    fn status_display_matches_wire_format() {
        assert_eq!(RunStatus::CompletedWithErrors.to_string(), "COMPLETED_WITH_ERRORS");
        assert_eq!(AttemptStatus::Failed.to_string(), "FAILED");
    }
}
