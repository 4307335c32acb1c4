//! Parent and dependent reference resolution.
//!
//! A trigger request may name up to four references by friendly id. The
//! dependent ones (`dependent_attempt`, `dependent_batch`) block on the new
//! run and are rejected once terminal; the parent ones (`parent_attempt`,
//! `parent_batch`) carry lineage only. Loading is separated from the pure
//! derivations so the latter are testable without a database.

use sqlx::PgPool;

use crate::errors::TriggerError;
use crate::models::{AttemptWithRun, BatchWithDependentAttempt};
use crate::request::NormalizedTrigger;
use crate::storage;

/// The loaded dependency references of one trigger request.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResolvedDependencies {
    pub dependent_attempt: Option<AttemptWithRun>,
    pub parent_attempt: Option<AttemptWithRun>,
    pub dependent_batch: Option<BatchWithDependentAttempt>,
    pub parent_batch: Option<BatchWithDependentAttempt>,
}

impl ResolvedDependencies {
    /// Reject the request when a dependent reference can no longer resume.
    pub(crate) fn ensure_dependents_not_terminal(
        &self,
        task_identifier: &str,
    ) -> Result<(), TriggerError> {
        let gated = [
            self.dependent_attempt.as_ref(),
            self.dependent_batch
                .as_ref()
                .and_then(|batch| batch.dependent_attempt.as_ref()),
        ];
        for reference in gated.into_iter().flatten() {
            if reference.attempt.status.is_final() {
                return Err(TriggerError::attempt_terminal(
                    task_identifier,
                    reference.attempt.status,
                ));
            }
            if reference.task_run.status.is_final() {
                return Err(TriggerError::run_terminal(
                    task_identifier,
                    reference.task_run.status,
                ));
            }
        }
        Ok(())
    }

    /// Direct parent run, taken from the parent attempt only.
    pub(crate) fn parent_task_run_id(&self) -> Option<String> {
        self.parent_attempt
            .as_ref()
            .map(|reference| reference.task_run.id.clone())
    }

    /// Root of the lineage: the parent's root, or the parent itself when it
    /// is the root.
    pub(crate) fn root_task_run_id(&self) -> Option<String> {
        self.parent_attempt.as_ref().map(|reference| {
            reference
                .task_run
                .root_task_run_id
                .clone()
                .unwrap_or_else(|| reference.task_run.id.clone())
        })
    }

    pub(crate) fn batch_id(&self) -> Option<String> {
        self.dependent_batch
            .as_ref()
            .map(|batch| batch.batch.id.clone())
            .or_else(|| {
                self.parent_batch
                    .as_ref()
                    .map(|batch| batch.batch.id.clone())
            })
    }

    pub(crate) fn depth(&self) -> i32 {
        if let Some(reference) = &self.dependent_attempt {
            reference.task_run.depth + 1
        } else if let Some(reference) = &self.parent_attempt {
            reference.task_run.depth + 1
        } else if let Some(batch) = &self.dependent_batch {
            batch
                .dependent_attempt
                .as_ref()
                .map_or(0, |reference| reference.task_run.depth + 1)
        } else {
            0
        }
    }

    /// A run resumes its parent iff something is actually waiting on it.
    pub(crate) fn resume_parent_on_completion(&self) -> bool {
        self.dependent_attempt.is_some() || self.dependent_batch.is_some()
    }
}

/// Load every reference the request names.
pub(crate) async fn resolve_dependencies(
    pool: &PgPool,
    request: &NormalizedTrigger,
) -> Result<ResolvedDependencies, TriggerError> {
    let dependent_attempt = match &request.dependent_attempt {
        Some(friendly_id) => Some(load_attempt(pool, friendly_id).await?),
        None => None,
    };
    let parent_attempt = match &request.parent_attempt {
        Some(friendly_id) => Some(load_attempt(pool, friendly_id).await?),
        None => None,
    };
    let dependent_batch = match &request.dependent_batch {
        Some(friendly_id) => Some(load_batch(pool, friendly_id).await?),
        None => None,
    };
    let parent_batch = match &request.parent_batch {
        Some(friendly_id) => Some(load_batch(pool, friendly_id).await?),
        None => None,
    };

    Ok(ResolvedDependencies {
        dependent_attempt,
        parent_attempt,
        dependent_batch,
        parent_batch,
    })
}

async fn load_attempt(pool: &PgPool, friendly_id: &str) -> Result<AttemptWithRun, TriggerError> {
    let attempt = storage::find_attempt_by_friendly_id(pool, friendly_id)
        .await?
        .ok_or_else(|| {
            TriggerError::Validation(format!("attempt {friendly_id} does not exist"))
        })?;
    let task_run = storage::find_run_by_id(pool, &attempt.task_run_id).await?;
    Ok(AttemptWithRun { attempt, task_run })
}

async fn load_batch(
    pool: &PgPool,
    friendly_id: &str,
) -> Result<BatchWithDependentAttempt, TriggerError> {
    let batch = storage::find_batch_by_friendly_id(pool, friendly_id)
        .await?
        .ok_or_else(|| TriggerError::Validation(format!("batch {friendly_id} does not exist")))?;

    let dependent_attempt = match &batch.dependent_task_attempt_id {
        Some(attempt_id) => {
            let attempt = storage::find_attempt_by_id(pool, attempt_id).await?;
            let task_run = storage::find_run_by_id(pool, &attempt.task_run_id).await?;
            Some(AttemptWithRun { attempt, task_run })
        }
        None => None,
    };

    Ok(BatchWithDependentAttempt {
        batch,
        dependent_attempt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AttemptStatus, BatchTaskRun, RunStatus, TaskRun, TaskRunAttempt,
    };
    use chrono::Utc;

    fn run(id: &str, status: RunStatus, depth: i32, root: Option<&str>) -> TaskRun {
        TaskRun {
            id: id.to_string(),
            friendly_id: format!("run_{id}"),
            number: 1,
            environment_id: "env_1".to_string(),
            project_id: "proj_1".to_string(),
            organization_id: "org_1".to_string(),
            task_identifier: "send-email".to_string(),
            idempotency_key: None,
            status,
            queue_name: "task/send-email".to_string(),
            master_queue: "main".to_string(),
            payload: None,
            payload_type: "application/json".to_string(),
            context: None,
            metadata: None,
            metadata_type: "application/json".to_string(),
            seed_metadata: None,
            seed_metadata_type: None,
            trace_id: "trace".to_string(),
            span_id: "span".to_string(),
            parent_span_id: None,
            concurrency_key: None,
            delay_until: None,
            queued_at: Some(Utc::now()),
            ttl: None,
            max_attempts: None,
            tags: Vec::new(),
            tag_ids: Vec::new(),
            depth,
            parent_task_run_id: None,
            root_task_run_id: root.map(str::to_string),
            batch_id: None,
            resume_parent_on_completion: false,
            locked_to_version_id: None,
            is_test: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn attempt_with_run(status: AttemptStatus, task_run: TaskRun) -> AttemptWithRun {
        AttemptWithRun {
            attempt: TaskRunAttempt {
                id: "attempt_1".to_string(),
                friendly_id: "attempt_friendly".to_string(),
                task_run_id: task_run.id.clone(),
                status,
                created_at: Utc::now(),
            },
            task_run,
        }
    }

    fn batch(id: &str, dependent_attempt: Option<AttemptWithRun>) -> BatchWithDependentAttempt {
        BatchWithDependentAttempt {
            batch: BatchTaskRun {
                id: id.to_string(),
                friendly_id: format!("batch_{id}"),
                environment_id: "env_1".to_string(),
                dependent_task_attempt_id: dependent_attempt
                    .as_ref()
                    .map(|reference| reference.attempt.id.clone()),
                created_at: Utc::now(),
            },
            dependent_attempt,
        }
    }

    #[test]
    fn no_references_means_root_run() {
        let deps = ResolvedDependencies::default();
        assert_eq!(deps.depth(), 0);
        assert_eq!(deps.parent_task_run_id(), None);
        assert_eq!(deps.root_task_run_id(), None);
        assert_eq!(deps.batch_id(), None);
        assert!(!deps.resume_parent_on_completion());
        assert!(deps.ensure_dependents_not_terminal("send-email").is_ok());
    }

    #[test]
    fn terminal_dependent_attempt_is_rejected_with_its_status() {
        let deps = ResolvedDependencies {
            dependent_attempt: Some(attempt_with_run(
                AttemptStatus::Failed,
                run("r1", RunStatus::Executing, 0, None),
            )),
            ..Default::default()
        };
        let err = deps
            .ensure_dependents_not_terminal("send-email")
            .unwrap_err();
        assert!(err.to_string().contains("FAILED"), "{err}");
    }

    #[test]
    fn terminal_dependent_run_is_rejected_with_its_status() {
        let deps = ResolvedDependencies {
            dependent_attempt: Some(attempt_with_run(
                AttemptStatus::Executing,
                run("r1", RunStatus::Canceled, 0, None),
            )),
            ..Default::default()
        };
        let err = deps
            .ensure_dependents_not_terminal("send-email")
            .unwrap_err();
        assert!(err.to_string().contains("CANCELED"), "{err}");
    }

    #[test]
    fn terminal_batch_dependent_attempt_is_rejected() {
        let deps = ResolvedDependencies {
            dependent_batch: Some(batch(
                "b1",
                Some(attempt_with_run(
                    AttemptStatus::Canceled,
                    run("r1", RunStatus::Executing, 0, None),
                )),
            )),
            ..Default::default()
        };
        assert!(deps.ensure_dependents_not_terminal("send-email").is_err());
    }

    #[test]
    fn parent_attempts_are_not_terminal_gated() {
        let deps = ResolvedDependencies {
            parent_attempt: Some(attempt_with_run(
                AttemptStatus::Completed,
                run("r1", RunStatus::CompletedSuccessfully, 0, None),
            )),
            ..Default::default()
        };
        assert!(deps.ensure_dependents_not_terminal("send-email").is_ok());
    }

    #[test]
    fn lineage_derives_from_the_parent_attempt() {
        let deps = ResolvedDependencies {
            parent_attempt: Some(attempt_with_run(
                AttemptStatus::Executing,
                run("r2", RunStatus::Executing, 3, Some("r0")),
            )),
            ..Default::default()
        };
        assert_eq!(deps.parent_task_run_id().as_deref(), Some("r2"));
        assert_eq!(deps.root_task_run_id().as_deref(), Some("r0"));
        assert_eq!(deps.depth(), 4);
        assert!(!deps.resume_parent_on_completion());
    }

    #[test]
    fn parent_without_root_is_its_own_root() {
        let deps = ResolvedDependencies {
            parent_attempt: Some(attempt_with_run(
                AttemptStatus::Executing,
                run("r2", RunStatus::Executing, 0, None),
            )),
            ..Default::default()
        };
        assert_eq!(deps.root_task_run_id().as_deref(), Some("r2"));
    }

    #[test]
    fn dependent_attempt_wins_depth_over_parent() {
        let deps = ResolvedDependencies {
            dependent_attempt: Some(attempt_with_run(
                AttemptStatus::Executing,
                run("r1", RunStatus::Executing, 5, None),
            )),
            parent_attempt: Some(attempt_with_run(
                AttemptStatus::Executing,
                run("r2", RunStatus::Executing, 1, None),
            )),
            ..Default::default()
        };
        assert_eq!(deps.depth(), 6);
        assert!(deps.resume_parent_on_completion());
    }

    #[test]
    fn batch_depth_comes_from_its_dependent_attempt() {
        let deps = ResolvedDependencies {
            dependent_batch: Some(batch(
                "b1",
                Some(attempt_with_run(
                    AttemptStatus::Executing,
                    run("r1", RunStatus::Executing, 2, None),
                )),
            )),
            ..Default::default()
        };
        assert_eq!(deps.depth(), 3);
        assert_eq!(deps.batch_id().as_deref(), Some("b1"));
        assert!(deps.resume_parent_on_completion());

        let empty_batch = ResolvedDependencies {
            dependent_batch: Some(batch("b2", None)),
            ..Default::default()
        };
        assert_eq!(empty_batch.depth(), 0);
        assert!(empty_batch.resume_parent_on_completion());
    }

    #[test]
    fn dependent_batch_wins_batch_id_over_parent_batch() {
        let deps = ResolvedDependencies {
            dependent_batch: Some(batch("b1", None)),
            parent_batch: Some(batch("b2", None)),
            ..Default::default()
        };
        assert_eq!(deps.batch_id().as_deref(), Some("b1"));

        let only_parent = ResolvedDependencies {
            parent_batch: Some(batch("b2", None)),
            ..Default::default()
        };
        assert_eq!(only_parent.batch_id().as_deref(), Some("b2"));
    }
}
