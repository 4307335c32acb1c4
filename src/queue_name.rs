//! Queue-name resolution and sanitization.
//!
//! The effective queue name layers the caller's choice over the queue the
//! currently deployed worker declares for the task, falling back to
//! `task/<id>`. Whatever wins is sanitized to `[a-z0-9/_-]`.

use sqlx::PgPool;
use tracing::error;

use crate::errors::TriggerError;
use crate::models::{Environment, QueueConfig};
use crate::storage;

/// Lowercase a queue name, map everything outside `[a-z0-9/_-]` to `_` and
/// collapse runs of the replacement character. May yield an empty string;
/// see [`sanitized_queue_name_or_default`].
pub fn sanitize_queue_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut previous_was_replacement = false;
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        let mapped = match c {
            'a'..='z' | '0'..='9' | '/' | '-' | '_' => c,
            _ => '_',
        };
        if mapped == '_' {
            if previous_was_replacement {
                continue;
            }
            previous_was_replacement = true;
        } else {
            previous_was_replacement = false;
        }
        out.push(mapped);
    }
    out
}

fn default_queue_name(task_id: &str) -> String {
    format!("task/{task_id}")
}

/// Sanitize `name`, substituting the task fallback when nothing survives.
pub(crate) fn sanitized_queue_name_or_default(name: &str, task_id: &str) -> String {
    let sanitized = sanitize_queue_name(name);
    if sanitized.is_empty() {
        sanitize_queue_name(&default_queue_name(task_id))
    } else {
        sanitized
    }
}

/// Pick the queue name a worker's task configuration declares, if any.
///
/// `queue_config` is parsed leniently: a missing or null blob and a blob
/// without a name both mean "no override"; a malformed blob is logged and
/// ignored.
pub(crate) fn queue_name_from_config(
    task_id: &str,
    worker_id: &str,
    queue_config: Option<&serde_json::Value>,
) -> Option<String> {
    let value = match queue_config {
        Some(value) if !value.is_null() => value,
        _ => return None,
    };

    match serde_json::from_value::<QueueConfig>(value.clone()) {
        Ok(config) => config.name,
        Err(parse_error) => {
            error!(
                task_id,
                worker_id,
                %parse_error,
                "failed to parse queue config, falling back to the default queue"
            );
            None
        }
    }
}

/// Resolve the effective queue name for a trigger request.
pub(crate) async fn resolve_queue_name(
    pool: &PgPool,
    environment: &Environment,
    task_id: &str,
    queue_option: Option<&str>,
) -> Result<String, TriggerError> {
    if let Some(name) = queue_option {
        if !name.is_empty() {
            return Ok(sanitized_queue_name_or_default(name, task_id));
        }
    }

    let worker = if environment.env_type.is_development() {
        None
    } else {
        storage::find_current_worker(pool, &environment.id).await?
    };

    let Some(worker) = worker else {
        return Ok(sanitized_queue_name_or_default(
            &default_queue_name(task_id),
            task_id,
        ));
    };

    let configured = match storage::find_worker_task(pool, &worker.id, task_id).await? {
        Some(task) => queue_name_from_config(task_id, &worker.id, task.queue_config.as_ref()),
        None => None,
    };

    let name = configured.unwrap_or_else(|| default_queue_name(task_id));
    Ok(sanitized_queue_name_or_default(&name, task_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitization_lowercases_and_replaces() {
        assert_eq!(sanitize_queue_name("Priority Mail"), "priority_mail");
        assert_eq!(sanitize_queue_name("task/send-email"), "task/send-email");
        assert_eq!(sanitize_queue_name("a@@b!!c"), "a_b_c");
    }

    #[test]
    fn sanitization_collapses_replacement_runs() {
        assert_eq!(sanitize_queue_name("a   b"), "a_b");
        assert_eq!(sanitize_queue_name("__already__underscored__"), "_already_underscored_");
    }

    #[test]
    fn empty_results_fall_back_to_the_task_queue() {
        assert_eq!(
            sanitized_queue_name_or_default("!!!", "send-email"),
            "task/send-email"
        );
        assert_eq!(sanitized_queue_name_or_default("", "send-email"), "task/send-email");
    }

    #[test]
    fn sanitized_names_match_the_allowed_alphabet() {
        for raw in ["Priority Mail", "Ünïcode!", "x", "a//b", "9-to-5", "  "] {
            let name = sanitized_queue_name_or_default(raw, "send-email");
            assert!(!name.is_empty());
            assert!(
                name.chars()
                    .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '/' | '_' | '-')),
                "{raw:?} sanitized to {name:?}"
            );
        }
    }

    #[test]
    fn queue_config_yields_the_declared_name() {
        let config = json!({"name": "priority-mail", "concurrencyLimit": 5});
        assert_eq!(
            queue_name_from_config("send-email", "worker_1", Some(&config)),
            Some("priority-mail".to_string())
        );
    }

    #[test]
    fn missing_null_or_nameless_config_means_no_override() {
        assert_eq!(queue_name_from_config("send-email", "worker_1", None), None);
        assert_eq!(
            queue_name_from_config("send-email", "worker_1", Some(&json!(null))),
            None
        );
        assert_eq!(
            queue_name_from_config("send-email", "worker_1", Some(&json!({"concurrencyLimit": 2}))),
            None
        );
    }

    #[test]
    fn malformed_config_falls_back() {
        let config = json!({"name": 42});
        assert_eq!(
            queue_name_from_config("send-email", "worker_1", Some(&config)),
            None
        );
    }
}
