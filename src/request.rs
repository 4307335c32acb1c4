//! Trigger request surface and normalization.
//!
//! [`TriggerTaskRequestBody`] mirrors the wire shape accepted by the
//! enclosing API; [`TriggerTaskOptions`] carries what the API layer itself
//! decides (idempotency key override, span link mode, icon). Normalization
//! canonicalizes both into one internal request before the pipeline runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::duration::{stringify_duration, DelayValue};
use crate::errors::TriggerError;
use crate::events::Traceparent;
use crate::models::Environment;
use crate::packet::JSON_DATA_TYPE;
use crate::tags::MAX_TAGS_PER_RUN;

/// TTL granted to development runs that do not ask for one.
const DEFAULT_DEV_TTL: &str = "10m";

const DEFAULT_ICON: &str = "task";

/// Request body accepted by the enclosing API for a trigger call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTaskRequestBody {
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default)]
    pub options: TriggerRequestOptions,
}

/// A TTL as accepted on the wire: seconds or a duration expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TtlValue {
    Seconds(i64),
    Expression(String),
}

/// Tags as accepted on the wire: one tag or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagInput {
    One(String),
    Many(Vec<String>),
}

/// Caller-provided queue settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOptions {
    pub name: Option<String>,
    pub concurrency_limit: Option<i32>,
}

/// Options embedded in the request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerRequestOptions {
    pub idempotency_key: Option<String>,
    pub delay: Option<DelayValue>,
    pub ttl: Option<TtlValue>,
    pub tags: Option<TagInput>,
    pub metadata: Option<Value>,
    pub metadata_type: Option<String>,
    pub payload_type: Option<String>,
    pub concurrency_key: Option<String>,
    pub queue: Option<QueueOptions>,
    pub lock_to_version: Option<String>,
    pub max_attempts: Option<i32>,
    pub test: Option<bool>,
    /// Friendly id of the attempt this run blocks.
    pub dependent_attempt: Option<String>,
    /// Friendly id of the attempt this run descends from (lineage only).
    pub parent_attempt: Option<String>,
    /// Friendly id of the batch this run blocks.
    pub dependent_batch: Option<String>,
    /// Friendly id of the batch this run belongs to (lineage only).
    pub parent_batch: Option<String>,
}

/// How a new run's span relates to the caller's span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentAsLinkType {
    /// The caller span is the parent (the default).
    Trigger,
    /// The run replays an earlier one; no parent span is recorded.
    Replay,
}

/// Options decided by the API layer rather than the request body.
#[derive(Debug, Clone, Default)]
pub struct TriggerTaskOptions {
    /// Overrides the body's idempotency key when set.
    pub idempotency_key: Option<String>,
    /// Icon recorded on the trigger span; defaults to `"task"`.
    pub custom_icon: Option<String>,
    pub parent_as_link_type: Option<ParentAsLinkType>,
    /// Incoming trace context, when the caller propagated one.
    pub traceparent: Option<Traceparent>,
}

/// The canonical internal request the pipeline operates on.
#[derive(Debug, Clone)]
pub(crate) struct NormalizedTrigger {
    pub task_identifier: String,
    pub payload: Value,
    pub payload_type: String,
    pub context: Option<Value>,
    pub idempotency_key: Option<String>,
    pub delay: Option<DelayValue>,
    pub ttl: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Option<Value>,
    pub metadata_type: String,
    pub concurrency_key: Option<String>,
    pub queue_name: Option<String>,
    pub lock_to_version: Option<String>,
    pub max_attempts: Option<i32>,
    pub is_test: bool,
    pub custom_icon: String,
    pub parent_as_link_type: Option<ParentAsLinkType>,
    pub traceparent: Option<Traceparent>,
    pub dependent_attempt: Option<String>,
    pub parent_attempt: Option<String>,
    pub dependent_batch: Option<String>,
    pub parent_batch: Option<String>,
}

/// Canonicalize a trigger request against its environment.
pub(crate) fn normalize_request(
    task_id: &str,
    environment: &Environment,
    body: TriggerTaskRequestBody,
    options: TriggerTaskOptions,
) -> Result<NormalizedTrigger, TriggerError> {
    let TriggerRequestOptions {
        idempotency_key: body_idempotency_key,
        delay,
        ttl,
        tags,
        metadata,
        metadata_type,
        payload_type,
        concurrency_key,
        queue,
        lock_to_version,
        max_attempts,
        test,
        dependent_attempt,
        parent_attempt,
        dependent_batch,
        parent_batch,
    } = body.options;

    let idempotency_key = options.idempotency_key.or(body_idempotency_key);

    let ttl = match ttl {
        Some(TtlValue::Seconds(seconds)) => stringify_duration(seconds),
        Some(TtlValue::Expression(text)) => Some(text),
        None => None,
    }
    .or_else(|| {
        environment
            .env_type
            .is_development()
            .then(|| DEFAULT_DEV_TTL.to_string())
    });

    let tags = match tags {
        Some(TagInput::One(tag)) => vec![tag],
        Some(TagInput::Many(tags)) => tags,
        None => Vec::new(),
    };
    if tags.len() > MAX_TAGS_PER_RUN {
        return Err(TriggerError::Validation(format!(
            "runs can only have {MAX_TAGS_PER_RUN} tags, you are trying to set {}",
            tags.len()
        )));
    }

    Ok(NormalizedTrigger {
        task_identifier: task_id.to_string(),
        payload: body.payload,
        payload_type: payload_type.unwrap_or_else(|| JSON_DATA_TYPE.to_string()),
        context: body.context,
        idempotency_key,
        delay,
        ttl,
        tags,
        metadata,
        metadata_type: metadata_type.unwrap_or_else(|| JSON_DATA_TYPE.to_string()),
        concurrency_key,
        queue_name: queue.and_then(|q| q.name),
        lock_to_version,
        max_attempts,
        is_test: test.unwrap_or(false),
        custom_icon: options.custom_icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
        parent_as_link_type: options.parent_as_link_type,
        traceparent: options.traceparent,
        dependent_attempt,
        parent_attempt,
        dependent_batch,
        parent_batch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnvironmentType;
    use serde_json::json;

    fn environment(env_type: EnvironmentType) -> Environment {
        Environment {
            id: "env_1".to_string(),
            env_type,
            project_id: "proj_1".to_string(),
            organization_id: "org_1".to_string(),
            maximum_concurrency_limit: 10,
        }
    }

    fn body(options: TriggerRequestOptions) -> TriggerTaskRequestBody {
        TriggerTaskRequestBody {
            payload: json!({"k": 1}),
            context: None,
            options,
        }
    }

    #[test]
    fn body_deserializes_from_camel_case_wire_format() {
        let body: TriggerTaskRequestBody = serde_json::from_value(json!({
            "payload": {"to": "a@b"},
            "options": {
                "idempotencyKey": "abc",
                "ttl": 90,
                "tags": "welcome",
                "delay": "1h30m",
                "payloadType": "application/json",
                "dependentAttempt": "attempt_x",
                "queue": {"name": "priority"}
            }
        }))
        .unwrap();

        assert_eq!(body.options.idempotency_key.as_deref(), Some("abc"));
        assert_eq!(body.options.ttl, Some(TtlValue::Seconds(90)));
        assert_eq!(body.options.tags, Some(TagInput::One("welcome".to_string())));
        assert_eq!(
            body.options.delay,
            Some(DelayValue::Expression("1h30m".to_string()))
        );
        assert_eq!(body.options.dependent_attempt.as_deref(), Some("attempt_x"));
        assert_eq!(
            body.options.queue.unwrap().name.as_deref(),
            Some("priority")
        );
    }

    #[test]
    fn numeric_ttl_is_stringified() {
        let normalized = normalize_request(
            "send-email",
            &environment(EnvironmentType::Production),
            body(TriggerRequestOptions {
                ttl: Some(TtlValue::Seconds(5400)),
                ..Default::default()
            }),
            TriggerTaskOptions::default(),
        )
        .unwrap();
        assert_eq!(normalized.ttl.as_deref(), Some("1h30m"));
    }

    #[test]
    fn development_runs_get_a_default_ttl() {
        let normalized = normalize_request(
            "send-email",
            &environment(EnvironmentType::Development),
            body(TriggerRequestOptions::default()),
            TriggerTaskOptions::default(),
        )
        .unwrap();
        assert_eq!(normalized.ttl.as_deref(), Some("10m"));

        let normalized = normalize_request(
            "send-email",
            &environment(EnvironmentType::Production),
            body(TriggerRequestOptions::default()),
            TriggerTaskOptions::default(),
        )
        .unwrap();
        assert_eq!(normalized.ttl, None);
    }

    #[test]
    fn single_tag_is_lifted_to_a_list() {
        let normalized = normalize_request(
            "send-email",
            &environment(EnvironmentType::Production),
            body(TriggerRequestOptions {
                tags: Some(TagInput::One("welcome".to_string())),
                ..Default::default()
            }),
            TriggerTaskOptions::default(),
        )
        .unwrap();
        assert_eq!(normalized.tags, vec!["welcome".to_string()]);
    }

    #[test]
    fn too_many_tags_fail_with_the_limit_in_the_message() {
        let tags: Vec<String> = (0..9).map(|i| format!("tag-{i}")).collect();
        let err = normalize_request(
            "send-email",
            &environment(EnvironmentType::Production),
            body(TriggerRequestOptions {
                tags: Some(TagInput::Many(tags)),
                ..Default::default()
            }),
            TriggerTaskOptions::default(),
        )
        .unwrap_err();

        let TriggerError::Validation(message) = err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert!(message.contains("8"), "limit missing from {message:?}");
        assert!(message.contains("9"), "count missing from {message:?}");
    }

    #[test]
    fn service_idempotency_key_wins_over_the_body() {
        let normalized = normalize_request(
            "send-email",
            &environment(EnvironmentType::Production),
            body(TriggerRequestOptions {
                idempotency_key: Some("from-body".to_string()),
                ..Default::default()
            }),
            TriggerTaskOptions {
                idempotency_key: Some("from-options".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(normalized.idempotency_key.as_deref(), Some("from-options"));
    }

    #[test]
    fn defaults_apply() {
        let normalized = normalize_request(
            "send-email",
            &environment(EnvironmentType::Production),
            body(TriggerRequestOptions::default()),
            TriggerTaskOptions::default(),
        )
        .unwrap();
        assert_eq!(normalized.payload_type, "application/json");
        assert_eq!(normalized.metadata_type, "application/json");
        assert_eq!(normalized.custom_icon, "task");
        assert!(!normalized.is_test);
        assert!(normalized.tags.is_empty());
    }
}
