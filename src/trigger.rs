//! The trigger pipeline.
//!
//! [`TriggerTaskService::call`] accepts a request to execute a named task,
//! validates it against environment state and entitlements, deduplicates it,
//! and persists a run under a per-(environment, task) monotonic number
//! before handing it to the engine's queue. Everything before the
//! run-creation transaction is read-only, so a failure part-way leaves no
//! state behind (modulo an already-uploaded payload object, which is keyed
//! by a fresh run id and harmless).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument, Span};

use crate::config::TriggerConfig;
use crate::counter;
use crate::dependencies::{resolve_dependencies, ResolvedDependencies};
use crate::duration::parse_delay;
use crate::engine::{RunEngine, TriggerRunRequest};
use crate::entitlement::EntitlementClient;
use crate::errors::{EngineError, TriggerError};
use crate::events::{with_trace_event, EventRepository, TraceEvent, TraceEventRequest};
use crate::friendly_id;
use crate::models::{Environment, RunStatus, TaskRun};
use crate::object_store::ObjectStore;
use crate::packet::{
    create_packet, handle_metadata_packet, offloaded_packet, packet_requires_offloading,
    payload_object_path, IOPacket,
};
use crate::queue_name::resolve_queue_name;
use crate::request::{
    normalize_request, NormalizedTrigger, ParentAsLinkType, TriggerTaskOptions,
    TriggerTaskRequestBody,
};
use crate::storage;
use crate::tags::upsert_tag;

// TODO: route per-pool master queues once more than one worker pool exists.
const MASTER_QUEUE: &str = "main";

/// Service that turns trigger requests into persisted, enqueued runs.
///
/// Holds no mutable state; collaborators are injected once and shared.
pub struct TriggerTaskService {
    pool: PgPool,
    config: TriggerConfig,
    engine: Arc<dyn RunEngine>,
    object_store: Arc<dyn ObjectStore>,
    entitlement: Arc<dyn EntitlementClient>,
    events: Arc<dyn EventRepository>,
}

impl TriggerTaskService {
    pub fn new(
        pool: PgPool,
        config: TriggerConfig,
        engine: Arc<dyn RunEngine>,
        object_store: Arc<dyn ObjectStore>,
        entitlement: Arc<dyn EntitlementClient>,
        events: Arc<dyn EventRepository>,
    ) -> Self {
        Self {
            pool,
            config,
            engine,
            object_store,
            entitlement,
            events,
        }
    }

    /// Trigger one run of `task_id` in `environment`.
    ///
    /// Returns the existing run when the request's idempotency key has been
    /// seen before, whether it was caught by the lookup or by the unique
    /// index at insert time.
    #[instrument(
        name = "trigger_task",
        skip_all,
        fields(
            task_identifier = %task_id,
            environment_id = %environment.id,
            run_id = tracing::field::Empty,
        )
    )]
    pub async fn call(
        &self,
        task_id: &str,
        environment: &Environment,
        body: TriggerTaskRequestBody,
        options: TriggerTaskOptions,
    ) -> Result<TaskRun, TriggerError> {
        let request = normalize_request(task_id, environment, body, options)?;

        if let Some(existing) = self.find_existing_run(environment, &request).await? {
            Span::current().record("run_id", existing.friendly_id.as_str());
            debug!(idempotency_key = ?request.idempotency_key, "idempotent trigger, returning existing run");
            return Ok(existing);
        }

        self.check_entitlement(environment).await?;

        let dependencies = resolve_dependencies(&self.pool, &request).await?;
        dependencies.ensure_dependents_not_terminal(task_id)?;

        let delay_until = request.delay.as_ref().and_then(parse_delay);
        let queued_at = delay_until.is_none().then(Utc::now);

        let (run_id, run_friendly_id) = friendly_id::generate_friendly_id("run");

        let payload_packet = self
            .prepare_payload_packet(environment, &run_friendly_id, &request)
            .await?;
        let metadata_packet =
            handle_metadata_packet(request.metadata.as_ref(), &request.metadata_type)?;

        let queue_name = resolve_queue_name(
            &self.pool,
            environment,
            task_id,
            request.queue_name.as_deref(),
        )
        .await?;

        let event_request = TraceEventRequest {
            task_slug: task_id.to_string(),
            idempotency_key: request.idempotency_key.clone(),
            batch_id: dependencies.batch_id(),
            is_test: request.is_test,
            icon: request.custom_icon.clone(),
            show_actions: true,
            traceparent: request.traceparent.clone(),
        };

        let created = with_trace_event(self.events.as_ref(), event_request, |event| {
            self.create_run(
                environment,
                &request,
                &dependencies,
                event,
                run_id,
                run_friendly_id,
                payload_packet,
                metadata_packet,
                queue_name,
                delay_until,
                queued_at,
            )
        })
        .await;

        match created {
            Ok(run) => {
                Span::current().record("run_id", run.friendly_id.as_str());
                Ok(run)
            }
            // The gate and the insert are not one transaction; the unique
            // index is the backstop for racing requests with the same key.
            Err(TriggerError::Engine(EngineError::IdempotencyConflict)) => {
                let existing = self
                    .find_existing_run(environment, &request)
                    .await?
                    .ok_or(TriggerError::Engine(EngineError::IdempotencyConflict))?;
                Span::current().record("run_id", existing.friendly_id.as_str());
                debug!("idempotency race resolved to the winning run");
                Ok(existing)
            }
            Err(error) => Err(error),
        }
    }

    async fn find_existing_run(
        &self,
        environment: &Environment,
        request: &NormalizedTrigger,
    ) -> Result<Option<TaskRun>, TriggerError> {
        let Some(idempotency_key) = &request.idempotency_key else {
            return Ok(None);
        };
        Ok(storage::find_run_by_idempotency_key(
            &self.pool,
            &environment.id,
            &request.task_identifier,
            idempotency_key,
        )
        .await?)
    }

    async fn check_entitlement(&self, environment: &Environment) -> Result<(), TriggerError> {
        if environment.env_type.is_development() {
            return Ok(());
        }
        let entitlement = self
            .entitlement
            .current_entitlement(&environment.organization_id)
            .await
            .map_err(TriggerError::Entitlement)?;
        // An absent reply means the billing side has no opinion.
        match entitlement {
            Some(entitlement) if !entitlement.has_access => Err(TriggerError::OutOfEntitlement),
            _ => Ok(()),
        }
    }

    async fn prepare_payload_packet(
        &self,
        environment: &Environment,
        run_friendly_id: &str,
        request: &NormalizedTrigger,
    ) -> Result<IOPacket, TriggerError> {
        let packet = create_packet(&request.payload, &request.payload_type)?;

        let (needs_offloading, size) =
            packet_requires_offloading(&packet, self.config.payload_offload_threshold);
        if !needs_offloading {
            return Ok(packet);
        }
        let Some(data) = packet.data else {
            return Ok(packet);
        };

        let filename = payload_object_path(run_friendly_id);
        self.object_store
            .upload(environment, &filename, data, &packet.data_type)
            .await
            .map_err(TriggerError::ObjectStore)?;
        debug!(size, path = %filename, "payload offloaded to object storage");

        Ok(offloaded_packet(filename))
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_run(
        &self,
        environment: &Environment,
        request: &NormalizedTrigger,
        dependencies: &ResolvedDependencies,
        event: TraceEvent,
        run_id: String,
        run_friendly_id: String,
        payload_packet: IOPacket,
        metadata_packet: Option<IOPacket>,
        queue_name: String,
        delay_until: Option<DateTime<Utc>>,
        queued_at: Option<DateTime<Utc>>,
    ) -> Result<TaskRun, TriggerError> {
        let parent_span_id = match request.parent_as_link_type {
            Some(ParentAsLinkType::Replay) => None,
            _ => event
                .traceparent
                .as_ref()
                .map(|traceparent| traceparent.span_id.clone()),
        };

        let status = if delay_until.is_some() {
            RunStatus::Delayed
        } else {
            RunStatus::Pending
        };

        let (metadata, metadata_type) = match metadata_packet {
            Some(packet) => (packet.data, packet.data_type),
            None => (None, request.metadata_type.clone()),
        };

        let run = TriggerRunRequest {
            id: run_id,
            friendly_id: run_friendly_id,
            number: 0, // assigned under the counter lock below
            environment_id: environment.id.clone(),
            project_id: environment.project_id.clone(),
            organization_id: environment.organization_id.clone(),
            task_identifier: request.task_identifier.clone(),
            idempotency_key: request.idempotency_key.clone(),
            status,
            queue_name,
            master_queue: MASTER_QUEUE.to_string(),
            payload: payload_packet.data,
            payload_type: payload_packet.data_type,
            context: request.context.clone(),
            seed_metadata: metadata.clone(),
            seed_metadata_type: metadata.is_some().then(|| metadata_type.clone()),
            metadata,
            metadata_type,
            trace_id: event.trace_id,
            span_id: event.span_id,
            parent_span_id,
            concurrency_key: request.concurrency_key.clone(),
            delay_until,
            queued_at,
            ttl: request.ttl.clone(),
            max_attempts: request.max_attempts,
            tags: request.tags.clone(),
            tag_ids: Vec::new(),
            depth: dependencies.depth(),
            parent_task_run_id: dependencies.parent_task_run_id(),
            root_task_run_id: dependencies.root_task_run_id(),
            batch_id: dependencies.batch_id(),
            resume_parent_on_completion: dependencies.resume_parent_on_completion(),
            locked_to_version_id: None,
            is_test: request.is_test,
        };

        let counter_key = counter::run_counter_key(&environment.id, &request.task_identifier);
        let context = RunCreationContext {
            engine: Arc::clone(&self.engine),
            run,
            tag_names: request.tags.clone(),
            lock_to_version: request.lock_to_version.clone(),
        };

        let seed_environment_id = environment.id.clone();
        let seed_task_identifier = request.task_identifier.clone();

        counter::increment_in_transaction(
            &self.pool,
            &counter_key,
            move |tx| {
                Box::pin(derive_initial_run_number(
                    tx,
                    seed_environment_id,
                    seed_task_identifier,
                ))
            },
            move |number, tx| Box::pin(create_run_in_transaction(context, number, tx)),
        )
        .await
    }
}

struct RunCreationContext {
    engine: Arc<dyn RunEngine>,
    run: TriggerRunRequest,
    tag_names: Vec<String>,
    lock_to_version: Option<String>,
}

/// Seed for a missing counter row: the highest run number already persisted
/// for the pair, so numbering continues rather than restarting at 1.
async fn derive_initial_run_number(
    tx: &mut Transaction<'static, Postgres>,
    environment_id: String,
    task_identifier: String,
) -> Result<i32, TriggerError> {
    Ok(storage::latest_run_number(tx, &environment_id, &task_identifier).await?)
}

async fn create_run_in_transaction(
    context: RunCreationContext,
    number: i32,
    tx: &mut Transaction<'static, Postgres>,
) -> Result<TaskRun, TriggerError> {
    let RunCreationContext {
        engine,
        mut run,
        tag_names,
        lock_to_version,
    } = context;

    // A version pin that matches no worker is non-fatal; the run simply
    // stays unlocked.
    if let Some(version) = &lock_to_version {
        run.locked_to_version_id =
            storage::find_worker_by_version(tx, &run.project_id, &run.environment_id, version)
                .await?
                .map(|worker| worker.id);
    }

    let mut tag_ids = Vec::with_capacity(tag_names.len());
    for tag in &tag_names {
        tag_ids.push(upsert_tag(tx, tag, &run.project_id).await?.id);
    }
    run.tag_ids = tag_ids;
    run.number = number;

    Ok(engine.trigger(run, tx).await?)
}
