//! Trigger span recording.
//!
//! Every persisted run is wrapped in one server-kind trace event; the event
//! repository yields the trace identifiers the run is stamped with. The
//! repository is a collaborator so deployments can write spans into their
//! own event store; [`TracingEventRepository`] emits them through the
//! `tracing` subscriber.

use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use tracing::warn;

use crate::errors::TriggerError;

/// Incoming W3C-style trace context propagated by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traceparent {
    pub trace_id: String,
    pub span_id: String,
}

/// The span opened for one trigger call.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub trace_id: String,
    pub span_id: String,
    /// The caller's trace context, when one was propagated.
    pub traceparent: Option<Traceparent>,
}

/// Attributes recorded on the trigger span.
#[derive(Debug, Clone)]
pub struct TraceEventRequest {
    pub task_slug: String,
    pub idempotency_key: Option<String>,
    pub batch_id: Option<String>,
    pub is_test: bool,
    /// Style icon shown next to the span.
    pub icon: String,
    pub show_actions: bool,
    pub traceparent: Option<Traceparent>,
}

/// Sink for trigger spans.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Open a server-kind span and return its identifiers.
    async fn start_span(&self, request: &TraceEventRequest) -> anyhow::Result<TraceEvent>;

    /// Close a span successfully.
    async fn complete_span(&self, event: &TraceEvent) -> anyhow::Result<()>;

    /// Close a span with an error message.
    async fn fail_span(&self, event: &TraceEvent, message: &str) -> anyhow::Result<()>;
}

/// Run `body` inside a trigger span, closing the span with the outcome.
///
/// Failures to close the span are logged and swallowed so they never mask
/// the body's own result.
pub(crate) async fn with_trace_event<T, F, Fut>(
    events: &dyn EventRepository,
    request: TraceEventRequest,
    body: F,
) -> Result<T, TriggerError>
where
    F: FnOnce(TraceEvent) -> Fut,
    Fut: Future<Output = Result<T, TriggerError>>,
{
    let event = events
        .start_span(&request)
        .await
        .map_err(TriggerError::Events)?;

    match body(event.clone()).await {
        Ok(value) => {
            if let Err(error) = events.complete_span(&event).await {
                warn!(%error, "failed to complete trigger span");
            }
            Ok(value)
        }
        Err(error) => {
            if let Err(span_error) = events.fail_span(&event, &error.to_string()).await {
                warn!(%span_error, "failed to record trigger span failure");
            }
            Err(error)
        }
    }
}

fn random_hex(len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

/// Event repository that emits spans as `tracing` events.
///
/// Joins the caller's trace when a traceparent is present, otherwise starts
/// a fresh trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventRepository;

impl TracingEventRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventRepository for TracingEventRepository {
    async fn start_span(&self, request: &TraceEventRequest) -> anyhow::Result<TraceEvent> {
        let trace_id = request
            .traceparent
            .as_ref()
            .map(|t| t.trace_id.clone())
            .unwrap_or_else(|| random_hex(32));
        let span_id = random_hex(16);

        tracing::info!(
            kind = "SERVER",
            task_slug = %request.task_slug,
            idempotency_key = request.idempotency_key.as_deref(),
            batch_id = request.batch_id.as_deref(),
            run_is_test = request.is_test,
            icon = %request.icon,
            show_actions = request.show_actions,
            trace_id = %trace_id,
            span_id = %span_id,
            "trigger span started"
        );

        Ok(TraceEvent {
            trace_id,
            span_id,
            traceparent: request.traceparent.clone(),
        })
    }

    async fn complete_span(&self, event: &TraceEvent) -> anyhow::Result<()> {
        tracing::info!(trace_id = %event.trace_id, span_id = %event.span_id, "trigger span completed");
        Ok(())
    }

    async fn fail_span(&self, event: &TraceEvent, message: &str) -> anyhow::Result<()> {
        tracing::info!(
            trace_id = %event.trace_id,
            span_id = %event.span_id,
            error = message,
            "trigger span failed"
        );
        Ok(())
    }
}
