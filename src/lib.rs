#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod config;
mod counter;
mod dependencies;
pub mod duration;
mod engine;
mod entitlement;
mod errors;
mod events;
pub mod friendly_id;
mod models;
mod object_store;
mod packet;
mod queue_name;
mod request;
mod storage;
mod tags;
mod trigger;

pub use self::config::{TriggerConfig, OFFLOAD_THRESHOLD_ENV_VAR};
pub use self::counter::{increment_in_transaction, run_counter_key};
pub use self::engine::{PostgresRunEngine, RunEngine, TriggerRunRequest};
pub use self::entitlement::{Entitlement, EntitlementClient, GrantAllEntitlements};
pub use self::errors::{EngineError, TriggerError};
pub use self::events::{
    EventRepository, TraceEvent, TraceEventRequest, Traceparent, TracingEventRepository,
};
pub use self::models::{
    AttemptStatus, AttemptWithRun, BackgroundWorker, BackgroundWorkerTask, BatchTaskRun,
    BatchWithDependentAttempt, Environment, EnvironmentType, QueueConfig, RunStatus, TagRecord,
    TaskRun, TaskRunAttempt,
};
pub use self::object_store::{InMemoryObjectStore, ObjectStore, StoredObject};
pub use self::packet::{
    create_packet, handle_metadata_packet, packet_requires_offloading, IOPacket, JSON_DATA_TYPE,
    STORE_DATA_TYPE,
};
pub use self::queue_name::sanitize_queue_name;
pub use self::request::{
    ParentAsLinkType, QueueOptions, TagInput, TriggerRequestOptions, TriggerTaskOptions,
    TriggerTaskRequestBody, TtlValue,
};
pub use self::storage::{setup_database, CURRENT_DEPLOYMENT_LABEL};
pub use self::tags::MAX_TAGS_PER_RUN;
pub use self::trigger::TriggerTaskService;
