//! Batch-export and live-event ingestion pipeline for a columnar analytics
//! store.
//!
//! Two halves, fully decoupled: a continuously running ingestion projector
//! that materializes queue messages into a sharded, TTL-bounded stream store,
//! and stateless export queries that derive reconciled entity snapshots and
//! de-duplicated event streams from append-only logs at read time. Exports
//! are pure functions of committed data plus window boundaries, so they are
//! repeatable and need no coordination with ingestion or with each other.

pub mod app;
pub mod assembler;
pub mod config;
pub mod ddl;
pub mod dedup;
pub mod logging;
pub mod projector;
pub mod queue;
pub mod reconcile;
pub mod shard;
pub mod store;
pub mod telemetry;
pub mod window;

pub use assembler::{ExportAssembler, ExportQuery, QueryError};
pub use config::{
    ConfigError, ConfigImpact, ConfigKnobClass, ConfigPatchResult, ConfigService, ConfigTelemetry,
    PipelineConfig, DEFAULT_RETENTION_DAYS,
};
pub use ddl::{
    bootstrap_statements, distributed_stream_table_sql, queue_stream_table_sql,
    sharded_stream_table_sql, stream_projection_view_sql, stream_table_sql, StorageEngineSpec,
    DISTRIBUTED_STREAM_TABLE, QUEUE_STREAM_TABLE, SHARDED_STREAM_TABLE, STREAM_PROJECTION_VIEW,
};
pub use dedup::{
    deduplicate, deduplicate_bounded, deduplicate_with_stats, stable_hash64, CollisionKey,
    DedupOutcome, ExportedEvent,
};
pub use logging::{JsonLineLogger, LogFile, LogLevel, LogRotationPolicy, LoggingError};
pub use projector::{
    IngestProjector, PollOutcome, ProjectorError, ProjectorState, SinkError, StreamSink,
    DEFAULT_EXCLUDED_EVENT,
};
pub use queue::{
    InMemoryConsumer, InMemoryTopic, PublishError, TopicConsumer, TopicMessage, TopicProducer,
};
pub use reconcile::{reconcile, reconcile_bounded, ReconcileError, ReconciledEntity};
pub use shard::{
    bucket_start, ShardedStreamRow, ShardedStreamStore, ShardingScheme, STREAM_BUCKET_MINUTES,
};
pub use store::{
    EntityKeyLog, EntityKeyRecord, EntityPayloadLog, EntityPayloadRecord, EventLog, EventRecord,
    StoreError,
};
pub use telemetry::{Counter, MetricSample, MetricsSnapshot, PipelineTelemetry};
pub use window::{ExportWindow, WindowError, WindowMode, DEFAULT_LOOKBACK_DAYS};
