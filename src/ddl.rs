use crate::config::PipelineConfig;

/// Physical data table holding the sharded stream rows.
pub const SHARDED_STREAM_TABLE: &str = "sharded_stream_events";
/// Routing table that fans writes across shards and unifies reads.
pub const DISTRIBUTED_STREAM_TABLE: &str = "stream_events";
/// Queue-attached source table the projection view reads from.
pub const QUEUE_STREAM_TABLE: &str = "queue_stream_events";
/// Continuous projection from the queue table into the routing table.
pub const STREAM_PROJECTION_VIEW: &str = "stream_events_mv";

/// Storage engine selection for a stream table. Decouples the engine choice
/// from the query logic: one emission routine renders the DDL for any
/// variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEngineSpec {
    /// Replicated merge tree with per-shard replica paths.
    Sharded { data_table: String },
    /// Replicated merge tree with a single logical shard.
    Replicated { data_table: String },
    /// Distributed routing engine over a sharded data table.
    Distributed {
        data_table: String,
        sharding_key: String,
    },
    /// Table attached to a message-queue topic.
    QueueBacked {
        topic: String,
        consumer_group: String,
    },
}

impl StorageEngineSpec {
    /// Renders the ENGINE clause.
    pub fn render(&self, config: &PipelineConfig) -> String {
        match self {
            StorageEngineSpec::Sharded { data_table } => format!(
                "ReplicatedMergeTree('/clickhouse/tables/{{shard}}/{data_table}', '{{replica}}')"
            ),
            StorageEngineSpec::Replicated { data_table } => format!(
                "ReplicatedMergeTree('/clickhouse/tables/noshard/{data_table}', '{{replica}}')"
            ),
            StorageEngineSpec::Distributed {
                data_table,
                sharding_key,
            } => format!(
                "Distributed('{cluster}', '{database}', '{data_table}', {sharding_key})",
                cluster = config.cluster,
                database = config.database,
            ),
            StorageEngineSpec::QueueBacked {
                topic,
                consumer_group,
            } => format!(
                "Kafka() SETTINGS kafka_broker_list = '{brokers}', kafka_topic_list = '{topic}', \
                 kafka_group_name = '{consumer_group}', kafka_format = 'JSONEachRow'",
                brokers = config.queue_brokers,
            ),
        }
    }
}

/// Column block shared by every stream table variant.
const STREAM_TABLE_COLUMNS: &str = "(
    uuid UUID,
    event VARCHAR,
    properties VARCHAR,
    timestamp DateTime64(6, 'UTC'),
    team_id Int64,
    distinct_id VARCHAR,
    elements_chain VARCHAR,
    created_at DateTime64(6, 'UTC'),
    _timestamp Nullable(DateTime)
)";

/// Renders a stream table definition for the chosen engine. `suffix` carries
/// engine-specific clauses (partitioning, ordering, TTL) and may be empty.
pub fn stream_table_sql(
    table_name: &str,
    config: &PipelineConfig,
    engine: &StorageEngineSpec,
    suffix: &str,
) -> String {
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {table_name} ON CLUSTER '{cluster}'\n{columns} ENGINE = {engine}",
        cluster = config.cluster,
        columns = STREAM_TABLE_COLUMNS,
        engine = engine.render(config),
    );
    if !suffix.is_empty() {
        sql.push('\n');
        sql.push_str(suffix);
    }
    sql
}

/// DDL for the physical sharded data table: ten-minute partitions for range
/// pruning, the canonical ordering key, and TTL-based expiry keyed off the
/// row timestamp.
pub fn sharded_stream_table_sql(config: &PipelineConfig) -> String {
    let engine = StorageEngineSpec::Sharded {
        data_table: SHARDED_STREAM_TABLE.to_string(),
    };
    let suffix = format!(
        "PARTITION BY toStartOfTenMinutes(timestamp)\n\
         ORDER BY (team_id, timestamp, event, cityHash64(distinct_id), cityHash64(uuid))\n\
         TTL toDateTime(timestamp) + INTERVAL {retention} DAY",
        retention = config.retention_days,
    );
    stream_table_sql(SHARDED_STREAM_TABLE, config, &engine, &suffix)
}

/// DDL for the distributed routing table. Writes land here and fan out to
/// the sharded table; reads also go through here so callers never see shard
/// membership.
pub fn distributed_stream_table_sql(config: &PipelineConfig) -> String {
    let engine = StorageEngineSpec::Distributed {
        data_table: SHARDED_STREAM_TABLE.to_string(),
        sharding_key: "rand()".to_string(),
    };
    stream_table_sql(DISTRIBUTED_STREAM_TABLE, config, &engine, "")
}

/// DDL for the queue-attached source table.
pub fn queue_stream_table_sql(config: &PipelineConfig) -> String {
    let engine = StorageEngineSpec::QueueBacked {
        topic: config.topic.clone(),
        consumer_group: config.consumer_group.clone(),
    };
    stream_table_sql(QUEUE_STREAM_TABLE, config, &engine, "")
}

/// DDL for the continuous projection view: field defaulting (provisional
/// timestamp, empty elements chain, epoch created_at) and the internal
/// event-type exclusion, matching what the in-process projector does.
pub fn stream_projection_view_sql(config: &PipelineConfig) -> String {
    let excluded = config
        .excluded_event_types
        .iter()
        .map(|event| format!("'{event}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE MATERIALIZED VIEW {view} ON CLUSTER '{cluster}'\n\
         TO {database}.{target}\n\
         AS SELECT\n\
         \tuuid,\n\
         \tevent,\n\
         \tproperties,\n\
         \ttoDateTime64(now(), 6, 'UTC') as timestamp,\n\
         \tteam_id,\n\
         \tdistinct_id,\n\
         \t'' as elements_chain,\n\
         \ttoDateTime64(0, 6, 'UTC') as created_at,\n\
         \t_timestamp\n\
         FROM {database}.{source}\n\
         WHERE event NOT IN ({excluded})",
        view = STREAM_PROJECTION_VIEW,
        cluster = config.cluster,
        database = config.database,
        target = DISTRIBUTED_STREAM_TABLE,
        source = QUEUE_STREAM_TABLE,
    )
}

/// All statements needed to stand the ingestion path up, in creation order.
pub fn bootstrap_statements(config: &PipelineConfig) -> Vec<String> {
    vec![
        sharded_stream_table_sql(config),
        distributed_stream_table_sql(config),
        queue_stream_table_sql(config),
        stream_projection_view_sql(config),
    ]
}
