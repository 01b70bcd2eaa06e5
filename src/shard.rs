use crate::dedup::stable_hash64;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Width of the coarse time bucket used for partition pruning and retention.
pub const STREAM_BUCKET_MINUTES: u32 = 10;

/// Truncates a timestamp to the start of its ten-minute bucket.
pub fn bucket_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let minute = ts.minute() - ts.minute() % STREAM_BUCKET_MINUTES;
    Utc.with_ymd_and_hms(
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        minute,
        0,
    )
    .single()
    .unwrap_or(ts)
}

/// Row materialized from a queue message into the live stream store. Never
/// updated in place; expires after the configured retention window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardedStreamRow {
    pub uuid: uuid::Uuid,
    pub event_type: String,
    pub properties: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub team_id: i64,
    pub subject_id: String,
    pub elements_chain: String,
    pub created_at: DateTime<Utc>,
    pub written_at: Option<DateTime<Utc>>,
}

/// How writes fan out across the physical shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardingScheme {
    /// Uniform random distribution; the default when no key is meaningful.
    Random,
    /// Deterministic routing keyed by team id, keeping a team's rows
    /// colocated.
    ByTeam,
}

#[derive(Debug, Default, Clone)]
struct Shard {
    /// Rows grouped by ten-minute bucket so range scans and retention sweeps
    /// prune whole buckets.
    buckets: BTreeMap<DateTime<Utc>, Vec<ShardedStreamRow>>,
    rows: usize,
}

impl Shard {
    fn append(&mut self, row: ShardedStreamRow) {
        self.buckets
            .entry(bucket_start(row.timestamp))
            .or_default()
            .push(row);
        self.rows += 1;
    }

    fn purge_expired(&mut self, cutoff: DateTime<Utc>) -> usize {
        let bucket_width = Duration::minutes(i64::from(STREAM_BUCKET_MINUTES));
        let mut removed = 0;
        self.buckets.retain(|bucket, rows| {
            if *bucket + bucket_width <= cutoff {
                // Every row in the bucket is older than the cutoff.
                removed += rows.len();
                return false;
            }
            let before = rows.len();
            rows.retain(|row| row.timestamp > cutoff);
            removed += before - rows.len();
            !rows.is_empty()
        });
        self.rows -= removed;
        removed
    }
}

/// Stream store distributed across N physical shards with a routing layer
/// that fans writes out per the sharding scheme and presents reads over all
/// shards as a single logical relation.
///
/// Retention contract: rows are only guaranteed to survive for `retention`
/// past their `timestamp`. Physical removal happens in background
/// [`ShardedStreamStore::purge_expired`] sweeps, so queries must never assume
/// rows persist beyond the TTL.
#[derive(Debug, Clone)]
pub struct ShardedStreamStore {
    shards: Vec<Shard>,
    scheme: ShardingScheme,
    retention: Duration,
    max_rows_per_shard: Option<usize>,
}

impl ShardedStreamStore {
    /// Builds a store with `shard_count` shards and a TTL of `retention_days`
    /// keyed off each row's timestamp.
    pub fn new(shard_count: usize, retention_days: u32, scheme: ShardingScheme) -> Self {
        Self {
            shards: (0..shard_count.max(1)).map(|_| Shard::default()).collect(),
            scheme,
            retention: Duration::days(i64::from(retention_days)),
            max_rows_per_shard: None,
        }
    }

    /// Caps per-shard occupancy. Appends against a full shard report
    /// backpressure instead of dropping rows.
    pub fn with_max_rows_per_shard(mut self, max_rows: usize) -> Self {
        self.max_rows_per_shard = Some(max_rows);
        self
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn scheme(&self) -> ShardingScheme {
        self.scheme
    }

    /// Total rows across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn route(&self, row: &ShardedStreamRow) -> usize {
        match self.scheme {
            ShardingScheme::Random => rand::thread_rng().gen_range(0..self.shards.len()),
            ShardingScheme::ByTeam => {
                (stable_hash64(&row.team_id.to_be_bytes()) as usize) % self.shards.len()
            }
        }
    }

    /// Routes the row to a shard. `Err(row)` hands the row back when the
    /// target shard is at capacity, so the caller can hold and retry it.
    pub fn append(&mut self, row: ShardedStreamRow) -> Result<(), ShardedStreamRow> {
        let idx = self.route(&row);
        if let Some(max_rows) = self.max_rows_per_shard {
            if self.shards[idx].rows >= max_rows {
                return Err(row);
            }
        }
        self.shards[idx].append(row);
        Ok(())
    }

    /// Removes rows older than the retention window relative to `now`.
    /// Models the storage engine's background TTL job; returns the number of
    /// rows dropped.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        self.shards
            .iter_mut()
            .map(|shard| shard.purge_expired(cutoff))
            .sum()
    }

    /// Reads the whole store as one ordered logical relation. Shard
    /// membership is not observable in the result.
    pub fn scan(&self) -> Vec<ShardedStreamRow> {
        let mut rows: Vec<ShardedStreamRow> = self
            .shards
            .iter()
            .flat_map(|shard| shard.buckets.values().flatten().cloned())
            .collect();
        sort_rows(&mut rows);
        rows
    }

    /// Reads rows whose timestamp falls in `[start, end)`, pruning whole
    /// buckets outside the range before touching individual rows.
    pub fn scan_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<ShardedStreamRow> {
        let first_bucket = bucket_start(start);
        let mut rows: Vec<ShardedStreamRow> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .buckets
                    .range(first_bucket..end)
                    .flat_map(|(_, rows)| rows.iter())
                    .filter(|row| row.timestamp >= start && row.timestamp < end)
                    .cloned()
            })
            .collect();
        sort_rows(&mut rows);
        rows
    }
}

/// Canonical read ordering: team, time, event type, then stable hashes of the
/// subject and event ids.
fn sort_rows(rows: &mut [ShardedStreamRow]) {
    rows.sort_by(|a, b| {
        a.team_id
            .cmp(&b.team_id)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.event_type.cmp(&b.event_type))
            .then_with(|| {
                stable_hash64(a.subject_id.as_bytes())
                    .cmp(&stable_hash64(b.subject_id.as_bytes()))
            })
            .then_with(|| {
                stable_hash64(a.uuid.to_string().as_bytes())
                    .cmp(&stable_hash64(b.uuid.to_string().as_bytes()))
            })
    });
}
