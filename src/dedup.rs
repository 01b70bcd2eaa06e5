use crate::store::{EventLog, EventRecord};
use crate::window::{ExportWindow, WindowMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::convert::Infallible;

/// Candidates processed between cooperative interruption checks.
const CHECK_INTERVAL: usize = 1024;

/// Stable 64-bit digest of an arbitrary byte string. SHA-256 truncated to the
/// leading eight bytes so collision keys are identical across processes and
/// toolchains, which keeps repeated export runs byte-identical.
pub fn stable_hash64(input: &[u8]) -> u64 {
    let digest = Sha256::digest(input);
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Identity of a logical event. Two physical rows with the same collision key
/// are redeliveries of one event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollisionKey {
    pub team_id: i64,
    pub event_type: String,
    pub subject_hash: u64,
    pub event_id_hash: u64,
}

impl CollisionKey {
    pub fn for_record(record: &EventRecord) -> Self {
        Self {
            team_id: record.team_id,
            event_type: record.event_type.clone(),
            subject_hash: stable_hash64(record.subject_id.as_bytes()),
            event_id_hash: stable_hash64(record.uuid.to_string().as_bytes()),
        }
    }
}

/// Export-ready event row surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedEvent {
    pub team_id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub subject_id: String,
    pub uuid: String,
    pub inserted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub elements_chain: String,
    pub person_id: Option<String>,
    pub properties: Option<String>,
    pub person_properties: Option<String>,
    pub set: Option<String>,
    pub set_once: Option<String>,
}

impl ExportedEvent {
    fn from_record(record: &EventRecord) -> Self {
        let properties = coerce_empty(record.properties.clone());
        let set = extract_string_field(properties.as_deref(), "$set");
        let set_once = extract_string_field(properties.as_deref(), "$set_once");
        Self {
            team_id: record.team_id,
            timestamp: record.timestamp,
            event_type: record.event_type.clone(),
            subject_id: record.subject_id.clone(),
            uuid: record.uuid.to_string(),
            inserted_at: record.ingestion_watermark(),
            created_at: record.created_at,
            elements_chain: record.elements_chain.clone(),
            person_id: record.person_id.map(|id| id.to_string()),
            properties,
            person_properties: coerce_empty(record.person_properties.clone()),
            set,
            set_once,
        }
    }
}

/// Empty strings in the opaque property blobs are treated as absent.
fn coerce_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Extracts a string-typed sub-field from a serialized property map. Missing
/// keys, non-string values, unparseable blobs, and empty strings all coerce
/// to `None`.
fn extract_string_field(properties: Option<&str>, field: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(properties?).ok()?;
    match parsed.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Result of a de-duplication pass: the representative rows plus the number
/// of duplicate deliveries that were collapsed away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    pub rows: Vec<ExportedEvent>,
    pub collapsed: u64,
}

/// Projects the raw event log into one representative row per logical event.
///
/// Candidates are bounded according to the windowing mode, ordered by
/// (ingestion watermark, event type, uuid), and the first row per collision
/// key wins. The ordering makes the representative pick stable across export
/// retries: redelivered rows differ only in their ingestion watermark, and
/// the smallest one is always chosen.
pub fn deduplicate(log: &EventLog, window: &ExportWindow, mode: WindowMode) -> Vec<ExportedEvent> {
    deduplicate_with_stats(log, window, mode).rows
}

/// As [`deduplicate`], reporting how many duplicates were collapsed.
pub fn deduplicate_with_stats(
    log: &EventLog,
    window: &ExportWindow,
    mode: WindowMode,
) -> DedupOutcome {
    match deduplicate_bounded::<Infallible, _>(log, window, mode, || Ok(())) {
        Ok(outcome) => outcome,
        Err(never) => match never {},
    }
}

/// As [`deduplicate_with_stats`], with a cooperative interruption check
/// invoked before the scan and every [`CHECK_INTERVAL`] candidates, so a
/// caller-imposed budget cuts a long scan short instead of overshooting by
/// its whole runtime. An interrupted scan produces no rows at all.
pub fn deduplicate_bounded<E, F>(
    log: &EventLog,
    window: &ExportWindow,
    mode: WindowMode,
    mut check: F,
) -> Result<DedupOutcome, E>
where
    F: FnMut() -> Result<(), E>,
{
    check()?;
    let team_id = window.team_id();
    let source: Box<dyn Iterator<Item = &EventRecord>> = match mode {
        // Backfill ignores ingestion watermarks entirely.
        WindowMode::Backfill => Box::new(log.rows_for_team(team_id)),
        WindowMode::Incremental | WindowMode::Unbounded => Box::new(
            log.scan_watermark_range(window.interval_start(), window.interval_end())
                .filter(move |record| record.team_id == team_id),
        ),
    };

    let mut candidates: Vec<&EventRecord> = Vec::new();
    for (idx, record) in source.enumerate() {
        if idx > 0 && idx % CHECK_INTERVAL == 0 {
            check()?;
        }
        if admits(record, window, mode) {
            candidates.push(record);
        }
    }

    candidates.sort_by(|a, b| {
        a.ingestion_watermark()
            .cmp(&b.ingestion_watermark())
            .then_with(|| a.event_type.cmp(&b.event_type))
            .then_with(|| a.uuid.cmp(&b.uuid))
    });

    let candidate_count = candidates.len();
    let mut seen: HashSet<CollisionKey> = HashSet::with_capacity(candidate_count);
    let mut rows = Vec::new();
    for (idx, record) in candidates.into_iter().enumerate() {
        if idx > 0 && idx % CHECK_INTERVAL == 0 {
            check()?;
        }
        if seen.insert(CollisionKey::for_record(record)) {
            rows.push(ExportedEvent::from_record(record));
        }
    }
    Ok(DedupOutcome {
        collapsed: (candidate_count - rows.len()) as u64,
        rows,
    })
}

/// Mode-specific business-timestamp bounds plus the event-type filters. The
/// ingestion-watermark bound for the watermark-bounded modes is applied by
/// the candidate scan in [`deduplicate_bounded`].
fn admits(record: &EventRecord, window: &ExportWindow, mode: WindowMode) -> bool {
    if !window.admits_event_type(&record.event_type) {
        return false;
    }
    match mode {
        WindowMode::Incremental => {
            record.timestamp >= window.lagged_start()
                && record.timestamp < window.extended_end()
        }
        WindowMode::Unbounded => true,
        WindowMode::Backfill => {
            record.timestamp >= window.interval_start() && record.timestamp < window.interval_end()
        }
    }
}
