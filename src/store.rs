use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One mutation of the entity-key mapping log: binds an externally visible
/// entity key (e.g. a distinct id) to a canonical entity id at a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityKeyRecord {
    pub team_id: i64,
    pub entity_key: String,
    pub entity_id: Uuid,
    pub version: i64,
    pub watermark: DateTime<Utc>,
}

/// One mutation of the entity payload log, keyed by the canonical entity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPayloadRecord {
    pub team_id: i64,
    pub entity_id: Uuid,
    pub version: i64,
    pub properties: String,
    pub watermark: DateTime<Utc>,
}

/// Raw captured event. Append-only and immutable once written, but the same
/// logical event may appear more than once (at-least-once delivery upstream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub team_id: i64,
    pub event_type: String,
    pub subject_id: String,
    pub uuid: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Ingestion watermark stamped by the write path, when available.
    pub inserted_at: Option<DateTime<Utc>>,
    /// Fallback watermark stamped by the storage engine on write.
    pub written_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub elements_chain: String,
    pub properties: Option<String>,
    pub person_id: Option<Uuid>,
    pub person_properties: Option<String>,
}

impl EventRecord {
    /// Effective ingestion watermark: `inserted_at` coalesced to `written_at`.
    pub fn ingestion_watermark(&self) -> DateTime<Utc> {
        self.inserted_at.unwrap_or(self.written_at)
    }
}

/// Errors raised by the append paths of the versioned logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error(
        "version {version} for entity key '{entity_key}' (team {team_id}) regresses below {current}"
    )]
    KeyVersionRegression {
        team_id: i64,
        entity_key: String,
        version: i64,
        current: i64,
    },
    #[error("version {version} for entity {entity_id} (team {team_id}) regresses below {current}")]
    PayloadVersionRegression {
        team_id: i64,
        entity_id: Uuid,
        version: i64,
        current: i64,
    },
}

/// Append-only log of entity-key mutations.
///
/// The write path enforces per-key version monotonicity: a version lower than
/// the highest already observed for the same (team, key) is rejected. Equal
/// versions are accepted (replica replays) and resolved deterministically at
/// read time by the reconciler.
#[derive(Debug, Default, Clone)]
pub struct EntityKeyLog {
    records: Vec<EntityKeyRecord>,
}

impl EntityKeyLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mutation, rejecting version regressions.
    pub fn append(&mut self, record: EntityKeyRecord) -> Result<(), StoreError> {
        let current = self
            .records
            .iter()
            .filter(|r| r.team_id == record.team_id && r.entity_key == record.entity_key)
            .map(|r| r.version)
            .max();
        if let Some(current) = current {
            if record.version < current {
                return Err(StoreError::KeyVersionRegression {
                    team_id: record.team_id,
                    entity_key: record.entity_key,
                    version: record.version,
                    current,
                });
            }
        }
        self.records.push(record);
        Ok(())
    }

    /// All mutations recorded for a team, in append order.
    pub fn rows_for_team(&self, team_id: i64) -> impl Iterator<Item = &EntityKeyRecord> {
        self.records.iter().filter(move |r| r.team_id == team_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Append-only log of entity payload mutations, same monotonicity contract as
/// [`EntityKeyLog`] but keyed by entity id.
#[derive(Debug, Default, Clone)]
pub struct EntityPayloadLog {
    records: Vec<EntityPayloadRecord>,
}

impl EntityPayloadLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: EntityPayloadRecord) -> Result<(), StoreError> {
        let current = self
            .records
            .iter()
            .filter(|r| r.team_id == record.team_id && r.entity_id == record.entity_id)
            .map(|r| r.version)
            .max();
        if let Some(current) = current {
            if record.version < current {
                return Err(StoreError::PayloadVersionRegression {
                    team_id: record.team_id,
                    entity_id: record.entity_id,
                    version: record.version,
                    current,
                });
            }
        }
        self.records.push(record);
        Ok(())
    }

    pub fn rows_for_team(&self, team_id: i64) -> impl Iterator<Item = &EntityPayloadRecord> {
        self.records.iter().filter(move |r| r.team_id == team_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Append-only event log. Accepts duplicates; readers de-duplicate at query
/// time. Scans observe a snapshot of everything appended before the call, and
/// exports never write, so concurrent export runs cannot disturb each other.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: EventRecord) {
        self.records.push(record);
    }

    /// All events recorded for a team, in append order.
    pub fn rows_for_team(&self, team_id: i64) -> impl Iterator<Item = &EventRecord> {
        self.records.iter().filter(move |r| r.team_id == team_id)
    }

    /// Events whose ingestion watermark falls inside the half-open range.
    /// This is the cheap pre-filter used for incremental exports.
    pub fn scan_watermark_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &EventRecord> {
        self.records
            .iter()
            .filter(move |r| r.ingestion_watermark() >= start && r.ingestion_watermark() < end)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
