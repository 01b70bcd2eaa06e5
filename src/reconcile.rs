use crate::store::{EntityKeyLog, EntityPayloadLog};
use crate::window::ExportWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Records processed between cooperative interruption checks.
const CHECK_INTERVAL: usize = 1024;

/// Errors raised while reconciling the versioned entity logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// A resolved entity key points at an entity id with no payload record.
    /// Downstream export consumers cannot tolerate dangling keys, so this is
    /// fatal for the query rather than a silent drop.
    #[error("entity key '{entity_key}' (team {team_id}) resolves to {entity_id} which has no payload record")]
    DanglingEntity {
        team_id: i64,
        entity_key: String,
        entity_id: Uuid,
    },
}

/// Authoritative current version of a mutable entity, derived at read time.
/// Exists only as a query result; there is no backing storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledEntity {
    pub team_id: i64,
    pub entity_key: String,
    pub entity_id: Uuid,
    pub key_version: i64,
    pub payload_version: i64,
    pub properties: String,
    /// Whether the key→entity mapping changed inside the window.
    pub key_updated: bool,
    /// Whether the payload changed inside the window.
    pub payload_updated: bool,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ResolvedKey {
    entity_id: Uuid,
    version: i64,
    watermark: DateTime<Utc>,
}

#[derive(Debug)]
struct ResolvedPayload {
    version: i64,
    properties: String,
    watermark: DateTime<Utc>,
}

/// Resolves the authoritative version of every entity touched within the
/// window.
///
/// Both logs are grouped per key, the highest version wins, and version ties
/// (not expected under the monotonic write contract, but tolerated) break
/// deterministically towards the higher watermark. A row is emitted only when
/// the key side or the payload side changed inside the window; `inserted_at`
/// is the earlier of the two watermarks when both sides changed, so an
/// incremental downstream consumer never misses an update.
pub fn reconcile(
    keys: &EntityKeyLog,
    payloads: &EntityPayloadLog,
    window: &ExportWindow,
) -> Result<Vec<ReconciledEntity>, ReconcileError> {
    reconcile_bounded(keys, payloads, window, || Ok(()))
}

/// As [`reconcile`], with a cooperative interruption check invoked before
/// resolution and every [`CHECK_INTERVAL`] records, so a caller-imposed
/// budget cuts a long resolution short instead of overshooting by its whole
/// runtime. An interrupted query produces no rows at all.
pub fn reconcile_bounded<E, F>(
    keys: &EntityKeyLog,
    payloads: &EntityPayloadLog,
    window: &ExportWindow,
    mut check: F,
) -> Result<Vec<ReconciledEntity>, E>
where
    E: From<ReconcileError>,
    F: FnMut() -> Result<(), E>,
{
    check()?;
    let team_id = window.team_id();

    let mut resolved_payloads: HashMap<Uuid, ResolvedPayload> = HashMap::new();
    for (idx, record) in payloads.rows_for_team(team_id).enumerate() {
        if idx > 0 && idx % CHECK_INTERVAL == 0 {
            check()?;
        }
        match resolved_payloads.get_mut(&record.entity_id) {
            Some(current) if !wins(record.version, record.watermark, current.version, current.watermark) => {}
            Some(current) => {
                current.version = record.version;
                current.properties = record.properties.clone();
                current.watermark = record.watermark;
            }
            None => {
                resolved_payloads.insert(
                    record.entity_id,
                    ResolvedPayload {
                        version: record.version,
                        properties: record.properties.clone(),
                        watermark: record.watermark,
                    },
                );
            }
        }
    }

    let mut resolved_keys: HashMap<String, ResolvedKey> = HashMap::new();
    for (idx, record) in keys.rows_for_team(team_id).enumerate() {
        if idx > 0 && idx % CHECK_INTERVAL == 0 {
            check()?;
        }
        match resolved_keys.get_mut(&record.entity_key) {
            Some(current) if !wins(record.version, record.watermark, current.version, current.watermark) => {}
            Some(current) => {
                current.version = record.version;
                current.entity_id = record.entity_id;
                current.watermark = record.watermark;
            }
            None => {
                resolved_keys.insert(
                    record.entity_key.clone(),
                    ResolvedKey {
                        entity_id: record.entity_id,
                        version: record.version,
                        watermark: record.watermark,
                    },
                );
            }
        }
    }

    let mut entities = Vec::new();
    for (idx, (entity_key, key_side)) in resolved_keys.iter().enumerate() {
        if idx > 0 && idx % CHECK_INTERVAL == 0 {
            check()?;
        }
        let payload_side = resolved_payloads.get(&key_side.entity_id).ok_or_else(|| {
            ReconcileError::DanglingEntity {
                team_id,
                entity_key: entity_key.clone(),
                entity_id: key_side.entity_id,
            }
        })?;

        let key_updated = window.contains(key_side.watermark);
        let payload_updated = window.contains(payload_side.watermark);
        let inserted_at = match (key_updated, payload_updated) {
            // Both sides changed: take the earlier watermark as a
            // conservative lower bound for incremental consumers.
            (true, true) => cmp::min(key_side.watermark, payload_side.watermark),
            (true, false) => key_side.watermark,
            (false, true) => payload_side.watermark,
            (false, false) => continue,
        };

        entities.push(ReconciledEntity {
            team_id,
            entity_key: entity_key.clone(),
            entity_id: key_side.entity_id,
            key_version: key_side.version,
            payload_version: payload_side.version,
            properties: payload_side.properties.clone(),
            key_updated,
            payload_updated,
            inserted_at,
        });
    }

    entities.sort_by(|a, b| {
        a.inserted_at
            .cmp(&b.inserted_at)
            .then_with(|| a.entity_key.cmp(&b.entity_key))
    });
    Ok(entities)
}

/// True when (version, watermark) beats the current winner. Higher version
/// wins outright; equal versions break towards the higher watermark.
fn wins(
    version: i64,
    watermark: DateTime<Utc>,
    current_version: i64,
    current_watermark: DateTime<Utc>,
) -> bool {
    version > current_version || (version == current_version && watermark > current_watermark)
}
