use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default TTL for live stream rows.
pub const DEFAULT_RETENTION_DAYS: u32 = 1;

/// Errors surfaced while loading or mutating pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("config patch must be a JSON object")]
    NonObjectPatch,
    #[error("unknown config version {0}")]
    UnknownVersion(u64),
}

/// Knob classification used when applying live patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKnobClass {
    /// Takes effect on the next export/ingest step.
    Dynamic,
    /// Requires the pipeline process to restart.
    Restart,
}

/// Effect of an accepted config change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigImpact {
    NoChange,
    Dynamic,
    RequiresRestart,
}

/// Explicit settings parameterizing every table/view definition and the
/// runtime defaults. Passed to construction; never ambient global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Physical cluster topology identifier.
    pub cluster: String,
    /// Source message-queue topic.
    pub topic: String,
    /// Logical database namespace.
    pub database: String,
    /// Broker list for the queue-backed source table.
    pub queue_brokers: String,
    /// Consumer group of the ingestion projector. Must never be shared with
    /// other consumers of the topic.
    pub consumer_group: String,
    /// TTL for live stream rows, in days.
    pub retention_days: u32,
    /// Default lateness margin for incremental exports, in days.
    pub lookback_days: i32,
    /// Physical shard count of the stream store.
    pub shard_count: usize,
    /// Event types dropped by the projector before materialization.
    pub excluded_event_types: BTreeSet<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut excluded_event_types = BTreeSet::new();
        excluded_event_types.insert(crate::projector::DEFAULT_EXCLUDED_EVENT.to_string());
        Self {
            cluster: "analytics".to_string(),
            topic: "events_ingestion".to_string(),
            database: "analytics".to_string(),
            queue_brokers: "kafka:9092".to_string(),
            consumer_group: "stream_events_group".to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
            lookback_days: crate::window::DEFAULT_LOOKBACK_DAYS,
            shard_count: 8,
            excluded_event_types,
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a config from a JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let payload = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&payload)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.is_empty() {
            return Err(ConfigError::Invalid("cluster must not be empty".into()));
        }
        if self.topic.is_empty() {
            return Err(ConfigError::Invalid("topic must not be empty".into()));
        }
        if self.database.is_empty() {
            return Err(ConfigError::Invalid("database must not be empty".into()));
        }
        if self.consumer_group.is_empty() {
            return Err(ConfigError::Invalid(
                "consumer_group must not be empty".into(),
            ));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::Invalid(
                "retention_days must be at least 1".into(),
            ));
        }
        if self.lookback_days < 0 {
            return Err(ConfigError::Invalid(
                "lookback_days must be non-negative".into(),
            ));
        }
        if self.shard_count == 0 {
            return Err(ConfigError::Invalid("shard_count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Result of an accepted config patch or rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigPatchResult {
    pub version: u64,
    pub impact: ConfigImpact,
    pub changed_keys: Vec<String>,
}

impl ConfigPatchResult {
    fn no_change(version: u64) -> Self {
        Self {
            version,
            impact: ConfigImpact::NoChange,
            changed_keys: Vec::new(),
        }
    }
}

/// Counters exposed by the config service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigTelemetry {
    pub version: u64,
    pub validation_failures_total: u64,
}

/// Tracks versioned pipeline configuration: live JSON patches against the
/// typed config, knob impact classification, and rollback to any prior
/// version.
#[derive(Debug, Clone)]
pub struct ConfigService {
    current_version: u64,
    current: PipelineConfig,
    snapshots: BTreeMap<u64, PipelineConfig>,
    knob_catalog: BTreeMap<&'static str, ConfigKnobClass>,
    telemetry: ConfigTelemetry,
}

impl ConfigService {
    /// Seeds the service with a validated initial configuration.
    pub fn new(initial: PipelineConfig) -> Result<Self, ConfigError> {
        initial.validate()?;
        let mut snapshots = BTreeMap::new();
        snapshots.insert(1, initial.clone());
        Ok(Self {
            current_version: 1,
            current: initial,
            snapshots,
            knob_catalog: knob_catalog(),
            telemetry: ConfigTelemetry {
                version: 1,
                validation_failures_total: 0,
            },
        })
    }

    pub fn version(&self) -> u64 {
        self.current_version
    }

    pub fn current(&self) -> &PipelineConfig {
        &self.current
    }

    pub fn telemetry(&self) -> ConfigTelemetry {
        self.telemetry
    }

    /// Applies a partial JSON patch. Unknown knobs and values that fail
    /// validation are rejected without touching the active config.
    pub fn patch(&mut self, patch: Value) -> Result<ConfigPatchResult, ConfigError> {
        let patch_map = match patch.as_object() {
            Some(map) => map.clone(),
            None => {
                self.telemetry.validation_failures_total += 1;
                return Err(ConfigError::NonObjectPatch);
            }
        };
        let mut merged = match serde_json::to_value(&self.current)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch_map {
            merged.insert(key, value);
        }
        let next: PipelineConfig = match serde_json::from_value(Value::Object(merged)) {
            Ok(next) => next,
            Err(err) => {
                self.telemetry.validation_failures_total += 1;
                return Err(ConfigError::Parse(err));
            }
        };
        if let Err(err) = next.validate() {
            self.telemetry.validation_failures_total += 1;
            return Err(err);
        }
        self.commit(next)
    }

    /// Reverts to a prior version, recording the revert as a new version.
    pub fn rollback(&mut self, to_version: u64) -> Result<ConfigPatchResult, ConfigError> {
        if to_version == self.current_version {
            return Ok(ConfigPatchResult::no_change(self.current_version));
        }
        let snapshot = self
            .snapshots
            .get(&to_version)
            .cloned()
            .ok_or(ConfigError::UnknownVersion(to_version))?;
        self.commit(snapshot)
    }

    fn commit(&mut self, next: PipelineConfig) -> Result<ConfigPatchResult, ConfigError> {
        let changed_keys = self.changed_keys(&next)?;
        if changed_keys.is_empty() {
            return Ok(ConfigPatchResult::no_change(self.current_version));
        }
        let impact = self.classify(&changed_keys);
        self.current_version += 1;
        self.current = next.clone();
        self.snapshots.insert(self.current_version, next);
        self.telemetry.version = self.current_version;
        Ok(ConfigPatchResult {
            version: self.current_version,
            impact,
            changed_keys,
        })
    }

    fn changed_keys(&self, next: &PipelineConfig) -> Result<Vec<String>, ConfigError> {
        let current = serde_json::to_value(&self.current)?;
        let next = serde_json::to_value(next)?;
        let (Value::Object(current), Value::Object(next)) = (current, next) else {
            return Ok(Vec::new());
        };
        let mut changed: Vec<String> = next
            .iter()
            .filter(|&(key, value)| current.get(key.as_str()) != Some(value))
            .map(|(key, _)| key.clone())
            .collect();
        changed.sort();
        Ok(changed)
    }

    fn classify(&self, changed_keys: &[String]) -> ConfigImpact {
        let restart = changed_keys.iter().any(|key| {
            matches!(
                self.knob_catalog.get(key.as_str()),
                Some(ConfigKnobClass::Restart) | None
            )
        });
        if restart {
            ConfigImpact::RequiresRestart
        } else {
            ConfigImpact::Dynamic
        }
    }
}

fn knob_catalog() -> BTreeMap<&'static str, ConfigKnobClass> {
    BTreeMap::from([
        ("cluster", ConfigKnobClass::Restart),
        ("topic", ConfigKnobClass::Restart),
        ("database", ConfigKnobClass::Restart),
        ("queue_brokers", ConfigKnobClass::Restart),
        ("consumer_group", ConfigKnobClass::Restart),
        ("shard_count", ConfigKnobClass::Restart),
        ("retention_days", ConfigKnobClass::Dynamic),
        ("lookback_days", ConfigKnobClass::Dynamic),
        ("excluded_event_types", ConfigKnobClass::Dynamic),
    ])
}
