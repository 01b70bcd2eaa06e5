use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default lateness margin applied before `interval_start` when filtering by
/// business timestamp.
pub const DEFAULT_LOOKBACK_DAYS: i32 = 1;

/// Margin applied after `interval_end` for events whose logical timestamp
/// trails their arrival.
const TRAILING_MARGIN_DAYS: i64 = 1;

/// Errors raised while constructing export windows or parsing modes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("interval_end {interval_end} must be after interval_start {interval_start}")]
    EmptyInterval {
        interval_start: DateTime<Utc>,
        interval_end: DateTime<Utc>,
    },
    #[error("lookback_days must be non-negative, got {0}")]
    NegativeLookback(i32),
    #[error("unknown windowing mode '{0}'")]
    UnknownMode(String),
}

/// Windowing mode selecting which filters bound an export scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Ingestion-watermark bounded plus lateness-extended timestamp bounds.
    /// Used for periodic incremental exports.
    Incremental,
    /// Ingestion-watermark bounded only; full business-time history.
    Unbounded,
    /// Business-timestamp bounded only; reprocesses a range regardless of
    /// when rows were originally ingested.
    Backfill,
}

impl WindowMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowMode::Incremental => "incremental",
            WindowMode::Unbounded => "unbounded",
            WindowMode::Backfill => "backfill",
        }
    }
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowMode {
    type Err = WindowError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "incremental" => Ok(WindowMode::Incremental),
            "unbounded" => Ok(WindowMode::Unbounded),
            "backfill" => Ok(WindowMode::Backfill),
            other => Err(WindowError::UnknownMode(other.to_string())),
        }
    }
}

/// Ephemeral query parameter object describing one export run. Collaborators
/// pass these parameters verbatim; the window performs all validation and is
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportWindow {
    team_id: i64,
    interval_start: DateTime<Utc>,
    interval_end: DateTime<Utc>,
    include_event_types: BTreeSet<String>,
    exclude_event_types: BTreeSet<String>,
    lookback_days: i32,
}

impl ExportWindow {
    /// Builds a window over the half-open interval `[start, end)`. Rejects
    /// empty or inverted intervals up front.
    pub fn new(
        team_id: i64,
        interval_start: DateTime<Utc>,
        interval_end: DateTime<Utc>,
    ) -> Result<Self, WindowError> {
        if interval_end <= interval_start {
            return Err(WindowError::EmptyInterval {
                interval_start,
                interval_end,
            });
        }
        Ok(Self {
            team_id,
            interval_start,
            interval_end,
            include_event_types: BTreeSet::new(),
            exclude_event_types: BTreeSet::new(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        })
    }

    /// Restricts the export to the given event types. An empty set means no
    /// restriction, not "exclude everything".
    pub fn with_include_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_event_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Removes the given event types from the export. Combines with the
    /// include set using AND semantics.
    pub fn with_exclude_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_event_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the lateness margin applied before `interval_start`.
    pub fn with_lookback_days(mut self, lookback_days: i32) -> Result<Self, WindowError> {
        if lookback_days < 0 {
            return Err(WindowError::NegativeLookback(lookback_days));
        }
        self.lookback_days = lookback_days;
        Ok(self)
    }

    pub fn team_id(&self) -> i64 {
        self.team_id
    }

    pub fn interval_start(&self) -> DateTime<Utc> {
        self.interval_start
    }

    pub fn interval_end(&self) -> DateTime<Utc> {
        self.interval_end
    }

    pub fn lookback_days(&self) -> i32 {
        self.lookback_days
    }

    pub fn include_event_types(&self) -> &BTreeSet<String> {
        &self.include_event_types
    }

    pub fn exclude_event_types(&self) -> &BTreeSet<String> {
        &self.exclude_event_types
    }

    /// Half-open membership test against the requested interval.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.interval_start && ts < self.interval_end
    }

    /// Lower bound of the business-timestamp filter: `interval_start` pushed
    /// back by the lookback margin for late arrivals.
    pub fn lagged_start(&self) -> DateTime<Utc> {
        self.interval_start - Duration::days(i64::from(self.lookback_days))
    }

    /// Upper bound of the business-timestamp filter: one extra day past
    /// `interval_end`, since event time and arrival time diverge.
    pub fn extended_end(&self) -> DateTime<Utc> {
        self.interval_end + Duration::days(TRAILING_MARGIN_DAYS)
    }

    /// Applies the include/exclude event-type filters.
    pub fn admits_event_type(&self, event_type: &str) -> bool {
        if !self.include_event_types.is_empty() && !self.include_event_types.contains(event_type) {
            return false;
        }
        !self.exclude_event_types.contains(event_type)
    }
}
