use crate::config::PipelineConfig;
use crate::dedup::{deduplicate_bounded, ExportedEvent};
use crate::reconcile::{reconcile_bounded, ReconcileError, ReconciledEntity};
use crate::store::{EntityKeyLog, EntityPayloadLog, EventLog};
use crate::telemetry::PipelineTelemetry;
use crate::window::{ExportWindow, WindowError, WindowMode};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors surfaced to export callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error(transparent)]
    Window(#[from] WindowError),
    /// Data-integrity violation; not retryable without operator action.
    #[error(transparent)]
    Integrity(#[from] ReconcileError),
    /// The caller-specified budget ran out. No partial rows were produced;
    /// the identical query can be retried safely.
    #[error("query exceeded its {budget_ms} ms budget")]
    Timeout { budget_ms: u64 },
}

impl QueryError {
    /// Whether an identical retry can succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Timeout { .. })
    }
}

/// A fully validated export query: window, mode, and optional time budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportQuery {
    window: ExportWindow,
    mode: WindowMode,
    budget: Option<Duration>,
}

impl ExportQuery {
    pub fn new(window: ExportWindow, mode: WindowMode) -> Self {
        Self {
            window,
            mode,
            budget: None,
        }
    }

    /// Builds a query from the raw parameters collaborators pass verbatim.
    /// Fails fast on inverted intervals, negative lookback, and unknown
    /// modes; nothing is silently corrected.
    #[allow(clippy::too_many_arguments)]
    pub fn from_params(
        team_id: i64,
        interval_start: DateTime<Utc>,
        interval_end: DateTime<Utc>,
        include_events: &[String],
        exclude_events: &[String],
        lookback_days: Option<i32>,
        mode: &str,
        default_lookback_days: i32,
    ) -> Result<Self, QueryError> {
        let mode = WindowMode::from_str(mode)?;
        let window = ExportWindow::new(team_id, interval_start, interval_end)?
            .with_include_event_types(include_events.iter().cloned())
            .with_exclude_event_types(exclude_events.iter().cloned())
            .with_lookback_days(lookback_days.unwrap_or(default_lookback_days))?;
        Ok(Self::new(window, mode))
    }

    /// Applies a hard wall-clock budget to the query.
    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn window(&self) -> &ExportWindow {
        &self.window
    }

    pub fn mode(&self) -> WindowMode {
        self.mode
    }
}

/// Assembles and executes bounded export queries against the log stores.
///
/// All queries are read-only and repeatable: they observe a snapshot of
/// committed data plus the window boundaries, so they may run concurrently
/// with ingestion and with each other without coordination.
#[derive(Debug)]
pub struct ExportAssembler {
    default_lookback_days: i32,
    telemetry: PipelineTelemetry,
}

impl ExportAssembler {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            default_lookback_days: config.lookback_days,
            telemetry: PipelineTelemetry::new(),
        }
    }

    pub fn default_lookback_days(&self) -> i32 {
        self.default_lookback_days
    }

    pub fn telemetry(&self) -> &PipelineTelemetry {
        &self.telemetry
    }

    /// Convenience wrapper over [`ExportQuery::from_params`] that applies the
    /// configured default lookback.
    pub fn assemble(
        &self,
        team_id: i64,
        interval_start: DateTime<Utc>,
        interval_end: DateTime<Utc>,
        include_events: &[String],
        exclude_events: &[String],
        lookback_days: Option<i32>,
        mode: &str,
    ) -> Result<ExportQuery, QueryError> {
        ExportQuery::from_params(
            team_id,
            interval_start,
            interval_end,
            include_events,
            exclude_events,
            lookback_days,
            mode,
            self.default_lookback_days,
        )
    }

    /// Runs the de-duplication view for the query. Collapse telemetry is
    /// recorded only when the query completes; a timed-out scan counts as a
    /// timeout and nothing else.
    pub fn events(
        &mut self,
        log: &EventLog,
        query: &ExportQuery,
    ) -> Result<Vec<ExportedEvent>, QueryError> {
        let deadline = QueryDeadline::start(query.budget);
        let outcome = match deduplicate_bounded(log, &query.window, query.mode, || {
            deadline.check()
        }) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.telemetry.queries_timed_out_total.saturating_inc();
                return Err(err);
            }
        };
        self.telemetry
            .duplicates_collapsed_total
            .saturating_add(outcome.collapsed);
        Ok(outcome.rows)
    }

    /// Runs the entity reconciler for the query's window. Windowing modes do
    /// not apply here; entity resolution is always watermark-bounded.
    pub fn persons(
        &mut self,
        keys: &EntityKeyLog,
        payloads: &EntityPayloadLog,
        query: &ExportQuery,
    ) -> Result<Vec<ReconciledEntity>, QueryError> {
        let deadline = QueryDeadline::start(query.budget);
        match reconcile_bounded(keys, payloads, &query.window, || deadline.check()) {
            Ok(entities) => Ok(entities),
            Err(err @ QueryError::Timeout { .. }) => {
                self.telemetry.queries_timed_out_total.saturating_inc();
                Err(err)
            }
            Err(err @ QueryError::Integrity(_)) => {
                self.telemetry.dangling_entities_total.saturating_inc();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

/// Cooperative deadline threaded through the scan loops as their
/// interruption check. A timed-out query returns no rows at all.
#[derive(Debug, Clone, Copy)]
struct QueryDeadline {
    started: Instant,
    budget: Option<Duration>,
}

impl QueryDeadline {
    fn start(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    fn check(&self) -> Result<(), QueryError> {
        match self.budget {
            Some(budget) if self.started.elapsed() >= budget => Err(QueryError::Timeout {
                budget_ms: budget.as_millis() as u64,
            }),
            _ => Ok(()),
        }
    }
}
