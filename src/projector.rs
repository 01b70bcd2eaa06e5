use crate::queue::{TopicConsumer, TopicMessage};
use crate::shard::{ShardedStreamRow, ShardedStreamStore};
use crate::telemetry::PipelineTelemetry;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

/// Internal system event type dropped before materialization.
pub const DEFAULT_EXCLUDED_EVENT: &str = "$snapshot";

const DEFAULT_RETRY_BASE_MS: u64 = 50;
const DEFAULT_RETRY_MAX_MS: u64 = 5_000;

/// Lifecycle of the ingestion projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectorState {
    NotStarted,
    Consuming,
    Backpressured,
    Stopped,
}

/// Errors raised by the projector control surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectorError {
    #[error("projector is not running (state {state:?})")]
    NotRunning { state: ProjectorState },
    #[error("projector already started")]
    AlreadyStarted,
}

/// Write side of the materialization target. The sink may report
/// backpressure (`Full`) or a transient fault (`Unavailable`); in both cases
/// the projector holds the in-flight message and retries, never dropping it.
pub trait StreamSink {
    fn try_append(&mut self, row: ShardedStreamRow) -> Result<(), SinkError>;
}

/// Failure modes of a stream sink write.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink at capacity")]
    Full,
    #[error("sink temporarily unavailable")]
    Unavailable,
}

impl StreamSink for ShardedStreamStore {
    fn try_append(&mut self, row: ShardedStreamRow) -> Result<(), SinkError> {
        self.append(row).map_err(|_| SinkError::Full)
    }
}

/// Result of a single projection step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No message available; the consumer blocks on arrival.
    Idle,
    /// Message materialized and acknowledged.
    Projected,
    /// Message matched the exclusion predicate and was dropped pre-storage.
    Filtered,
    /// Sink pushed back; the message stays in flight and will be retried
    /// after the current backoff delay.
    Backpressured,
}

/// Exponential backoff schedule for sink retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryBackoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl RetryBackoff {
    fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    fn next_delay_ms(&mut self) -> u64 {
        let delay = self
            .base_ms
            .saturating_mul(1u64 << self.attempt.min(20))
            .min(self.max_ms);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Continuously materializes queue messages into the sharded stream store.
///
/// One projector runs per shard of the source topic; within it, messages are
/// projected strictly in arrival order. A message is acknowledged only after
/// the sink accepts its row, so a crash or sink outage replays rather than
/// loses messages. Cross-shard ordering is not guaranteed; downstream
/// reconciliation relies on watermark comparisons only.
pub struct IngestProjector<C: TopicConsumer, S: StreamSink> {
    consumer: C,
    sink: S,
    state: ProjectorState,
    excluded_event_types: BTreeSet<String>,
    backoff: RetryBackoff,
    last_retry_delay_ms: u64,
    telemetry: PipelineTelemetry,
}

impl<C: TopicConsumer, S: StreamSink> IngestProjector<C, S> {
    pub fn new(consumer: C, sink: S) -> Self {
        let mut excluded_event_types = BTreeSet::new();
        excluded_event_types.insert(DEFAULT_EXCLUDED_EVENT.to_string());
        Self {
            consumer,
            sink,
            state: ProjectorState::NotStarted,
            excluded_event_types,
            backoff: RetryBackoff::new(DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS),
            last_retry_delay_ms: 0,
            telemetry: PipelineTelemetry::new(),
        }
    }

    /// Replaces the exclusion predicate.
    pub fn with_excluded_event_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.excluded_event_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn state(&self) -> ProjectorState {
        self.state
    }

    pub fn telemetry(&self) -> &PipelineTelemetry {
        &self.telemetry
    }

    /// Delay to wait before the next poll after a backpressured outcome.
    pub fn retry_delay_ms(&self) -> u64 {
        self.last_retry_delay_ms
    }

    /// Read access to the materialization target.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Transitions NotStarted → Consuming.
    pub fn start(&mut self) -> Result<(), ProjectorError> {
        match self.state {
            ProjectorState::NotStarted => {
                self.state = ProjectorState::Consuming;
                Ok(())
            }
            _ => Err(ProjectorError::AlreadyStarted),
        }
    }

    /// Terminal transition; a stopped projector refuses further polls.
    pub fn stop(&mut self) {
        self.state = ProjectorState::Stopped;
    }

    /// Consumes at most one message. `now` is the projection wall-clock used
    /// to synthesize the provisional timestamp.
    pub fn poll_once(&mut self, now: DateTime<Utc>) -> Result<PollOutcome, ProjectorError> {
        match self.state {
            ProjectorState::Consuming | ProjectorState::Backpressured => {}
            state => return Err(ProjectorError::NotRunning { state }),
        }

        let message = match self.consumer.poll() {
            Some(message) => message,
            None => return Ok(PollOutcome::Idle),
        };

        if self.excluded_event_types.contains(&message.event_type) {
            self.consumer.ack();
            self.telemetry.filtered_messages_total.saturating_inc();
            return Ok(PollOutcome::Filtered);
        }

        match self.sink.try_append(project(&message, now)) {
            Ok(()) => {
                self.consumer.ack();
                self.backoff.reset();
                self.last_retry_delay_ms = 0;
                if self.state == ProjectorState::Backpressured {
                    self.state = ProjectorState::Consuming;
                }
                self.telemetry.projected_rows_total.saturating_inc();
                Ok(PollOutcome::Projected)
            }
            Err(SinkError::Full) | Err(SinkError::Unavailable) => {
                if self.state != ProjectorState::Backpressured {
                    self.state = ProjectorState::Backpressured;
                    self.telemetry.backpressure_transitions_total.saturating_inc();
                }
                self.telemetry.sink_retries_total.saturating_inc();
                self.last_retry_delay_ms = self.backoff.next_delay_ms();
                Ok(PollOutcome::Backpressured)
            }
        }
    }

    /// Drains the topic until the consumer reports no message or the sink
    /// pushes back. Convenience loop for embedded use and tests.
    pub fn drain(&mut self, now: DateTime<Utc>) -> Result<usize, ProjectorError> {
        let mut projected = 0;
        loop {
            match self.poll_once(now)? {
                PollOutcome::Projected => projected += 1,
                PollOutcome::Filtered => {}
                PollOutcome::Idle | PollOutcome::Backpressured => return Ok(projected),
            }
        }
    }
}

/// Field projection and defaulting applied to every materialized message.
/// The real event time is not known yet, so `timestamp` is provisionally the
/// projection time and `created_at` is pinned to the epoch.
fn project(message: &TopicMessage, now: DateTime<Utc>) -> ShardedStreamRow {
    ShardedStreamRow {
        uuid: message.uuid,
        event_type: message.event_type.clone(),
        properties: message.properties.clone(),
        timestamp: now,
        team_id: message.team_id,
        subject_id: message.subject_id.clone(),
        elements_chain: String::new(),
        created_at: Utc.timestamp_opt(0, 0).single().unwrap_or(now),
        written_at: message.written_at,
    }
}
