use serde::Serialize;

pub const PROJECTED_ROWS_TOTAL: &str = "colstream_projected_rows_total";
pub const FILTERED_MESSAGES_TOTAL: &str = "colstream_filtered_messages_total";
pub const BACKPRESSURE_TRANSITIONS_TOTAL: &str = "colstream_backpressure_transitions_total";
pub const SINK_RETRIES_TOTAL: &str = "colstream_sink_retries_total";
pub const DUPLICATES_COLLAPSED_TOTAL: &str = "colstream_duplicates_collapsed_total";
pub const QUERIES_TIMED_OUT_TOTAL: &str = "colstream_queries_timed_out_total";
pub const DANGLING_ENTITIES_TOTAL: &str = "colstream_dangling_entities_total";

/// Monotonically increasing counter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counter(u64);

impl Counter {
    pub fn saturating_inc(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn saturating_add(&mut self, delta: u64) {
        self.0 = self.0.saturating_add(delta);
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// One scraped sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSample {
    pub name: &'static str,
    pub value: u64,
}

/// Point-in-time view of every pipeline counter, sorted by metric name so
/// scrape output is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub samples: Vec<MetricSample>,
}

/// Counters shared by the ingestion and export halves of the pipeline.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineTelemetry {
    pub projected_rows_total: Counter,
    pub filtered_messages_total: Counter,
    pub backpressure_transitions_total: Counter,
    pub sink_retries_total: Counter,
    pub duplicates_collapsed_total: Counter,
    pub queries_timed_out_total: Counter,
    pub dangling_entities_total: Counter,
}

impl PipelineTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot suitable for a `/metrics`-style scrape.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut samples = vec![
            MetricSample {
                name: PROJECTED_ROWS_TOTAL,
                value: self.projected_rows_total.get(),
            },
            MetricSample {
                name: FILTERED_MESSAGES_TOTAL,
                value: self.filtered_messages_total.get(),
            },
            MetricSample {
                name: BACKPRESSURE_TRANSITIONS_TOTAL,
                value: self.backpressure_transitions_total.get(),
            },
            MetricSample {
                name: SINK_RETRIES_TOTAL,
                value: self.sink_retries_total.get(),
            },
            MetricSample {
                name: DUPLICATES_COLLAPSED_TOTAL,
                value: self.duplicates_collapsed_total.get(),
            },
            MetricSample {
                name: QUERIES_TIMED_OUT_TOTAL,
                value: self.queries_timed_out_total.get(),
            },
            MetricSample {
                name: DANGLING_ENTITIES_TOTAL,
                value: self.dangling_entities_total.get(),
            },
        ];
        samples.sort_by(|a, b| a.name.cmp(b.name));
        MetricsSnapshot { samples }
    }
}
