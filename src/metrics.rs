//! Export outcome counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Data kind label for log batches
pub const LOGS_KIND: &str = "logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failed,
    /// Rejected at intake because the queue was full
    Dropped,
}

impl Outcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Outcome::Success => "async_success",
            Outcome::Failed => "async_failed",
            Outcome::Dropped => "async_dropped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Receiver of export observations, e.g. a Prometheus counter vec.
pub trait MetricsSink: Send + Sync {
    /// Count `records` log records that reached `outcome`.
    fn record(&self, outcome: Outcome, kind: &'static str, records: u64);
}

/// In-process counters, always kept by the exporter
#[derive(Debug, Default)]
pub struct ExportMetrics {
    exported_records: AtomicU64,
    exported_batches: AtomicU64,
    failed_records: AtomicU64,
    failed_batches: AtomicU64,
    dropped_records: AtomicU64,
    dropped_batches: AtomicU64,
    attempts: AtomicU64,
    inflight: AtomicU64,
    max_inflight: AtomicU64,
}

impl ExportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let now = self.inflight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_inflight.fetch_max(now, Ordering::AcqRel);
    }

    pub(crate) fn end_attempt(&self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> ExportMetricsSnapshot {
        ExportMetricsSnapshot {
            exported_records: self.exported_records.load(Ordering::Relaxed),
            exported_batches: self.exported_batches.load(Ordering::Relaxed),
            failed_records: self.failed_records.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            max_inflight: self.max_inflight.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for ExportMetrics {
    fn record(&self, outcome: Outcome, _kind: &'static str, records: u64) {
        let (record_counter, batch_counter) = match outcome {
            Outcome::Success => (&self.exported_records, &self.exported_batches),
            Outcome::Failed => (&self.failed_records, &self.failed_batches),
            Outcome::Dropped => (&self.dropped_records, &self.dropped_batches),
        };
        record_counter.fetch_add(records, Ordering::Relaxed);
        batch_counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of export counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportMetricsSnapshot {
    pub exported_records: u64,
    pub exported_batches: u64,
    pub failed_records: u64,
    pub failed_batches: u64,
    pub dropped_records: u64,
    pub dropped_batches: u64,
    /// Network attempts issued, retries included
    pub attempts: u64,
    pub inflight: u64,
    /// Highest number of simultaneous attempts observed
    pub max_inflight: u64,
}

/// Forwards observations to the built-in counters and an optional external sink
pub(crate) struct Observer {
    pub(crate) local: ExportMetrics,
    external: Option<Box<dyn MetricsSink>>,
}

impl Observer {
    pub(crate) fn new(external: Option<Box<dyn MetricsSink>>) -> Self {
        Self {
            local: ExportMetrics::new(),
            external,
        }
    }

    pub(crate) fn observe(&self, outcome: Outcome, records: u64) {
        self.local.record(outcome, LOGS_KIND, records);
        if let Some(sink) = &self.external {
            sink.record(outcome, LOGS_KIND, records);
        }
    }
}
