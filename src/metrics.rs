use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity since startup.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    fragments_stored: AtomicU64,
    queries_answered: AtomicU64,
    queries_failed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested document and the number of fragments stored for it.
    pub fn record_document(&self, fragment_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.fragments_stored
            .fetch_add(fragment_count, Ordering::Relaxed);
    }

    /// Record a query that produced an answer.
    pub fn record_answer(&self) {
        self.queries_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query whose answer generation failed.
    pub fn record_failure(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            fragments_stored: self.fragments_stored.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Documents ingested since startup.
    pub documents_ingested: u64,
    /// Fragments stored across all ingested documents.
    pub fragments_stored: u64,
    /// Queries that produced an answer.
    pub queries_answered: u64,
    /// Queries whose answer generation failed.
    pub queries_failed: u64,
}
