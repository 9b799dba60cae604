//! Metrics registry
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Thread-safe but lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by the manager, cursors and guards
///
/// All counters use Relaxed atomics; readers only need eventual values.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Queries opened on every partition
    queries_opened: AtomicU64,
    /// Queries rejected or failed during open
    queries_rejected: AtomicU64,
    /// Pages handed to clients
    pages_emitted: AtomicU64,
    /// Documents handed to clients
    documents_emitted: AtomicU64,
    /// Bytes handed to clients
    bytes_emitted: AtomicU64,
    /// Engine page fetches
    partition_fetches: AtomicU64,
    /// Records returned by engine page fetches
    partition_records: AtomicU64,
    /// Head duplicates skipped after resuming
    head_duplicates_skipped: AtomicU64,
    /// Engine pages that failed the progress check
    no_progress_batches: AtomicU64,
    /// Emitted pages that failed the progress check
    page_order_regressions: AtomicU64,
    /// Emitted pages containing ties
    batches_with_ties: AtomicU64,
    /// Records rejected for exceeding the page byte budget
    oversized_records: AtomicU64,
    /// Facet tally merges
    facet_merges: AtomicU64,
    /// Cursors closed explicitly or on exhaustion
    cursors_closed: AtomicU64,
    /// Cursors reaped for idleness or index drop
    cursors_reaped: AtomicU64,
    /// Engine handle releases that failed
    release_failures: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_queries_opened(&self) {
        self.queries_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_rejected(&self) {
        self.queries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one emitted page
    pub fn record_page(&self, documents: u64, bytes: u64) {
        self.pages_emitted.fetch_add(1, Ordering::Relaxed);
        self.documents_emitted.fetch_add(documents, Ordering::Relaxed);
        self.bytes_emitted.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one engine page fetch
    pub fn record_partition_fetch(&self, records: u64) {
        self.partition_fetches.fetch_add(1, Ordering::Relaxed);
        self.partition_records.fetch_add(records, Ordering::Relaxed);
    }

    pub fn increment_head_duplicates_skipped(&self) {
        self.head_duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_no_progress_batches(&self) {
        self.no_progress_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_page_order_regressions(&self) {
        self.page_order_regressions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_with_ties(&self) {
        self.batches_with_ties.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_oversized_records(&self) {
        self.oversized_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_facet_merges(&self) {
        self.facet_merges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cursors_closed(&self) {
        self.cursors_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_cursors_reaped(&self, count: u64) {
        self.cursors_reaped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_release_failures(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_opened: self.queries_opened.load(Ordering::Relaxed),
            queries_rejected: self.queries_rejected.load(Ordering::Relaxed),
            pages_emitted: self.pages_emitted.load(Ordering::Relaxed),
            documents_emitted: self.documents_emitted.load(Ordering::Relaxed),
            bytes_emitted: self.bytes_emitted.load(Ordering::Relaxed),
            partition_fetches: self.partition_fetches.load(Ordering::Relaxed),
            partition_records: self.partition_records.load(Ordering::Relaxed),
            head_duplicates_skipped: self.head_duplicates_skipped.load(Ordering::Relaxed),
            no_progress_batches: self.no_progress_batches.load(Ordering::Relaxed),
            page_order_regressions: self.page_order_regressions.load(Ordering::Relaxed),
            batches_with_ties: self.batches_with_ties.load(Ordering::Relaxed),
            oversized_records: self.oversized_records.load(Ordering::Relaxed),
            facet_merges: self.facet_merges.load(Ordering::Relaxed),
            cursors_closed: self.cursors_closed.load(Ordering::Relaxed),
            cursors_reaped: self.cursors_reaped.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
        }
    }

    /// Get current snapshot of all metrics as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_opened: u64,
    pub queries_rejected: u64,
    pub pages_emitted: u64,
    pub documents_emitted: u64,
    pub bytes_emitted: u64,
    pub partition_fetches: u64,
    pub partition_records: u64,
    pub head_duplicates_skipped: u64,
    pub no_progress_batches: u64,
    pub page_order_regressions: u64,
    pub batches_with_ties: u64,
    pub oversized_records: u64,
    pub facet_merges: u64,
    pub cursors_closed: u64,
    pub cursors_reaped: u64,
    pub release_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_registry_is_zero() {
        let metrics = MetricsRegistry::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_page_accounting() {
        let metrics = MetricsRegistry::new();
        metrics.record_page(3, 300);
        metrics.record_page(2, 50);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pages_emitted, 2);
        assert_eq!(snapshot.documents_emitted, 5);
        assert_eq!(snapshot.bytes_emitted, 350);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.increment_no_progress_batches();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().no_progress_batches, 4000);
    }

    #[test]
    fn test_to_json() {
        let metrics = MetricsRegistry::new();
        metrics.increment_queries_opened();
        metrics.add_cursors_reaped(2);

        let json: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(json["queries_opened"], 1);
        assert_eq!(json["cursors_reaped"], 2);
        assert_eq!(json["batches_with_ties"], 0);
    }
}
