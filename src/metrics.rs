use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_processed: AtomicU64,
    chunks_processed: AtomicU64,
    failed_chunks: AtomicU64,
    pairs_generated: AtomicU64,
    duplicates_skipped: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processed document.
    pub fn record_document(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one chunk and the number of pairs generated for it.
    pub fn record_chunk(&self, pairs: u64, failed: bool) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        self.pairs_generated.fetch_add(pairs, Ordering::Relaxed);
        if failed {
            self.failed_chunks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record pairs removed by deduplication.
    pub fn record_duplicates(&self, skipped: u64) {
        self.duplicates_skipped
            .fetch_add(skipped, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            failed_chunks: self.failed_chunks.load(Ordering::Relaxed),
            pairs_generated: self.pairs_generated.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents handled since startup, including ones that failed.
    pub documents_processed: u64,
    /// Chunks submitted to the model.
    pub chunks_processed: u64,
    /// Chunks whose model call failed or returned no JSON.
    pub failed_chunks: u64,
    /// Pairs generated before deduplication.
    pub pairs_generated: u64,
    /// Pairs removed as duplicates.
    pub duplicates_skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_chunks_and_duplicates() {
        let metrics = PipelineMetrics::new();
        metrics.record_document();
        metrics.record_chunk(4, false);
        metrics.record_chunk(0, true);
        metrics.record_duplicates(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_processed, 1);
        assert_eq!(snapshot.chunks_processed, 2);
        assert_eq!(snapshot.failed_chunks, 1);
        assert_eq!(snapshot.pairs_generated, 4);
        assert_eq!(snapshot.duplicates_skipped, 2);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        let metrics = PipelineMetrics::new();
        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                documents_processed: 0,
                chunks_processed: 0,
                failed_chunks: 0,
                pairs_generated: 0,
                duplicates_skipped: 0,
            }
        );
    }
}
