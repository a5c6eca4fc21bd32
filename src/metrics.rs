use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub speculative_applies: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub refetches: u64,
    pub refetch_failures: u64,
    pub discarded_reads: u64,
}

/// Process-wide counters shared by the cache, the coordinator and the router.
#[derive(Default)]
pub struct CacheMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    speculative_applies: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    refetches: AtomicU64,
    refetch_failures: AtomicU64,
    discarded_reads: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_speculative_apply(&self) {
        self.speculative_applies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refetch(&self, ok: bool) {
        self.refetches.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.refetch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_discarded_read(&self) {
        self.discarded_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            speculative_applies: self.speculative_applies.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            refetches: self.refetches.load(Ordering::Relaxed),
            refetch_failures: self.refetch_failures.load(Ordering::Relaxed),
            discarded_reads: self.discarded_reads.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refetch_failures_count_towards_refetches() {
        let metrics = CacheMetrics::new();
        metrics.record_refetch(true);
        metrics.record_refetch(false);
        metrics.record_lookup(true);
        metrics.record_lookup(false);
        metrics.record_lookup(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.refetches, 2);
        assert_eq!(snapshot.refetch_failures, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
    }
}
