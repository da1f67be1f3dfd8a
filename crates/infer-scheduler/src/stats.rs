//! Pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by the caller and worker threads
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) buffers_submitted: AtomicU64,
    pub(crate) buffers_forwarded: AtomicU64,
    pub(crate) batches_dispatched: AtomicU64,
    pub(crate) frames_inferred: AtomicU64,
    pub(crate) dispatch_failures: AtomicU64,
    pub(crate) retrieval_failures: AtomicU64,
    pub(crate) conversion_failures: AtomicU64,
    pub(crate) regions_filtered: AtomicU64,
    pub(crate) regions_skipped: AtomicU64,
    pub(crate) untracked_dropped: AtomicU64,
    pub(crate) cached_attached: AtomicU64,
    pub(crate) late_results_discarded: AtomicU64,
    pub(crate) history_evicted: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            buffers_submitted: get(&self.buffers_submitted),
            buffers_forwarded: get(&self.buffers_forwarded),
            batches_dispatched: get(&self.batches_dispatched),
            frames_inferred: get(&self.frames_inferred),
            dispatch_failures: get(&self.dispatch_failures),
            retrieval_failures: get(&self.retrieval_failures),
            conversion_failures: get(&self.conversion_failures),
            regions_filtered: get(&self.regions_filtered),
            regions_skipped: get(&self.regions_skipped),
            untracked_dropped: get(&self.untracked_dropped),
            cached_attached: get(&self.cached_attached),
            late_results_discarded: get(&self.late_results_discarded),
            history_evicted: get(&self.history_evicted),
        }
    }
}

/// Snapshot of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub buffers_submitted: u64,
    pub buffers_forwarded: u64,
    pub batches_dispatched: u64,
    /// Regions sent to the inference context
    pub frames_inferred: u64,
    pub dispatch_failures: u64,
    pub retrieval_failures: u64,
    pub conversion_failures: u64,
    /// Regions rejected by the region filter
    pub regions_filtered: u64,
    /// Regions that reused a cached result instead of being inferred
    pub regions_skipped: u64,
    /// Untracked regions dropped in asynchronous mode
    pub untracked_dropped: u64,
    /// Cached results attached (deferred or asynchronous)
    pub cached_attached: u64,
    /// Results whose history entry was evicted while in flight
    pub late_results_discarded: u64,
    pub history_evicted: u64,
}
