//! Ordering gate bookkeeping
//!
//! Every queued batch gets a sequence number and leaves the output stage in
//! that order. A barrier waits for its own marker to drain, which implies
//! everything queued before it has drained too.

use tracing::trace;

#[derive(Debug, Default)]
pub struct OrderingGate {
    /// Sequence number of the last enqueued batch
    enqueued_seq: u64,
    /// Batches that have left the pipeline
    completed: u64,
    /// Sequence number of the last marker that left the pipeline
    drained_seq: u64,
}

impl OrderingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence number
    pub fn next_seq(&mut self) -> u64 {
        self.enqueued_seq += 1;
        self.enqueued_seq
    }

    /// Record that a batch left the pipeline
    pub fn complete(&mut self, seq: u64, is_marker: bool) {
        self.completed += 1;
        if is_marker {
            self.drained_seq = self.drained_seq.max(seq);
        }
        trace!(seq, in_flight = self.in_flight(), "Batch completed");
    }

    /// True once the marker with `marker_seq` and everything before it drained
    pub fn barrier_passed(&self, marker_seq: u64) -> bool {
        self.drained_seq >= marker_seq
    }

    /// Batches enqueued but not yet completed
    pub fn in_flight(&self) -> u64 {
        self.enqueued_seq - self.completed
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    pub fn enqueued_seq(&self) -> u64 {
        self.enqueued_seq
    }
}
