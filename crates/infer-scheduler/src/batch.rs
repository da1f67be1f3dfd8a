//! Units of work flowing through the pipeline queues

use frame_meta::{AttachTarget, Buffer};
use object_history::HistoryHandle;
use surface_transform::Converted;

use crate::pool::PooledBuffer;

/// One converted region inside an inference batch
#[derive(Debug, Clone)]
pub struct Frame {
    /// Slot of the conversion buffer holding the region
    pub slot: usize,
    /// Where results are attached in the owning buffer's metadata
    pub target: AttachTarget,
    /// Scale ratios and aligned source region
    pub converted: Converted,
    pub source_id: u32,
    pub frame_num: u64,
    /// History of the tracked object, `None` for untracked regions
    pub history: Option<HistoryHandle>,
}

/// Cached result to attach once the batch reaches the output stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredMeta {
    pub history: HistoryHandle,
    pub target: AttachTarget,
}

/// Regions to infer plus deferred metadata for one buffer
#[derive(Debug, Default)]
pub struct InferBatch {
    pub frames: Vec<Frame>,
    /// Buffer results are attached to; `None` in asynchronous mode
    pub buffer: Option<Buffer>,
    pub pool_buffer: Option<PooledBuffer>,
    pub deferred: Vec<DeferredMeta>,
}

impl InferBatch {
    pub fn new(buffer: Option<Buffer>) -> Self {
        Self {
            buffer,
            ..Default::default()
        }
    }

    /// Nothing to infer, only deferred metadata
    pub fn is_deferred_only(&self) -> bool {
        self.frames.is_empty()
    }

    /// Nothing to do at all
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.deferred.is_empty()
    }
}

#[derive(Debug)]
pub enum BatchKind {
    Infer(InferBatch),
    /// Buffer to forward once everything queued before it is done
    PushBuffer(Buffer),
    /// Barrier marker
    EventMarker,
}

/// A queued unit of work with its submission sequence number
#[derive(Debug)]
pub struct Batch {
    pub seq: u64,
    pub kind: BatchKind,
}

impl Batch {
    pub fn is_marker(&self) -> bool {
        matches!(self.kind, BatchKind::EventMarker)
    }

    /// True when the input stage must dispatch this batch
    pub fn needs_dispatch(&self) -> bool {
        matches!(&self.kind, BatchKind::Infer(b) if !b.frames.is_empty())
    }
}
