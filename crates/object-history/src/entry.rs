//! Cached state of a single tracked object

use frame_meta::{ClassificationResult, Rect};

use crate::store::HistoryHandle;

/// History of one tracked object within a source
#[derive(Debug, Clone)]
pub struct ObjectHistory {
    handle: HistoryHandle,
    /// Set while a batch containing this object is in flight
    pub under_inference: bool,
    pub last_inferred_frame: u64,
    pub last_accessed_frame: u64,
    pub last_inferred_region: Rect,
    pub cached_result: ClassificationResult,
}

impl ObjectHistory {
    pub(crate) fn new(handle: HistoryHandle) -> Self {
        Self {
            handle,
            under_inference: false,
            last_inferred_frame: 0,
            last_accessed_frame: 0,
            last_inferred_region: Rect::default(),
            cached_result: ClassificationResult::default(),
        }
    }

    /// Non-owning handle to this entry
    pub fn handle(&self) -> HistoryHandle {
        self.handle
    }

    /// Record an access, keeping the most recent frame number
    pub fn touch(&mut self, frame_num: u64) {
        self.last_accessed_frame = self.last_accessed_frame.max(frame_num);
    }

    /// Mark the object as submitted for inference on `frame_num`
    pub fn begin_inference(&mut self, frame_num: u64, region: Rect) {
        self.under_inference = true;
        self.last_inferred_frame = frame_num;
        self.last_inferred_region = region;
        self.touch(frame_num);
    }

    /// Clear the in-flight flag if no newer inference superseded `frame_num`.
    ///
    /// Returns true when the flag was cleared.
    pub fn finish_inference(&mut self, frame_num: u64) -> bool {
        if self.last_inferred_frame == frame_num {
            self.under_inference = false;
            true
        } else {
            false
        }
    }

    /// True when a non-empty result is cached
    pub fn has_result(&self) -> bool {
        !self.cached_result.is_empty()
    }
}

/// Merge a fresh classification into a cached one.
///
/// Attributes are matched on their index; fresh attributes replace cached
/// ones and unmatched fresh attributes are appended. A non-empty fresh label
/// replaces the cached label. An empty fresh result leaves the cache as is.
pub fn merge_classification(cached: &mut ClassificationResult, fresh: &ClassificationResult) {
    if fresh.is_empty() {
        return;
    }

    for attr in &fresh.attributes {
        match cached.attributes.iter_mut().find(|a| a.index == attr.index) {
            Some(existing) => *existing = attr.clone(),
            None => cached.attributes.push(attr.clone()),
        }
    }

    if !fresh.label.is_empty() {
        cached.label = fresh.label.clone();
    }
}
