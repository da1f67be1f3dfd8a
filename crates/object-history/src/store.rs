//! Per-source history maps

use std::collections::HashMap;

use frame_meta::Rect;
use tracing::{debug, info};

use crate::config::HistoryConfig;
use crate::entry::ObjectHistory;
use crate::HistoryError;

/// Non-owning reference to an [`ObjectHistory`].
///
/// Resolution fails once the entry has been evicted or its source cleared,
/// even if an entry for the same object id was created again afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryHandle {
    source_id: u32,
    object_id: u64,
    generation: u64,
}

impl HistoryHandle {
    pub(crate) fn new(source_id: u32, object_id: u64, generation: u64) -> Self {
        Self {
            source_id,
            object_id,
            generation,
        }
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    pub fn object_id(&self) -> u64 {
        self.object_id
    }
}

/// State kept for one upstream source
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    objects: HashMap<u64, ObjectHistory>,
    /// Most recent frame number observed from this source
    pub last_seen_frame: u64,
    /// Value of `last_seen_frame` at the last eviction sweep
    pub last_cleanup_frame: u64,
}

impl SourceInfo {
    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn object(&self, object_id: u64) -> Option<&ObjectHistory> {
        self.objects.get(&object_id)
    }
}

/// History maps of all known sources
#[derive(Debug)]
pub struct HistoryStore {
    config: HistoryConfig,
    sources: HashMap<u32, SourceInfo>,
    next_generation: u64,
}

impl HistoryStore {
    /// Create a store with source 0 already attached
    pub fn new(config: HistoryConfig) -> Self {
        let mut sources = HashMap::new();
        sources.insert(0, SourceInfo::default());
        Self {
            config,
            sources,
            next_generation: 0,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Attach a source. Attaching a known source keeps its history.
    pub fn add_source(&mut self, source_id: u32) {
        if self.sources.contains_key(&source_id) {
            return;
        }
        self.sources.insert(source_id, SourceInfo::default());
        info!(source_id, "Source attached");
    }

    /// Detach a source, dropping its history
    pub fn remove_source(&mut self, source_id: u32) -> bool {
        let removed = self.sources.remove(&source_id).is_some();
        if removed {
            info!(source_id, "Source detached");
        }
        removed
    }

    /// Drop all history of a source and reset its watermarks
    pub fn clear_source(&mut self, source_id: u32) {
        if let Some(info) = self.sources.get_mut(&source_id) {
            let dropped = info.objects.len();
            *info = SourceInfo::default();
            debug!(source_id, dropped, "Source history cleared");
        }
    }

    pub fn has_source(&self, source_id: u32) -> bool {
        self.sources.contains_key(&source_id)
    }

    pub fn source(&self, source_id: u32) -> Option<&SourceInfo> {
        self.sources.get(&source_id)
    }

    /// Total number of cached objects across sources
    pub fn len(&self) -> usize {
        self.sources.values().map(SourceInfo::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the latest frame number seen from a source
    pub fn observe_frame(&mut self, source_id: u32, frame_num: u64) -> Result<(), HistoryError> {
        let info = self
            .sources
            .get_mut(&source_id)
            .ok_or(HistoryError::UnknownSource(source_id))?;
        info.last_seen_frame = frame_num;
        Ok(())
    }

    pub fn get(&self, source_id: u32, object_id: u64) -> Option<&ObjectHistory> {
        self.sources.get(&source_id)?.objects.get(&object_id)
    }

    pub fn get_mut(&mut self, source_id: u32, object_id: u64) -> Option<&mut ObjectHistory> {
        self.sources.get_mut(&source_id)?.objects.get_mut(&object_id)
    }

    /// Fetch the entry for an object, creating it on first use
    pub fn get_or_create(
        &mut self,
        source_id: u32,
        object_id: u64,
    ) -> Result<&mut ObjectHistory, HistoryError> {
        let next_generation = &mut self.next_generation;
        let info = self
            .sources
            .get_mut(&source_id)
            .ok_or(HistoryError::UnknownSource(source_id))?;

        Ok(info.objects.entry(object_id).or_insert_with(|| {
            let generation = *next_generation;
            *next_generation += 1;
            ObjectHistory::new(HistoryHandle::new(source_id, object_id, generation))
        }))
    }

    /// Resolve a handle, `None` if the entry is gone
    pub fn resolve(&self, handle: HistoryHandle) -> Option<&ObjectHistory> {
        self.get(handle.source_id, handle.object_id)
            .filter(|h| h.handle().generation == handle.generation)
    }

    pub fn resolve_mut(&mut self, handle: HistoryHandle) -> Option<&mut ObjectHistory> {
        self.get_mut(handle.source_id, handle.object_id)
            .filter(|h| h.handle().generation == handle.generation)
    }

    /// Touch the entry behind a handle; false if it no longer exists
    pub fn touch(&mut self, handle: HistoryHandle, frame_num: u64) -> bool {
        match self.resolve_mut(handle) {
            Some(history) => {
                history.touch(frame_num);
                true
            }
            None => false,
        }
    }

    /// Decide whether a classified object must be inferred again.
    ///
    /// An entry without a result that is not in flight (its last inference
    /// failed) is always inferred.
    pub fn should_infer(
        &self,
        history: Option<&ObjectHistory>,
        region: &Rect,
        frame_num: u64,
    ) -> bool {
        let Some(history) = history else {
            return true;
        };
        if !history.under_inference && !history.has_result() {
            return true;
        }

        let grown_area =
            history.last_inferred_region.area() * (1.0 + self.config.reinfer_area_threshold);
        if region.area() > grown_area {
            return true;
        }

        frame_num.saturating_sub(history.last_inferred_frame) > self.config.reinfer_interval
    }

    /// Sweep stale entries of a source once per cleanup interval.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_stale(&mut self, source_id: u32) -> usize {
        let Some(info) = self.sources.get_mut(&source_id) else {
            return 0;
        };

        if info.last_seen_frame.saturating_sub(info.last_cleanup_frame) < self.config.cleanup_interval
        {
            return 0;
        }
        info.last_cleanup_frame = info.last_seen_frame;

        let last_seen = info.last_seen_frame;
        let staleness = self.config.staleness_threshold;
        let before = info.objects.len();
        info.objects.retain(|_, history| {
            history.under_inference
                || last_seen.saturating_sub(history.last_accessed_frame) <= staleness
        });

        let evicted = before - info.objects.len();
        if evicted > 0 {
            debug!(source_id, evicted, remaining = info.objects.len(), "Evicted stale history");
        }
        evicted
    }

}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}
