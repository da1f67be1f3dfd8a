//! Region selection and batch assembly

use std::sync::Arc;

use frame_meta::{AttachTarget, BatchMeta, Buffer, ClassifierMeta, FrameMeta, Rect, Surface};
use infer_context::NetworkKind;
use object_history::HistoryHandle;
use region_filter::RegionFilter;
use surface_transform::{AspectPolicy, RegionConverter};
use tracing::{debug, trace, warn};

use crate::batch::{BatchKind, DeferredMeta, Frame, InferBatch};
use crate::config::{ProcessMode, SchedulerConfig};
use crate::error::SchedulerError;
use crate::pipeline::Core;
use crate::pool::ConversionPool;
use crate::stats::PipelineStats;

/// Minimum buffer-PTS distance between two untracked-object warnings (5 min)
const UNTRACKED_WARN_INTERVAL_NS: u64 = 5 * 60 * 1_000_000_000;

/// A region picked for inference
#[derive(Debug, Clone, Copy)]
struct Region {
    source_id: u32,
    frame_num: u64,
    target: AttachTarget,
    rect: Rect,
}

enum Decision {
    Infer,
    /// Reuse the cached result of this history entry
    Skip(HistoryHandle),
}

/// Walks a buffer's regions and turns the ones needing inference into
/// bounded batches on the pipeline's input queue.
pub(crate) struct BatchAssembler {
    process_mode: ProcessMode,
    network_kind: NetworkKind,
    async_mode: bool,
    unique_id: u32,
    max_batch_size: usize,
    aspect_policy: AspectPolicy,
    interval: u32,
    interval_counter: u64,
    filter: RegionFilter,
    converter: Arc<dyn RegionConverter>,
    pool: ConversionPool,
    last_untracked_warning: Option<u64>,
}

impl BatchAssembler {
    pub(crate) fn new(
        config: &SchedulerConfig,
        async_mode: bool,
        converter: Arc<dyn RegionConverter>,
        pool: ConversionPool,
    ) -> Self {
        Self {
            process_mode: config.process_mode,
            network_kind: config.network_kind,
            async_mode,
            unique_id: config.unique_id,
            max_batch_size: config.max_batch_size.max(1),
            aspect_policy: config.aspect_policy,
            interval: config.interval,
            interval_counter: 0,
            filter: RegionFilter::new(&config.filter),
            converter,
            pool,
            last_untracked_warning: None,
        }
    }

    /// Restart the full-frame interval count, e.g. at end of stream
    pub(crate) fn reset_interval(&mut self) {
        self.interval_counter = 0;
    }

    /// Partition a buffer's regions into batches on the input queue
    pub(crate) fn process(&mut self, core: &Core, buffer: &Buffer) -> Result<(), SchedulerError> {
        let meta = buffer.meta_snapshot();
        let sources = match self.process_mode {
            ProcessMode::FullFrame => self.process_full_frame(core, buffer, &meta),
            ProcessMode::Objects => self.process_objects(core, buffer, &meta)?,
        };

        let mut shared = core.state.lock();
        let evicted: usize = sources
            .into_iter()
            .map(|source_id| shared.history.evict_stale(source_id))
            .sum();
        if evicted > 0 {
            PipelineStats::add(&core.stats.history_evicted, evicted as u64);
        }
        Ok(())
    }

    /// Each frame surface as one untracked region
    fn process_full_frame(&mut self, core: &Core, buffer: &Buffer, meta: &BatchMeta) -> Vec<u32> {
        let skip = self.interval_counter % (u64::from(self.interval) + 1) != 0;
        self.interval_counter += 1;
        if skip {
            trace!(pts = buffer.pts_ns(), "Skipping buffer within inference interval");
            return Vec::new();
        }

        let mut sources = Vec::new();
        let mut current = None;
        for (frame_idx, frame) in meta.frames.iter().enumerate() {
            let Some(surface) = self.frame_surface(core, buffer, frame_idx, frame) else {
                continue;
            };
            if !sources.contains(&frame.source_id) {
                sources.push(frame.source_id);
            }

            let region = Region {
                source_id: frame.source_id,
                frame_num: frame.frame_num,
                target: AttachTarget::frame(frame_idx),
                rect: Rect::new(0.0, 0.0, surface.width as f32, surface.height as f32),
            };
            self.infer_region(core, buffer, &mut current, surface, region, None);
        }

        self.flush(core, current);
        sources
    }

    /// Objects attached upstream, with history for tracked classifier targets
    fn process_objects(
        &mut self,
        core: &Core,
        buffer: &Buffer,
        meta: &BatchMeta,
    ) -> Result<Vec<u32>, SchedulerError> {
        let keep_history = self.network_kind == NetworkKind::Classifier;
        let mut sources = Vec::new();
        let mut current: Option<InferBatch> = None;

        for (frame_idx, frame) in meta.frames.iter().enumerate() {
            let Some(surface) = self.frame_surface(core, buffer, frame_idx, frame) else {
                continue;
            };
            if !sources.contains(&frame.source_id) {
                sources.push(frame.source_id);
            }

            for (obj_idx, object) in frame.objects.iter().enumerate() {
                let object_id = match object.object_id {
                    Some(id) if keep_history => Some(id),
                    _ if self.async_mode => {
                        self.drop_untracked(core, buffer.pts_ns());
                        continue;
                    }
                    _ => None,
                };

                if let Err(reason) = self.filter.check(object) {
                    PipelineStats::incr(&core.stats.regions_filtered);
                    metrics::counter!("infer_regions_filtered_total", "reason" => reason.as_str())
                        .increment(1);
                    continue;
                }

                let region = Region {
                    source_id: frame.source_id,
                    frame_num: frame.frame_num,
                    target: AttachTarget::object(frame_idx, obj_idx),
                    rect: object.rect,
                };

                let Some(object_id) = object_id else {
                    self.infer_region(core, buffer, &mut current, surface, region, None);
                    continue;
                };

                match self.decide(core, buffer, region, object_id)? {
                    Decision::Infer => {
                        self.infer_region(core, buffer, &mut current, surface, region, Some(object_id));
                    }
                    Decision::Skip(history) => {
                        PipelineStats::incr(&core.stats.regions_skipped);
                        if !self.async_mode {
                            current
                                .get_or_insert_with(|| InferBatch::new(Some(buffer.clone())))
                                .deferred
                                .push(DeferredMeta {
                                    history,
                                    target: region.target,
                                });
                        }
                    }
                }
            }
        }

        self.flush(core, current);
        Ok(sources)
    }

    /// Resolve a frame's surface and record its frame number with its source
    fn frame_surface<'b>(
        &self,
        core: &Core,
        buffer: &'b Buffer,
        frame_idx: usize,
        frame: &FrameMeta,
    ) -> Option<&'b Surface> {
        let Some(surface) = buffer.surface(frame.batch_id) else {
            warn!(frame_idx, batch_id = frame.batch_id, "Frame has no surface, skipping");
            return None;
        };

        let observed = core
            .state
            .lock()
            .history
            .observe_frame(frame.source_id, frame.frame_num);
        if let Err(e) = observed {
            warn!(frame_idx, "Skipping frame: {}", e);
            return None;
        }
        Some(surface)
    }

    /// Consult history for a tracked object and touch it.
    ///
    /// In asynchronous mode an existing cached result is attached right away.
    fn decide(
        &self,
        core: &Core,
        buffer: &Buffer,
        region: Region,
        object_id: u64,
    ) -> Result<Decision, SchedulerError> {
        let (infer, handle, cached) = {
            let mut shared = core.state.lock();
            let store = &mut shared.history;
            let history = store.get(region.source_id, object_id);
            let infer = store.should_infer(history, &region.rect, region.frame_num);
            let handle = history.map(|h| h.handle());
            let cached = history
                .filter(|h| self.async_mode && h.has_result())
                .map(|h| h.cached_result.clone());
            if let Some(handle) = handle {
                store.touch(handle, region.frame_num);
            }
            (infer, handle, cached)
        };

        if let Some(result) = cached {
            buffer.with_meta_mut(|meta| {
                meta.attach_classifier(region.target, ClassifierMeta::from_result(self.unique_id, &result))
            })?;
            PipelineStats::incr(&core.stats.cached_attached);
        }

        Ok(match handle {
            Some(handle) if !infer => Decision::Skip(handle),
            _ => Decision::Infer,
        })
    }

    /// Convert a region into the current batch, flushing it when full.
    ///
    /// A conversion failure skips the region and leaves its history untouched.
    fn infer_region(
        &self,
        core: &Core,
        buffer: &Buffer,
        current: &mut Option<InferBatch>,
        surface: &Surface,
        region: Region,
        object_id: Option<u64>,
    ) {
        let batch = current
            .get_or_insert_with(|| InferBatch::new((!self.async_mode).then(|| buffer.clone())));
        let pooled = batch.pool_buffer.get_or_insert_with(|| self.pool.acquire());

        let slot = batch.frames.len();
        let Some(target) = pooled.slot_mut(slot) else {
            warn!(slot, "No free slot in conversion buffer");
            return;
        };

        let converted = match self.converter.convert(surface, &region.rect, target, self.aspect_policy) {
            Ok(converted) => converted,
            Err(e) => {
                warn!(region = ?region.target, "Region conversion failed: {}", e);
                PipelineStats::incr(&core.stats.conversion_failures);
                metrics::counter!("infer_conversion_failures_total").increment(1);
                return;
            }
        };

        let history = match object_id {
            Some(object_id) => {
                let mut shared = core.state.lock();
                match shared.history.get_or_create(region.source_id, object_id) {
                    Ok(entry) => {
                        entry.begin_inference(region.frame_num, region.rect);
                        Some(entry.handle())
                    }
                    Err(e) => {
                        warn!(object_id, "Cannot track object: {}", e);
                        return;
                    }
                }
            }
            None => None,
        };

        batch.frames.push(Frame {
            slot,
            target: region.target,
            converted,
            source_id: region.source_id,
            frame_num: region.frame_num,
            history,
        });

        if batch.frames.len() >= self.max_batch_size {
            self.flush(core, current.take());
        }
    }

    /// Hand a batch to the pipeline. A batch without frames gives back its
    /// conversion buffer and only travels on for its deferred metadata.
    fn flush(&self, core: &Core, batch: Option<InferBatch>) {
        let Some(mut batch) = batch else {
            return;
        };

        if batch.frames.is_empty() {
            batch.pool_buffer = None;
            if batch.deferred.is_empty() {
                return;
            }
        }

        debug!(
            frames = batch.frames.len(),
            deferred = batch.deferred.len(),
            "Flushing batch"
        );
        core.enqueue(BatchKind::Infer(batch));
    }

    fn drop_untracked(&mut self, core: &Core, pts_ns: u64) {
        PipelineStats::incr(&core.stats.untracked_dropped);
        metrics::counter!("infer_untracked_dropped_total").increment(1);

        let due = self
            .last_untracked_warning
            .map_or(true, |last| pts_ns.saturating_sub(last) >= UNTRACKED_WARN_INTERVAL_NS);
        if due {
            warn!("Untracked objects are not inferred in asynchronous mode");
            self.last_untracked_warning = Some(pts_ns);
        }
    }
}
