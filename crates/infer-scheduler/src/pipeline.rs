//! Input submission and output retrieval loops

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use frame_meta::{Buffer, ClassifierMeta, MetaError, ObjectMeta, Rect, SegmentationMeta};
use infer_context::{FrameOutput, InferenceContext, InferenceError, InputBatch};
use object_history::{merge_classification, HistoryStore};
use parking_lot::{Condvar, Mutex};
use region_filter::RegionFilter;
use surface_transform::RegionConverter;
use tracing::{debug, error, info, info_span, warn};

use crate::assembler::BatchAssembler;
use crate::batch::{Batch, BatchKind, Frame, InferBatch};
use crate::config::SchedulerConfig;
use crate::downstream::{Downstream, FlowResult, OutputHook};
use crate::error::SchedulerError;
use crate::gate::OrderingGate;
use crate::pool::ConversionPool;
use crate::stats::{PipelineStats, StatsSnapshot};

/// Serialized out-of-band events arriving with the buffer stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    SourceAdded(u32),
    SourceRemoved(u32),
    /// End of one source's stream; its history is cleared
    StreamEnd(u32),
    /// End of the whole stream
    Eos,
    /// Metadata tags pass through without waiting for in-flight work
    Tag(String),
    /// Any other serialized event
    Custom(String),
}

/// State guarded by the pipeline lock
pub(crate) struct Shared {
    pub(crate) input_queue: VecDeque<Batch>,
    pub(crate) process_queue: VecDeque<Batch>,
    pub(crate) history: HistoryStore,
    pub(crate) gate: OrderingGate,
    pub(crate) running: bool,
    pub(crate) stop: bool,
}

/// Everything the caller and both worker threads share
pub(crate) struct Core {
    pub(crate) config: SchedulerConfig,
    pub(crate) async_mode: bool,
    pub(crate) state: Mutex<Shared>,
    pub(crate) cond: Condvar,
    pub(crate) stats: PipelineStats,
    pub(crate) context: Arc<dyn InferenceContext>,
    pub(crate) downstream: Arc<dyn Downstream>,
    pub(crate) hook: Option<Arc<dyn OutputHook>>,
    pub(crate) filter: RegionFilter,
    last_flow: Mutex<FlowResult>,
}

impl Core {
    /// Append a batch to the input queue, returning its sequence number
    pub(crate) fn enqueue(&self, kind: BatchKind) -> u64 {
        let mut shared = self.state.lock();
        let seq = shared.gate.next_seq();
        shared.input_queue.push_back(Batch { seq, kind });
        metrics::gauge!("infer_queue_depth", "queue" => "input")
            .set(shared.input_queue.len() as f64);
        self.cond.notify_all();
        seq
    }

    /// Push a buffer downstream and record the flow result
    pub(crate) fn forward(&self, buffer: Buffer) -> FlowResult {
        let flow = self.downstream.push(buffer);
        PipelineStats::incr(&self.stats.buffers_forwarded);
        metrics::counter!("infer_buffers_forwarded_total").increment(1);

        let mut last = self.last_flow.lock();
        if flow.is_fatal() && *last != flow {
            error!(?flow, "Downstream refused buffer");
        }
        *last = flow;
        flow
    }

    pub(crate) fn last_flow(&self) -> FlowResult {
        *self.last_flow.lock()
    }

    fn input_loop(&self) {
        let span = info_span!("infer.input");
        let _guard = span.enter();
        debug!("Input loop started");

        loop {
            let mut batch = {
                let mut shared = self.state.lock();
                while shared.input_queue.is_empty() && !shared.stop {
                    self.cond.wait(&mut shared);
                }
                match shared.input_queue.pop_front() {
                    Some(batch) => batch,
                    None => break,
                }
            };

            if batch.needs_dispatch() {
                if let BatchKind::Infer(infer) = &mut batch.kind {
                    self.dispatch(infer);
                }
            }

            let mut shared = self.state.lock();
            shared.process_queue.push_back(batch);
            metrics::gauge!("infer_queue_depth", "queue" => "process")
                .set(shared.process_queue.len() as f64);
            self.cond.notify_all();
        }

        debug!("Input loop stopped");
    }

    /// Queue a batch's frames on the context. On failure the frames are
    /// dropped and only the deferred metadata travels on.
    fn dispatch(&self, batch: &mut InferBatch) {
        let frames = batch.frames.len();
        let pooled = batch.pool_buffer.take();
        let started = Instant::now();

        let input = pooled
            .as_ref()
            .and_then(|p| p.frames(frames).map(|data| (data, p.info())));
        let result = match input {
            Some((data, info)) => self.context.queue_input_batch(InputBatch {
                data,
                format: info.format,
                pitch: info.pitch(),
            }),
            None => Err(InferenceError::QueueFailed(format!(
                "no conversion buffer for {frames} frames"
            ))),
        };
        drop(pooled);

        match result {
            Ok(()) => {
                PipelineStats::incr(&self.stats.batches_dispatched);
                PipelineStats::add(&self.stats.frames_inferred, frames as u64);
                metrics::counter!("infer_batches_dispatched_total").increment(1);
                metrics::histogram!("infer_dispatch_seconds")
                    .record(started.elapsed().as_secs_f64());
            }
            Err(e) => {
                error!(frames, "Failed to queue input batch: {}", e);
                PipelineStats::incr(&self.stats.dispatch_failures);
                metrics::counter!("infer_dispatch_failures_total").increment(1);

                let mut shared = self.state.lock();
                release_in_flight(&mut shared.history, &batch.frames);
                batch.frames.clear();
            }
        }
    }

    fn output_loop(&self) {
        let span = info_span!("infer.output");
        let _guard = span.enter();
        debug!("Output loop started");

        loop {
            let batch = {
                let mut shared = self.state.lock();
                while shared.process_queue.is_empty() && !shared.stop {
                    self.cond.wait(&mut shared);
                }
                match shared.process_queue.pop_front() {
                    Some(batch) => batch,
                    None => break,
                }
            };

            let seq = batch.seq;
            let is_marker = batch.is_marker();
            match batch.kind {
                BatchKind::EventMarker => debug!(seq, "Barrier marker drained"),
                BatchKind::PushBuffer(buffer) => {
                    self.forward(buffer);
                }
                BatchKind::Infer(infer) if infer.is_deferred_only() => {
                    let shared = self.state.lock();
                    self.apply_deferred(&shared.history, &infer);
                }
                BatchKind::Infer(infer) => self.retrieve(infer),
            }

            let mut shared = self.state.lock();
            shared.gate.complete(seq, is_marker);
            self.cond.notify_all();
        }

        debug!("Output loop stopped");
    }

    fn retrieve(&self, batch: InferBatch) {
        let started = Instant::now();
        let output = match self.context.dequeue_output_batch() {
            Ok(output) => output,
            Err(e) => {
                error!(frames = batch.frames.len(), "Failed to dequeue output batch: {}", e);
                PipelineStats::incr(&self.stats.retrieval_failures);
                metrics::counter!("infer_retrieval_failures_total").increment(1);

                let mut shared = self.state.lock();
                release_in_flight(&mut shared.history, &batch.frames);
                self.apply_deferred(&shared.history, &batch);
                return;
            }
        };
        metrics::histogram!("infer_retrieval_seconds").record(started.elapsed().as_secs_f64());

        if output.frames.len() != batch.frames.len() {
            warn!(
                expected = batch.frames.len(),
                actual = output.frames.len(),
                "Output frame count mismatch"
            );
        }

        {
            let mut shared = self.state.lock();
            for (frame, out) in batch.frames.iter().zip(&output.frames) {
                self.attach_output(&mut shared.history, batch.buffer.as_ref(), frame, out);
            }
            self.apply_deferred(&shared.history, &batch);
        }

        if let Some(hook) = &self.hook {
            hook.on_output(batch.buffer.as_ref(), &output);
        }
        self.context.release_batch_output(output);
    }

    fn attach_output(
        &self,
        history: &mut HistoryStore,
        buffer: Option<&Buffer>,
        frame: &Frame,
        output: &FrameOutput,
    ) {
        let uid = self.config.unique_id;
        let mut entry = match frame.history {
            Some(handle) => history.resolve_mut(handle),
            None => None,
        };
        if frame.history.is_some() && entry.is_none() {
            debug!(frame_num = frame.frame_num, "History evicted before result arrived");
            PipelineStats::incr(&self.stats.late_results_discarded);
        }
        if let Some(entry) = entry.as_deref_mut() {
            entry.finish_inference(frame.frame_num);
        }

        let result = match output {
            FrameOutput::Classification(result) => {
                let attach = match entry {
                    Some(entry) => {
                        merge_classification(&mut entry.cached_result, result);
                        entry.cached_result.clone()
                    }
                    None => result.clone(),
                };
                match buffer {
                    Some(buffer) if !attach.is_empty() => buffer.with_meta_mut(|meta| {
                        meta.attach_classifier(frame.target, ClassifierMeta::from_result(uid, &attach))
                    }),
                    _ => Ok(()),
                }
            }
            FrameOutput::Detection(detections) => match buffer {
                Some(buffer) => buffer.with_meta_mut(|meta| -> Result<(), MetaError> {
                    for det in detections.iter().filter(|d| !self.filter.is_filtered_out(d.class_id)) {
                        let rect = frame
                            .converted
                            .to_surface(&Rect::new(det.left, det.top, det.width, det.height));
                        let mut object = ObjectMeta::untracked(det.class_id, uid as i32, rect);
                        object.confidence = det.confidence;
                        object.label = det.label.clone();
                        meta.add_object(frame.target.frame, object)?;
                    }
                    Ok(())
                }),
                None => Ok(()),
            },
            FrameOutput::Segmentation(map) => match buffer {
                Some(buffer) => buffer.with_meta_mut(|meta| {
                    meta.attach_segmentation(
                        frame.target,
                        SegmentationMeta {
                            component_id: uid,
                            width: map.width,
                            height: map.height,
                            num_classes: map.num_classes,
                            class_map: map.class_map.clone(),
                        },
                    )
                }),
                None => Ok(()),
            },
        };

        if let Err(e) = result {
            warn!(attach = ?frame.target, "Failed to attach output: {}", e);
        }
    }

    /// Attach the current cached result for every deferred entry
    fn apply_deferred(&self, history: &HistoryStore, batch: &InferBatch) {
        let Some(buffer) = &batch.buffer else {
            return;
        };

        for deferred in &batch.deferred {
            let Some(entry) = history.resolve(deferred.history) else {
                continue;
            };
            if !entry.has_result() {
                continue;
            }

            let meta = ClassifierMeta::from_result(self.config.unique_id, &entry.cached_result);
            match buffer.with_meta_mut(|m| m.attach_classifier(deferred.target, meta)) {
                Ok(()) => PipelineStats::incr(&self.stats.cached_attached),
                Err(e) => warn!(attach = ?deferred.target, "Failed to attach cached result: {}", e),
            }
        }
    }
}

/// Clear in-flight flags of frames whose inference will never complete
fn release_in_flight(history: &mut HistoryStore, frames: &[Frame]) {
    for frame in frames {
        let Some(handle) = frame.history else {
            continue;
        };
        if let Some(entry) = history.resolve_mut(handle) {
            entry.finish_inference(frame.frame_num);
        }
    }
}

/// Batched inference pipeline.
///
/// Buffers are submitted from one caller context. Inference runs on two
/// named threads started by [`start`](Self::start) and joined by
/// [`stop`](Self::stop).
pub struct InferPipeline {
    core: Arc<Core>,
    converter: Arc<dyn RegionConverter>,
    /// `Some` while running. Also serializes submissions and events.
    assembler: Mutex<Option<BatchAssembler>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl InferPipeline {
    /// Create a stopped pipeline
    pub fn new(
        config: SchedulerConfig,
        context: Arc<dyn InferenceContext>,
        converter: Arc<dyn RegionConverter>,
        downstream: Arc<dyn Downstream>,
    ) -> Self {
        let async_mode = if config.async_mode && !config.supports_async() {
            warn!(
                network = config.network_kind.as_str(),
                mode = ?config.process_mode,
                "Asynchronous mode only applies to classifiers on objects, disabling"
            );
            false
        } else {
            config.async_mode
        };

        let core = Core {
            filter: RegionFilter::new(&config.filter),
            state: Mutex::new(Shared {
                input_queue: VecDeque::new(),
                process_queue: VecDeque::new(),
                history: HistoryStore::new(config.history.clone()),
                gate: OrderingGate::new(),
                running: false,
                stop: false,
            }),
            cond: Condvar::new(),
            stats: PipelineStats::default(),
            context,
            downstream,
            hook: None,
            last_flow: Mutex::new(FlowResult::Ok),
            async_mode,
            config,
        };

        Self {
            core: Arc::new(core),
            converter,
            assembler: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Install a raw output hook. Ignored while the pipeline is running.
    pub fn with_output_hook(mut self, hook: Arc<dyn OutputHook>) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.hook = Some(hook);
        }
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    /// Effective dispatch mode after validation
    pub fn is_async(&self) -> bool {
        self.core.async_mode
    }

    /// Validate configuration, allocate conversion buffers and spawn the loops
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut assembler = self.assembler.lock();
        if assembler.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let config = &self.core.config;
        config.validate()?;
        let info = self.core.context.network_info()?;
        let pool = ConversionPool::new(config.pool_size, config.max_batch_size, &info);

        {
            let mut shared = self.core.state.lock();
            shared.stop = false;
            shared.running = true;
        }

        let mut threads = self.threads.lock();
        for (name, run) in [
            ("infer-input", Core::input_loop as fn(&Core)),
            ("infer-output", Core::output_loop as fn(&Core)),
        ] {
            let core = self.core.clone();
            match thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run(&core))
            {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    self.halt(&mut threads);
                    return Err(SchedulerError::ThreadSpawn {
                        name: name.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        *assembler = Some(BatchAssembler::new(
            config,
            self.core.async_mode,
            self.converter.clone(),
            pool,
        ));

        info!(
            network = config.network_kind.as_str(),
            width = info.width,
            height = info.height,
            max_batch_size = config.max_batch_size,
            async_mode = self.core.async_mode,
            "Inference pipeline started"
        );
        Ok(())
    }

    /// Wait for all queued work to drain, then stop and join both loops
    pub fn stop(&self) -> Result<(), SchedulerError> {
        let mut assembler = self.assembler.lock();
        if assembler.is_none() {
            return Err(SchedulerError::NotRunning);
        }

        {
            let mut shared = self.core.state.lock();
            while !shared.gate.is_idle() {
                self.core.cond.wait(&mut shared);
            }
        }

        let mut threads = self.threads.lock();
        self.halt(&mut threads);
        *assembler = None;

        let stats = self.stats();
        info!(
            submitted = stats.buffers_submitted,
            forwarded = stats.buffers_forwarded,
            batches = stats.batches_dispatched,
            "Inference pipeline stopped"
        );
        Ok(())
    }

    fn halt(&self, threads: &mut Vec<JoinHandle<()>>) {
        {
            let mut shared = self.core.state.lock();
            shared.stop = true;
            shared.running = false;
            self.core.cond.notify_all();
        }
        for handle in threads.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Pipeline thread panicked");
            }
        }
    }

    /// Submit a buffer.
    ///
    /// Synchronous mode forwards it after its results are attached, in
    /// submission order. Asynchronous mode forwards it before returning.
    pub fn submit(&self, buffer: Buffer) -> Result<(), SchedulerError> {
        let mut guard = self.assembler.lock();
        let assembler = guard.as_mut().ok_or(SchedulerError::NotRunning)?;

        let last = self.core.last_flow();
        if last.is_fatal() {
            return Err(SchedulerError::Flow(last));
        }

        PipelineStats::incr(&self.core.stats.buffers_submitted);
        assembler.process(&self.core, &buffer)?;

        if self.core.async_mode {
            let flow = self.core.forward(buffer);
            if flow.is_fatal() {
                return Err(SchedulerError::Flow(flow));
            }
        } else {
            self.core.enqueue(BatchKind::PushBuffer(buffer));
        }
        Ok(())
    }

    /// Start tracking a new source
    pub fn on_source_added(&self, source_id: u32) {
        self.core.state.lock().history.add_source(source_id);
    }

    /// Stop tracking a source and drop its history
    pub fn on_source_removed(&self, source_id: u32) {
        self.core.state.lock().history.remove_source(source_id);
    }

    /// Clear a source's history at the end of its stream
    pub fn on_stream_end(&self, source_id: u32) {
        self.core.state.lock().history.clear_source(source_id);
    }

    /// Block until every batch submitted so far has been processed.
    ///
    /// Returns immediately in asynchronous mode or when stopped.
    pub fn on_barrier_event(&self) {
        if self.core.async_mode || !self.core.state.lock().running {
            return;
        }

        let seq = self.core.enqueue(BatchKind::EventMarker);
        let mut shared = self.core.state.lock();
        while !shared.gate.barrier_passed(seq) && !shared.stop {
            self.core.cond.wait(&mut shared);
        }
        debug!(seq, "Barrier passed");
    }

    /// Handle a serialized stream event in order with submitted buffers
    pub fn handle_event(&self, event: SinkEvent) {
        let mut assembler = self.assembler.lock();

        if !matches!(event, SinkEvent::Tag(_)) {
            self.on_barrier_event();
        }

        match event {
            SinkEvent::SourceAdded(id) => self.on_source_added(id),
            SinkEvent::SourceRemoved(id) => self.on_source_removed(id),
            SinkEvent::StreamEnd(id) => self.on_stream_end(id),
            SinkEvent::Eos => {
                if let Some(assembler) = assembler.as_mut() {
                    assembler.reset_interval();
                }
                info!("End of stream");
            }
            SinkEvent::Tag(_) | SinkEvent::Custom(_) => {}
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Result of the most recent downstream push
    pub fn last_flow(&self) -> FlowResult {
        self.core.last_flow()
    }

    /// Number of cached history entries across sources
    pub fn history_len(&self) -> usize {
        self.core.state.lock().history.len()
    }

    /// Run `f` against the history store under the pipeline lock
    pub fn with_history<R>(&self, f: impl FnOnce(&HistoryStore) -> R) -> R {
        f(&self.core.state.lock().history)
    }
}

impl Drop for InferPipeline {
    fn drop(&mut self) {
        if self.assembler.lock().is_some() {
            if let Err(e) = self.stop() {
                warn!("Failed to stop pipeline on drop: {}", e);
            }
        }
    }
}
