use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use frame_meta::{AttachTarget, BatchMeta, Buffer, FrameMeta, ObjectMeta, Rect, Surface};
use infer_context::{BatchOutput, InferenceContext, MockConfig, MockContext};
use infer_scheduler::{
    Downstream, FlowResult, InferPipeline, OutputHook, SchedulerConfig, SchedulerError, SinkEvent,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use surface_transform::HostConverter;

/// Downstream recording every forwarded buffer
struct Collector {
    buffers: Mutex<Vec<Buffer>>,
    flow: FlowResult,
}

impl Collector {
    fn new() -> Self {
        Self::with_flow(FlowResult::Ok)
    }

    fn with_flow(flow: FlowResult) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            flow,
        }
    }

    fn pts(&self) -> Vec<u64> {
        self.buffers.lock().iter().map(|b| b.pts_ns()).collect()
    }

    fn get(&self, index: usize) -> Buffer {
        self.buffers.lock()[index].clone()
    }

    fn len(&self) -> usize {
        self.buffers.lock().len()
    }
}

impl Downstream for Collector {
    fn push(&self, buffer: Buffer) -> FlowResult {
        self.buffers.lock().push(buffer);
        self.flow
    }
}

struct Harness {
    pipeline: InferPipeline,
    context: Arc<MockContext>,
    sink: Arc<Collector>,
}

fn harness_with(config: SchedulerConfig, mock: MockConfig, sink: Collector) -> Harness {
    let context = Arc::new(MockContext::new(mock));
    let converter = Arc::new(HostConverter::new(context.network_info().unwrap()));
    let sink = Arc::new(sink);
    let pipeline = InferPipeline::new(config, context.clone(), converter, sink.clone());
    pipeline.start().unwrap();
    Harness {
        pipeline,
        context,
        sink,
    }
}

fn harness(config: SchedulerConfig) -> Harness {
    harness_with(config, MockConfig::classifier(16, 16), Collector::new())
}

fn object(id: u64, class_id: i32, size: f32) -> ObjectMeta {
    ObjectMeta::tracked(id, class_id, 1, Rect::new(8.0, 8.0, size, size))
}

fn buffer(frame_num: u64, objects: Vec<ObjectMeta>) -> Buffer {
    Buffer::new(
        frame_num,
        vec![Surface::filled(64, 64, [200, 200, 200])],
        BatchMeta::new(vec![FrameMeta::new(0, frame_num, 0).with_objects(objects)]),
    )
}

fn object_labels(buffer: &Buffer, object: usize) -> Vec<String> {
    buffer.with_meta(|meta| {
        meta.object(AttachTarget::object(0, object))
            .map(|o| o.classifiers.iter().map(|c| c.label.clone()).collect())
            .unwrap_or_default()
    })
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_buffers_forwarded_in_submission_order() {
    let h = harness(SchedulerConfig::classifier(3));

    for frame in 0..20u64 {
        let objects = (0..frame % 4).map(|i| object(frame * 10 + i, 0, 32.0)).collect();
        h.pipeline.submit(buffer(frame, objects)).unwrap();
    }
    h.pipeline.stop().unwrap();

    assert_eq!(h.sink.pts(), (0..20).collect::<Vec<_>>());
    let stats = h.pipeline.stats();
    assert_eq!(stats.buffers_submitted, 20);
    assert_eq!(stats.buffers_forwarded, 20);
}

#[test]
fn test_first_appearance_infers_then_reuses_cache() {
    let h = harness(SchedulerConfig::classifier(1));

    h.pipeline.submit(buffer(1, vec![object(7, 0, 32.0)])).unwrap();
    h.pipeline.submit(buffer(2, vec![object(7, 0, 32.0)])).unwrap();
    h.pipeline.stop().unwrap();

    assert_eq!(h.context.batch_sizes(), vec![1]);
    assert_eq!(object_labels(&h.sink.get(0), 0), vec!["light"]);
    assert_eq!(object_labels(&h.sink.get(1), 0), vec!["light"]);

    let stats = h.pipeline.stats();
    assert_eq!(stats.regions_skipped, 1);
    assert_eq!(stats.cached_attached, 1);
    h.pipeline.with_history(|store| {
        let entry = store.get(0, 7).unwrap();
        assert!(!entry.under_inference);
        assert_eq!(entry.last_inferred_frame, 1);
        assert_eq!(entry.last_accessed_frame, 2);
        assert_eq!(entry.cached_result.label, "light");
    });
}

#[test]
fn test_reinfer_on_growth() {
    let h = harness(SchedulerConfig::classifier(1));

    h.pipeline.submit(buffer(1, vec![object(7, 0, 32.0)])).unwrap();
    h.pipeline.submit(buffer(2, vec![object(7, 0, 40.0)])).unwrap();
    h.pipeline.stop().unwrap();

    assert_eq!(h.context.batch_sizes(), vec![1, 1]);
    assert_eq!(h.pipeline.stats().regions_skipped, 0);
}

#[test]
fn test_reinfer_after_interval() {
    let mut config = SchedulerConfig::classifier(1);
    config.history = config.history.with_reinfer_interval(2);
    let h = harness(config);

    for frame in 1..=4 {
        h.pipeline.submit(buffer(frame, vec![object(7, 0, 32.0)])).unwrap();
        h.pipeline.on_barrier_event();
    }
    h.pipeline.stop().unwrap();

    // inferred at frame 1, reused at 2 and 3, inferred again at 4
    assert_eq!(h.context.batch_sizes(), vec![1, 1]);
    assert_eq!(h.pipeline.stats().regions_skipped, 2);
}

#[test]
fn test_small_region_filtered_without_history() {
    let h = harness(SchedulerConfig::classifier(1));

    h.pipeline.submit(buffer(1, vec![object(3, 0, 10.0)])).unwrap();
    h.pipeline.stop().unwrap();

    assert_eq!(h.sink.len(), 1);
    assert!(h.context.batch_sizes().is_empty());
    assert!(object_labels(&h.sink.get(0), 0).is_empty());
    assert_eq!(h.pipeline.stats().regions_filtered, 1);
    assert_eq!(h.pipeline.history_len(), 0);
}

#[test]
fn test_allow_list_excludes_other_classes() {
    let mut config = SchedulerConfig::classifier(4);
    config.filter.operate_on_class_ids = vec![1, 3];
    let h = harness(config);

    let objects = vec![object(1, 1, 32.0), object(2, 2, 32.0), object(3, 3, 32.0)];
    h.pipeline.submit(buffer(1, objects)).unwrap();
    h.pipeline.stop().unwrap();

    assert_eq!(h.context.batch_sizes(), vec![2]);
    let forwarded = h.sink.get(0);
    assert_eq!(object_labels(&forwarded, 0), vec!["light"]);
    assert!(object_labels(&forwarded, 1).is_empty());
    assert_eq!(object_labels(&forwarded, 2), vec!["light"]);
    h.pipeline.with_history(|store| assert!(store.get(0, 2).is_none()));
}

#[test]
fn test_batches_never_exceed_max_size() {
    let h = harness(SchedulerConfig::classifier(2));

    let objects = (0..5).map(|id| object(id, 0, 24.0)).collect();
    h.pipeline.submit(buffer(1, objects)).unwrap();
    h.pipeline.stop().unwrap();

    assert_eq!(h.context.batch_sizes(), vec![2, 2, 1]);
    assert_eq!(h.pipeline.stats().frames_inferred, 5);
}

#[test]
fn test_buffer_without_regions_forwarded_once() {
    let h = harness(SchedulerConfig::classifier(4));

    h.pipeline.submit(buffer(1, Vec::new())).unwrap();
    h.pipeline.stop().unwrap();

    assert_eq!(h.sink.pts(), vec![1]);
    assert!(h.context.batch_sizes().is_empty());
}

#[test]
fn test_dispatch_failure_is_isolated() {
    let h = harness(SchedulerConfig::classifier(1));
    h.context.fail_next_queue(1);

    h.pipeline.submit(buffer(1, vec![object(1, 0, 32.0)])).unwrap();
    h.pipeline.submit(buffer(2, vec![object(2, 0, 32.0)])).unwrap();
    h.pipeline.stop().unwrap();

    assert_eq!(h.sink.pts(), vec![1, 2]);
    assert!(object_labels(&h.sink.get(0), 0).is_empty());
    assert_eq!(object_labels(&h.sink.get(1), 0), vec!["light"]);
    assert_eq!(h.pipeline.stats().dispatch_failures, 1);
    h.pipeline.with_history(|store| {
        let failed = store.get(0, 1).unwrap();
        assert!(!failed.under_inference);
        assert!(!failed.has_result());
    });
}

#[test]
fn test_retrieval_failure_is_isolated() {
    let h = harness(SchedulerConfig::classifier(1));
    h.context.fail_next_dequeue(1);

    h.pipeline.submit(buffer(1, vec![object(1, 0, 32.0)])).unwrap();
    h.pipeline.submit(buffer(2, vec![object(2, 0, 32.0)])).unwrap();
    h.pipeline.stop().unwrap();

    assert_eq!(h.sink.pts(), vec![1, 2]);
    assert!(object_labels(&h.sink.get(0), 0).is_empty());
    assert_eq!(object_labels(&h.sink.get(1), 0), vec!["light"]);
    assert_eq!(h.pipeline.stats().retrieval_failures, 1);
    h.pipeline.with_history(|store| assert!(!store.get(0, 1).unwrap().under_inference));
}

#[test]
fn test_failed_dispatch_retried_on_next_frame() {
    let h = harness(SchedulerConfig::classifier(1));
    h.context.fail_next_queue(1);

    h.pipeline.submit(buffer(1, vec![object(1, 0, 32.0)])).unwrap();
    h.pipeline.on_barrier_event();
    for frame in 2..=4 {
        h.pipeline.submit(buffer(frame, vec![object(1, 0, 32.0)])).unwrap();
    }
    h.pipeline.stop().unwrap();

    assert_eq!(h.context.batch_sizes(), vec![1]);
    assert!(object_labels(&h.sink.get(0), 0).is_empty());
    for index in 1..4 {
        assert_eq!(object_labels(&h.sink.get(index), 0), vec!["light"]);
    }
    h.pipeline.with_history(|store| assert_eq!(store.get(0, 1).unwrap().last_inferred_frame, 2));
}

#[test]
fn test_failed_retrieval_retried_on_next_frame() {
    let h = harness(SchedulerConfig::classifier(1));
    h.context.fail_next_dequeue(1);

    h.pipeline.submit(buffer(1, vec![object(1, 0, 32.0)])).unwrap();
    h.pipeline.on_barrier_event();
    for frame in 2..=4 {
        h.pipeline.submit(buffer(frame, vec![object(1, 0, 32.0)])).unwrap();
    }
    h.pipeline.stop().unwrap();

    assert_eq!(h.context.batch_sizes(), vec![1, 1]);
    assert!(object_labels(&h.sink.get(0), 0).is_empty());
    for index in 1..4 {
        assert_eq!(object_labels(&h.sink.get(index), 0), vec!["light"]);
    }
}

#[test]
fn test_async_next_frame_before_result_has_no_cache() {
    let mut config = SchedulerConfig::classifier(1);
    config.async_mode = true;
    let mut mock = MockConfig::classifier(16, 16);
    mock.latency_ms = 100;
    let h = harness_with(config, mock, Collector::new());

    h.pipeline.submit(buffer(10, vec![object(1, 0, 32.0)])).unwrap();
    h.pipeline.submit(buffer(11, vec![object(1, 0, 32.0)])).unwrap();
    assert_eq!(h.sink.pts(), vec![10, 11]);
    assert!(object_labels(&h.sink.get(1), 0).is_empty());
    h.pipeline.stop().unwrap();

    assert_eq!(h.context.batch_sizes(), vec![1]);
    assert!(object_labels(&h.sink.get(1), 0).is_empty());
    h.pipeline.with_history(|store| assert!(store.get(0, 1).unwrap().has_result()));
}

#[test]
fn test_result_for_cleared_history_still_attached() {
    let mut mock = MockConfig::classifier(16, 16);
    mock.latency_ms = 100;
    let h = harness_with(SchedulerConfig::classifier(1), mock, Collector::new());

    h.pipeline.submit(buffer(1, vec![object(1, 0, 32.0)])).unwrap();
    h.pipeline.on_stream_end(0);
    h.pipeline.stop().unwrap();

    assert_eq!(h.pipeline.stats().late_results_discarded, 1);
    assert_eq!(h.pipeline.history_len(), 0);
    assert_eq!(object_labels(&h.sink.get(0), 0), vec!["light"]);
}

#[test]
fn test_async_forwards_before_inference() {
    let mut config = SchedulerConfig::classifier(1);
    config.async_mode = true;
    let mut mock = MockConfig::classifier(16, 16);
    mock.latency_ms = 20;
    let h = harness_with(config, mock, Collector::new());
    assert!(h.pipeline.is_async());

    h.pipeline.submit(buffer(10, vec![object(1, 0, 32.0)])).unwrap();
    assert_eq!(h.sink.pts(), vec![10]);

    assert!(wait_until(|| h
        .pipeline
        .with_history(|store| store.get(0, 1).map_or(false, |e| e.has_result()))));

    h.pipeline.submit(buffer(11, vec![object(1, 0, 32.0)])).unwrap();
    assert_eq!(h.sink.pts(), vec![10, 11]);
    assert_eq!(object_labels(&h.sink.get(1), 0), vec!["light"]);
    h.pipeline.stop().unwrap();

    assert!(object_labels(&h.sink.get(0), 0).is_empty());
    assert_eq!(h.context.batch_sizes(), vec![1]);
}

#[test]
fn test_async_drops_untracked_objects() {
    let mut config = SchedulerConfig::classifier(1);
    config.async_mode = true;
    let h = harness(config);

    let untracked = ObjectMeta::untracked(0, 1, Rect::new(0.0, 0.0, 32.0, 32.0));
    let small_untracked = ObjectMeta::untracked(0, 1, Rect::new(0.0, 0.0, 10.0, 10.0));
    h.pipeline.submit(buffer(1, vec![untracked, small_untracked])).unwrap();
    h.pipeline.stop().unwrap();

    let stats = h.pipeline.stats();
    assert_eq!(stats.untracked_dropped, 2);
    assert_eq!(stats.regions_filtered, 0);
    assert!(h.context.batch_sizes().is_empty());
    assert_eq!(h.sink.len(), 1);
}

#[test]
fn test_async_disabled_for_detector() {
    let mut config = SchedulerConfig::detector(1);
    config.async_mode = true;
    let h = harness_with(config, MockConfig::detector(32, 32), Collector::new());
    assert!(!h.pipeline.is_async());
}

#[test]
fn test_full_frame_detector_interval() {
    let mut config = SchedulerConfig::detector(1);
    config.interval = 1;
    let h = harness_with(config, MockConfig::detector(32, 32), Collector::new());

    for frame in 0..4u64 {
        let mut surface = Surface::filled(64, 64, [0, 0, 0]);
        surface.fill_rect(16, 16, 32, 32, [255, 255, 255]);
        let meta = BatchMeta::new(vec![FrameMeta::new(0, frame, 0)]);
        h.pipeline.submit(Buffer::new(frame, vec![surface], meta)).unwrap();
    }
    h.pipeline.stop().unwrap();

    assert_eq!(h.context.batch_sizes(), vec![1, 1]);
    assert_eq!(h.sink.pts(), vec![0, 1, 2, 3]);

    let detected = |index: usize| h.sink.get(index).with_meta(|m| m.frames[0].objects.clone());
    assert!(detected(1).is_empty());
    assert!(detected(3).is_empty());

    let objects = detected(0);
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].object_id, None);
    assert_eq!(objects[0].component_id, 15);
    assert!((objects[0].rect.left - 16.0).abs() <= 4.0);
    assert!((objects[0].rect.width - 32.0).abs() <= 8.0);
    assert_eq!(detected(2).len(), 1);
}

#[test]
fn test_segmentation_on_objects() {
    let h = harness_with(
        SchedulerConfig {
            network_kind: infer_context::NetworkKind::Segmentation,
            ..SchedulerConfig::classifier(2)
        },
        MockConfig::segmentation(8, 8),
        Collector::new(),
    );

    h.pipeline.submit(buffer(1, vec![object(1, 0, 32.0)])).unwrap();
    h.pipeline.submit(buffer(2, vec![object(1, 0, 32.0)])).unwrap();
    h.pipeline.stop().unwrap();

    // no history is kept for segmentation, every appearance is inferred
    assert_eq!(h.context.batch_sizes(), vec![1, 1]);
    assert_eq!(h.pipeline.history_len(), 0);
    let map = h
        .sink
        .get(0)
        .with_meta(|m| m.frames[0].objects[0].segmentation.clone())
        .unwrap();
    assert_eq!((map.width, map.height, map.num_classes), (8, 8, 2));
    assert!(map.class_map.iter().all(|&c| c == 1));
}

#[test]
fn test_stale_history_evicted() {
    let mut config = SchedulerConfig::classifier(1);
    config.history.staleness_threshold = 2;
    config.history.cleanup_interval = 1;
    let h = harness(config);

    h.pipeline.submit(buffer(1, vec![object(1, 0, 32.0)])).unwrap();
    h.pipeline.on_barrier_event();
    for frame in 2..=6 {
        h.pipeline.submit(buffer(frame, vec![object(2, 0, 32.0)])).unwrap();
    }
    h.pipeline.stop().unwrap();

    h.pipeline.with_history(|store| {
        assert!(store.get(0, 1).is_none());
        assert!(store.get(0, 2).is_some());
    });
    assert!(h.pipeline.stats().history_evicted >= 1);
}

#[test]
fn test_serialized_event_waits_for_in_flight() {
    let mut mock = MockConfig::classifier(16, 16);
    mock.latency_ms = 10;
    let h = harness_with(SchedulerConfig::classifier(1), mock, Collector::new());

    for frame in 1..=3 {
        h.pipeline.submit(buffer(frame, vec![object(frame, 0, 32.0)])).unwrap();
    }
    h.pipeline.handle_event(SinkEvent::StreamEnd(0));

    assert_eq!(h.sink.pts(), vec![1, 2, 3]);
    assert_eq!(h.pipeline.history_len(), 0);
    h.pipeline.stop().unwrap();
}

#[test]
fn test_source_lifecycle_events() {
    let h = harness(SchedulerConfig::classifier(1));

    h.pipeline.handle_event(SinkEvent::SourceAdded(4));
    let meta = BatchMeta::new(vec![FrameMeta::new(4, 1, 0).with_objects(vec![object(9, 0, 32.0)])]);
    let surfaces = vec![Surface::filled(64, 64, [10, 10, 10])];
    h.pipeline.submit(Buffer::new(1, surfaces, meta)).unwrap();
    h.pipeline.handle_event(SinkEvent::Tag("title".to_string()));
    h.pipeline.handle_event(SinkEvent::SourceRemoved(4));

    assert_eq!(object_labels(&h.sink.get(0), 0), vec!["dark"]);
    h.pipeline.with_history(|store| assert!(!store.has_source(4)));
    h.pipeline.stop().unwrap();
}

#[test]
fn test_unknown_source_is_skipped() {
    let h = harness(SchedulerConfig::classifier(1));

    let meta = BatchMeta::new(vec![FrameMeta::new(9, 1, 0).with_objects(vec![object(1, 0, 32.0)])]);
    let surfaces = vec![Surface::filled(64, 64, [200, 200, 200])];
    h.pipeline.submit(Buffer::new(1, surfaces, meta)).unwrap();
    h.pipeline.stop().unwrap();

    assert_eq!(h.sink.len(), 1);
    assert!(h.context.batch_sizes().is_empty());
}

#[test]
fn test_fatal_flow_stops_submission() {
    let h = harness_with(
        SchedulerConfig::classifier(1),
        MockConfig::classifier(16, 16),
        Collector::with_flow(FlowResult::NotLinked),
    );

    h.pipeline.submit(buffer(1, Vec::new())).unwrap();
    h.pipeline.on_barrier_event();
    assert_eq!(h.pipeline.last_flow(), FlowResult::NotLinked);

    let result = h.pipeline.submit(buffer(2, Vec::new()));
    assert!(matches!(result, Err(SchedulerError::Flow(FlowResult::NotLinked))));
    h.pipeline.stop().unwrap();
    assert_eq!(h.sink.len(), 1);
}

#[test]
fn test_lifecycle_errors() {
    let h = harness(SchedulerConfig::classifier(1));
    assert!(matches!(h.pipeline.start(), Err(SchedulerError::AlreadyRunning)));

    h.pipeline.stop().unwrap();
    assert!(matches!(h.pipeline.stop(), Err(SchedulerError::NotRunning)));
    assert!(matches!(
        h.pipeline.submit(buffer(1, Vec::new())),
        Err(SchedulerError::NotRunning)
    ));

    // barrier outside a running pipeline returns at once
    h.pipeline.on_barrier_event();
}

#[test]
fn test_start_rejects_invalid_config() {
    let context = Arc::new(MockContext::new(MockConfig::classifier(16, 16)));
    let converter = Arc::new(HostConverter::new(context.network_info().unwrap()));
    let mut config = SchedulerConfig::classifier(1);
    config.pool_size = 0;

    let pipeline = InferPipeline::new(config, context, converter, Arc::new(Collector::new()));
    assert!(matches!(pipeline.start(), Err(SchedulerError::InvalidConfig(_))));
}

struct CountingHook(AtomicUsize);

impl OutputHook for CountingHook {
    fn on_output(&self, buffer: Option<&Buffer>, output: &BatchOutput) {
        assert!(buffer.is_some());
        self.0.fetch_add(output.frames.len(), Ordering::SeqCst);
    }
}

#[test]
fn test_output_hook_sees_every_batch() {
    let context = Arc::new(MockContext::new(MockConfig::classifier(16, 16)));
    let converter = Arc::new(HostConverter::new(context.network_info().unwrap()));
    let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
    let pipeline = InferPipeline::new(
        SchedulerConfig::classifier(2),
        context.clone(),
        converter,
        Arc::new(Collector::new()),
    )
    .with_output_hook(hook.clone());
    pipeline.start().unwrap();

    let objects = (0..3).map(|id| object(id, 0, 32.0)).collect();
    pipeline.submit(buffer(1, objects)).unwrap();
    pipeline.stop().unwrap();

    assert_eq!(hook.0.load(Ordering::SeqCst), 3);
    assert_eq!(context.released(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_forwarding_preserves_order(
        counts in prop::collection::vec(0u64..4, 1..12),
        batch_size in 1usize..4,
    ) {
        let h = harness(SchedulerConfig::classifier(batch_size));

        for (frame, count) in counts.iter().enumerate() {
            let frame = frame as u64;
            let objects = (0..*count).map(|i| object(frame * 10 + i, 0, 32.0)).collect();
            h.pipeline.submit(buffer(frame, objects)).unwrap();
        }
        h.pipeline.stop().unwrap();

        let expected: Vec<u64> = (0..counts.len() as u64).collect();
        prop_assert_eq!(h.sink.pts(), expected);
        prop_assert!(h.context.batch_sizes().iter().all(|&n| n >= 1 && n <= batch_size));
        prop_assert_eq!(
            h.context.batch_sizes().iter().sum::<usize>() as u64,
            counts.iter().sum::<u64>()
        );
    }
}
