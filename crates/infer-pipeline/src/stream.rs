//! Synthetic multi-source stream

use frame_meta::{BatchMeta, Buffer, FrameMeta, ObjectMeta, Rect, Surface};
use infer_scheduler::SinkEvent;

use crate::settings::StreamConfig;

/// Nominal frame duration used for buffer timestamps (30 fps)
const FRAME_DURATION_NS: u64 = 33_333_333;
/// Side of a freshly appearing object (px)
const BASE_OBJECT_SIZE: u32 = 32;
/// Component id stamped on the synthetic upstream detections
const UPSTREAM_COMPONENT_ID: i32 = 1;

/// One element of the synthetic stream
#[derive(Debug)]
pub enum StreamItem {
    Buffer(Buffer),
    Event(SinkEvent),
}

/// Batched buffers with one frame per source and a few moving tracked
/// objects each, framed by source-added and end-of-stream events.
pub struct SyntheticStream {
    config: StreamConfig,
    frame: u64,
    pending_events: Vec<SinkEvent>,
    finished: bool,
}

impl SyntheticStream {
    pub fn new(config: StreamConfig) -> Self {
        let pending_events = (0..config.sources).rev().map(SinkEvent::SourceAdded).collect();
        Self {
            config,
            frame: 0,
            pending_events,
            finished: false,
        }
    }

    fn object_rect(&self, index: u32, frame: u64) -> Rect {
        let size = BASE_OBJECT_SIZE + (frame % 24) as u32;
        let span_x = self.config.width.saturating_sub(size).max(1) as u64;
        let span_y = self.config.height.saturating_sub(size).max(1) as u64;
        let left = (u64::from(index) * 53 + frame * 3) % span_x;
        let top = (u64::from(index) * 37 + frame * 2) % span_y;
        Rect::new(left as f32, top as f32, size as f32, size as f32)
    }

    fn build_buffer(&self) -> Buffer {
        let mut surfaces = Vec::with_capacity(self.config.sources as usize);
        let mut frames = Vec::with_capacity(self.config.sources as usize);

        for source_id in 0..self.config.sources {
            let mut surface = Surface::filled(self.config.width, self.config.height, [16, 16, 16]);
            let objects = (0..self.config.objects_per_source)
                .map(|index| {
                    let rect = self.object_rect(index, self.frame);
                    let shade = (40 + index * 70).min(255) as u8;
                    surface.fill_rect(
                        rect.left as u32,
                        rect.top as u32,
                        rect.width as u32,
                        rect.height as u32,
                        [shade, shade, shade],
                    );
                    let object_id = u64::from(source_id) * 1000 + u64::from(index);
                    let class_id = (index % 3) as i32;
                    let mut object =
                        ObjectMeta::tracked(object_id, class_id, UPSTREAM_COMPONENT_ID, rect);
                    object.confidence = 0.9;
                    object
                })
                .collect();

            frames.push(
                FrameMeta::new(source_id, self.frame, source_id as usize).with_objects(objects),
            );
            surfaces.push(surface);
        }

        Buffer::new(self.frame * FRAME_DURATION_NS, surfaces, BatchMeta::new(frames))
    }
}

impl Iterator for SyntheticStream {
    type Item = StreamItem;

    fn next(&mut self) -> Option<StreamItem> {
        if let Some(event) = self.pending_events.pop() {
            return Some(StreamItem::Event(event));
        }
        if self.finished {
            return None;
        }

        if self.frame < self.config.frames {
            let buffer = self.build_buffer();
            self.frame += 1;
            return Some(StreamItem::Buffer(buffer));
        }

        self.finished = true;
        self.pending_events.push(SinkEvent::Eos);
        self.pending_events
            .extend((0..self.config.sources).rev().map(SinkEvent::StreamEnd));
        self.pending_events.pop().map(StreamItem::Event)
    }
}
