//! Rule-based mock inference backend

use std::collections::VecDeque;
use std::time::Duration;

use frame_meta::{Attribute, ClassificationResult};
use ndarray::{ArrayView3, Axis};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::{InferenceContext, InputBatch, InputFormat, NetworkInfo, NetworkKind};
use crate::output::{BatchOutput, Detection, FrameOutput, SegmentationMap};
use crate::InferenceError;

/// Luma above which a pixel counts as foreground
const FOREGROUND_LUMA: u8 = 128;

/// Mock backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub kind: NetworkKind,
    pub width: u32,
    pub height: u32,
    pub format: InputFormat,
    /// Simulated device latency per dequeued batch (ms)
    pub latency_ms: u64,
    /// Classifier labels, picked by mean brightness (darkest first)
    pub labels: Vec<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            kind: NetworkKind::Classifier,
            width: 64,
            height: 64,
            format: InputFormat::Rgb,
            latency_ms: 0,
            labels: vec!["dark".to_string(), "light".to_string()],
        }
    }
}

impl MockConfig {
    /// Detector preset
    pub fn detector(width: u32, height: u32) -> Self {
        Self {
            kind: NetworkKind::Detector,
            width,
            height,
            ..Default::default()
        }
    }

    /// Classifier preset
    pub fn classifier(width: u32, height: u32) -> Self {
        Self {
            kind: NetworkKind::Classifier,
            width,
            height,
            ..Default::default()
        }
    }

    /// Segmentation preset
    pub fn segmentation(width: u32, height: u32) -> Self {
        Self {
            kind: NetworkKind::Segmentation,
            width,
            height,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    pending: VecDeque<BatchOutput>,
    next_id: u64,
    batch_sizes: Vec<usize>,
    released: usize,
    fail_queue: usize,
    fail_dequeue: usize,
}

/// Mock inference context producing outputs derived from pixel brightness.
///
/// - classifier: label chosen by mean luma
/// - detector: bounding box of bright pixels
/// - segmentation: bright/dark two-class map
pub struct MockContext {
    config: MockConfig,
    state: Mutex<MockState>,
}

impl MockContext {
    /// Create a new mock context
    pub fn new(config: MockConfig) -> Self {
        info!(
            kind = config.kind.as_str(),
            width = config.width,
            height = config.height,
            "Creating mock inference context"
        );
        Self {
            config,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Fail the next `count` calls to `queue_input_batch`
    pub fn fail_next_queue(&self, count: usize) {
        self.state.lock().fail_queue += count;
    }

    /// Fail the next `count` calls to `dequeue_output_batch`
    pub fn fail_next_dequeue(&self, count: usize) {
        self.state.lock().fail_dequeue += count;
    }

    /// Frame counts of every successfully queued batch
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().batch_sizes.clone()
    }

    /// Number of released output batches
    pub fn released(&self) -> usize {
        self.state.lock().released
    }

    fn infer_frame(&self, frame: ArrayView3<'_, u8>) -> FrameOutput {
        let luma = luma_plane(frame);
        match self.config.kind {
            NetworkKind::Classifier => FrameOutput::Classification(self.classify(&luma)),
            NetworkKind::Detector => FrameOutput::Detection(self.detect(&luma)),
            NetworkKind::Segmentation => FrameOutput::Segmentation(SegmentationMap {
                width: self.config.width,
                height: self.config.height,
                num_classes: 2,
                class_map: luma
                    .iter()
                    .map(|&v| i32::from(v > FOREGROUND_LUMA))
                    .collect(),
            }),
        }
    }

    fn classify(&self, luma: &[u8]) -> ClassificationResult {
        if self.config.labels.is_empty() || luma.is_empty() {
            return ClassificationResult::default();
        }

        let mean = luma.iter().map(|&v| v as usize).sum::<usize>() / luma.len();
        let bucket = (mean * self.config.labels.len() / 256).min(self.config.labels.len() - 1);
        let label = self.config.labels[bucket].clone();

        ClassificationResult {
            label: label.clone(),
            attributes: vec![Attribute {
                index: 0,
                value: bucket as u32,
                confidence: 0.9,
                label,
            }],
        }
    }

    fn detect(&self, luma: &[u8]) -> Vec<Detection> {
        let width = self.config.width as usize;
        let mut bounds: Option<(usize, usize, usize, usize)> = None;

        for (idx, &v) in luma.iter().enumerate() {
            if v <= FOREGROUND_LUMA {
                continue;
            }
            let (x, y) = (idx % width, idx / width);
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }

        bounds
            .map(|(x0, y0, x1, y1)| {
                vec![Detection {
                    class_id: 0,
                    confidence: 0.8,
                    left: x0 as f32,
                    top: y0 as f32,
                    width: (x1 - x0 + 1) as f32,
                    height: (y1 - y0 + 1) as f32,
                    label: "object".to_string(),
                }]
            })
            .unwrap_or_default()
    }
}

/// Per-pixel luma of an `[height, width, channels]` frame, row-major
fn luma_plane(frame: ArrayView3<'_, u8>) -> Vec<u8> {
    frame
        .lanes(Axis(2))
        .into_iter()
        .map(|px| {
            if px.len() >= 3 {
                ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8
            } else {
                px[0]
            }
        })
        .collect()
}

impl InferenceContext for MockContext {
    fn network_info(&self) -> Result<NetworkInfo, InferenceError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(InferenceError::InitFailed(format!(
                "invalid network resolution {}x{}",
                self.config.width, self.config.height
            )));
        }
        Ok(NetworkInfo {
            width: self.config.width,
            height: self.config.height,
            format: self.config.format,
        })
    }

    fn queue_input_batch(&self, batch: InputBatch<'_>) -> Result<(), InferenceError> {
        let info = self.network_info()?;
        let shape = batch.data.shape();
        if shape[1..] != info.frame_shape() || batch.num_frames() == 0 {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("[n>0, {:?}]", info.frame_shape()),
                actual: format!("{:?}", shape),
            });
        }

        {
            let mut state = self.state.lock();
            if state.fail_queue > 0 {
                state.fail_queue -= 1;
                warn!("Injected queue failure");
                return Err(InferenceError::QueueFailed("injected failure".to_string()));
            }
        }

        let frames: Vec<FrameOutput> = batch
            .data
            .outer_iter()
            .map(|frame| self.infer_frame(frame))
            .collect();

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.batch_sizes.push(frames.len());
        state.pending.push_back(BatchOutput { id, frames });
        debug!(id, frames = batch.num_frames(), "Queued input batch");
        Ok(())
    }

    fn dequeue_output_batch(&self) -> Result<BatchOutput, InferenceError> {
        if self.config.latency_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.latency_ms));
        }

        let mut state = self.state.lock();
        let output = state
            .pending
            .pop_front()
            .ok_or_else(|| InferenceError::DequeueFailed("no batch in flight".to_string()))?;

        if state.fail_dequeue > 0 {
            state.fail_dequeue -= 1;
            warn!(id = output.id, "Injected dequeue failure");
            return Err(InferenceError::DequeueFailed("injected failure".to_string()));
        }

        Ok(output)
    }

    fn release_batch_output(&self, output: BatchOutput) {
        debug!(id = output.id, "Released output batch");
        self.state.lock().released += 1;
    }
}
