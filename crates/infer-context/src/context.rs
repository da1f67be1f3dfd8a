//! Inference context interface

use ndarray::ArrayView4;
use serde::{Deserialize, Serialize};

use crate::output::BatchOutput;
use crate::InferenceError;

/// What a network produces, and therefore how its output is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    Detector,
    Classifier,
    Segmentation,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::Detector => "detector",
            NetworkKind::Classifier => "classifier",
            NetworkKind::Segmentation => "segmentation",
        }
    }
}

/// Pixel layout expected by the network input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Rgb,
    Bgr,
    Gray,
}

impl InputFormat {
    pub fn channels(&self) -> usize {
        match self {
            InputFormat::Rgb | InputFormat::Bgr => 3,
            InputFormat::Gray => 1,
        }
    }
}

/// Network input resolution and format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub width: u32,
    pub height: u32,
    pub format: InputFormat,
}

impl NetworkInfo {
    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// Bytes per row of one converted frame
    pub fn pitch(&self) -> usize {
        self.width as usize * self.channels()
    }

    /// Shape of one converted frame: `[height, width, channels]`
    pub fn frame_shape(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, self.channels()]
    }
}

/// Converted frames handed to the backend, `[frames, height, width, channels]`
#[derive(Debug, Clone)]
pub struct InputBatch<'a> {
    pub data: ArrayView4<'a, u8>,
    pub format: InputFormat,
    pub pitch: usize,
}

impl InputBatch<'_> {
    pub fn num_frames(&self) -> usize {
        self.data.shape()[0]
    }
}

/// A batched inference backend.
///
/// Outputs are dequeued in the order their inputs were queued. Queueing and
/// dequeueing may block and are called from different threads.
pub trait InferenceContext: Send + Sync {
    /// Input resolution and format of the loaded network
    fn network_info(&self) -> Result<NetworkInfo, InferenceError>;

    /// Submit a batch of converted frames
    fn queue_input_batch(&self, batch: InputBatch<'_>) -> Result<(), InferenceError>;

    /// Wait for the outputs of the oldest queued batch
    fn dequeue_output_batch(&self) -> Result<BatchOutput, InferenceError>;

    /// Return an output batch's resources to the backend
    fn release_batch_output(&self, output: BatchOutput);
}
