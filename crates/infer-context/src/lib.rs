//! Batched Inference Context
//!
//! Interface to a device-bound inference backend that accepts batches of
//! pre-converted frames and returns per-frame outputs in submission order,
//! plus a rule-based mock backend used by tests and the demo binary.

mod context;
mod mock;
mod output;

pub use context::{InferenceContext, InputBatch, InputFormat, NetworkInfo, NetworkKind};
pub use mock::{MockConfig, MockContext};
pub use output::{BatchOutput, Detection, FrameOutput, SegmentationMap};

use thiserror::Error;

/// Errors reported by an inference context
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("Context initialization failed: {0}")]
    InitFailed(String),
    #[error("Failed to queue input batch: {0}")]
    QueueFailed(String),
    #[error("Failed to dequeue output batch: {0}")]
    DequeueFailed(String),
    #[error("Invalid input shape: expected {expected}, got {actual}")]
    InvalidInputShape { expected: String, actual: String },
}
