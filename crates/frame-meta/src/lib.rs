//! Frame Metadata for Batched Inference
//!
//! Provides the data carried between pipeline stages:
//! - RGB surfaces, one per frame of a batched buffer
//! - Per-frame and per-object metadata (regions, tracking ids, results)
//! - A reference-counted buffer handle shared by the scheduler threads

pub mod buffer;
pub mod meta;
pub mod surface;

pub use buffer::Buffer;
pub use meta::{
    AttachTarget, Attribute, BatchMeta, ClassificationResult, ClassifierMeta, FrameMeta,
    ObjectMeta, Rect, SegmentationMeta,
};
pub use surface::Surface;

use thiserror::Error;

/// Metadata error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    #[error("Frame index {0} out of range")]
    FrameOutOfRange(usize),

    #[error("Object index {object} out of range in frame {frame}")]
    ObjectOutOfRange { frame: usize, object: usize },
}
