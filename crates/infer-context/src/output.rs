//! Network output types

use frame_meta::ClassificationResult;
use serde::{Deserialize, Serialize};

/// One detected box in network input coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i32,
    pub confidence: f32,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub label: String,
}

/// Per-pixel class map at network resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMap {
    pub width: u32,
    pub height: u32,
    pub num_classes: u32,
    pub class_map: Vec<i32>,
}

/// Parsed output for one frame of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameOutput {
    Detection(Vec<Detection>),
    Classification(ClassificationResult),
    Segmentation(SegmentationMap),
}

/// Outputs of one queued batch, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    /// Sequence number of the queued batch
    pub id: u64,
    pub frames: Vec<FrameOutput>,
}
