//! Per-frame and per-object metadata attached to batched buffers

use serde::{Deserialize, Serialize};

use crate::MetaError;

/// Axis-aligned region in surface pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self { left, top, width, height }
    }

    /// Region area in pixels
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// One attribute of a classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Index of the classifier output layer this attribute came from
    pub index: u32,
    /// Winning class within that layer
    pub value: u32,
    pub confidence: f32,
    pub label: String,
}

/// Label and attributes produced by a classifier for one region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub attributes: Vec<Attribute>,
}

impl ClassificationResult {
    /// True when the classifier produced neither a label nor attributes
    pub fn is_empty(&self) -> bool {
        self.label.is_empty() && self.attributes.is_empty()
    }
}

/// Classifier output attached to an object or a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierMeta {
    /// Unique id of the inference component that produced the result
    pub component_id: u32,
    pub label: String,
    pub attributes: Vec<Attribute>,
}

impl ClassifierMeta {
    pub fn from_result(component_id: u32, result: &ClassificationResult) -> Self {
        Self {
            component_id,
            label: result.label.clone(),
            attributes: result.attributes.clone(),
        }
    }
}

/// Per-pixel class map produced by a segmentation network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMeta {
    pub component_id: u32,
    pub width: u32,
    pub height: u32,
    pub num_classes: u32,
    /// Row-major class index per pixel, -1 for background
    pub class_map: Vec<i32>,
}

/// A region of interest inside a frame, usually produced by an upstream detector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Tracking id assigned upstream; `None` for untracked objects
    pub object_id: Option<u64>,
    pub class_id: i32,
    /// Unique id of the component that produced this object, -1 when unknown
    pub component_id: i32,
    pub confidence: f32,
    pub rect: Rect,
    pub label: String,
    pub classifiers: Vec<ClassifierMeta>,
    pub segmentation: Option<SegmentationMeta>,
}

impl ObjectMeta {
    /// Create a tracked object produced by the given component
    pub fn tracked(object_id: u64, class_id: i32, component_id: i32, rect: Rect) -> Self {
        Self {
            object_id: Some(object_id),
            class_id,
            component_id,
            rect,
            ..Default::default()
        }
    }

    /// Create an object without a tracking id
    pub fn untracked(class_id: i32, component_id: i32, rect: Rect) -> Self {
        Self {
            object_id: None,
            class_id,
            component_id,
            rect,
            ..Default::default()
        }
    }
}

/// Metadata of one frame inside a batched buffer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Upstream source (pad) this frame came from
    pub source_id: u32,
    pub frame_num: u64,
    /// Index of this frame's surface within the buffer
    pub batch_id: usize,
    pub objects: Vec<ObjectMeta>,
    pub classifiers: Vec<ClassifierMeta>,
    pub segmentation: Option<SegmentationMeta>,
}

impl FrameMeta {
    pub fn new(source_id: u32, frame_num: u64, batch_id: usize) -> Self {
        Self {
            source_id,
            frame_num,
            batch_id,
            ..Default::default()
        }
    }

    pub fn with_objects(mut self, objects: Vec<ObjectMeta>) -> Self {
        self.objects = objects;
        self
    }
}

/// Location of a frame or object inside a buffer's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachTarget {
    pub frame: usize,
    /// `None` targets the frame itself
    pub object: Option<usize>,
}

impl AttachTarget {
    pub fn frame(frame: usize) -> Self {
        Self { frame, object: None }
    }

    pub fn object(frame: usize, object: usize) -> Self {
        Self { frame, object: Some(object) }
    }
}

/// Metadata for all frames in a batched buffer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchMeta {
    pub frames: Vec<FrameMeta>,
}

impl BatchMeta {
    pub fn new(frames: Vec<FrameMeta>) -> Self {
        Self { frames }
    }

    fn frame_mut(&mut self, frame: usize) -> Result<&mut FrameMeta, MetaError> {
        self.frames
            .get_mut(frame)
            .ok_or(MetaError::FrameOutOfRange(frame))
    }

    /// Look up the object addressed by `target`
    pub fn object(&self, target: AttachTarget) -> Option<&ObjectMeta> {
        let frame = self.frames.get(target.frame)?;
        target.object.and_then(|idx| frame.objects.get(idx))
    }

    /// Attach classifier output to an object, or to the frame when the target has no object
    pub fn attach_classifier(
        &mut self,
        target: AttachTarget,
        meta: ClassifierMeta,
    ) -> Result<(), MetaError> {
        let frame = self.frame_mut(target.frame)?;
        match target.object {
            Some(idx) => {
                let object = frame
                    .objects
                    .get_mut(idx)
                    .ok_or(MetaError::ObjectOutOfRange { frame: target.frame, object: idx })?;
                object.classifiers.push(meta);
            }
            None => frame.classifiers.push(meta),
        }
        Ok(())
    }

    /// Attach a segmentation map to an object or frame, replacing any previous map
    pub fn attach_segmentation(
        &mut self,
        target: AttachTarget,
        meta: SegmentationMeta,
    ) -> Result<(), MetaError> {
        let frame = self.frame_mut(target.frame)?;
        match target.object {
            Some(idx) => {
                let object = frame
                    .objects
                    .get_mut(idx)
                    .ok_or(MetaError::ObjectOutOfRange { frame: target.frame, object: idx })?;
                object.segmentation = Some(meta);
            }
            None => frame.segmentation = Some(meta),
        }
        Ok(())
    }

    /// Append a newly detected object to a frame
    pub fn add_object(&mut self, frame: usize, object: ObjectMeta) -> Result<(), MetaError> {
        self.frame_mut(frame)?.objects.push(object);
        Ok(())
    }
}
