//! Region Conversion
//!
//! Crops a region out of a frame surface, scales it to the network input
//! resolution and writes it into one slot of a batched input buffer.

mod converter;
mod region;

pub use converter::{AspectPolicy, Converted, HostConverter, RegionConverter, ScaleRatio};
pub use region::align_region;

use thiserror::Error;

/// Region conversion errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    #[error("Region {width}x{height} at ({left}, {top}) is empty after alignment")]
    EmptyRegion {
        left: f32,
        top: f32,
        width: f32,
        height: f32,
    },

    #[error("Surface {width}x{height} does not match its pixel data")]
    InvalidSurface { width: u32, height: u32 },

    #[error("Target slot shape {actual:?} does not match network input {expected:?}")]
    TargetShape {
        expected: [usize; 3],
        actual: Vec<usize>,
    },

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),
}
