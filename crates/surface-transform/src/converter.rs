//! Region converters

use frame_meta::{Rect, Surface};
use image::imageops::{self, FilterType};
use image::RgbImage;
use infer_context::{InputFormat, NetworkInfo};
use ndarray::ArrayViewMut3;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::region::align_region;
use crate::ConvertError;

/// How a region is fitted into the network resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectPolicy {
    /// Scale each axis independently to fill the input
    #[default]
    Stretch,
    /// Scale uniformly and pad the right/bottom with black
    MaintainAspectRatio,
}

/// Network-input pixels per source pixel along each axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRatio {
    pub x: f32,
    pub y: f32,
}

/// Result of converting one region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Converted {
    pub ratio: ScaleRatio,
    /// Aligned source region that was actually converted
    pub region: Rect,
}

impl Converted {
    /// Map a rectangle in network-input coordinates back to surface coordinates
    pub fn to_surface(&self, rect: &Rect) -> Rect {
        Rect::new(
            rect.left / self.ratio.x + self.region.left,
            rect.top / self.ratio.y + self.region.top,
            rect.width / self.ratio.x,
            rect.height / self.ratio.y,
        )
    }
}

/// Converts a surface region into one `[height, width, channels]` input slot
pub trait RegionConverter: Send + Sync {
    fn convert(
        &self,
        surface: &Surface,
        region: &Rect,
        target: ArrayViewMut3<'_, u8>,
        policy: AspectPolicy,
    ) -> Result<Converted, ConvertError>;
}

/// CPU converter backed by the `image` crate
#[derive(Debug, Clone)]
pub struct HostConverter {
    info: NetworkInfo,
    filter: FilterType,
}

impl HostConverter {
    pub fn new(info: NetworkInfo) -> Self {
        Self {
            info,
            filter: FilterType::Triangle,
        }
    }
}

impl RegionConverter for HostConverter {
    fn convert(
        &self,
        surface: &Surface,
        region: &Rect,
        mut target: ArrayViewMut3<'_, u8>,
        policy: AspectPolicy,
    ) -> Result<Converted, ConvertError> {
        if !surface.is_valid() {
            return Err(ConvertError::InvalidSurface {
                width: surface.width,
                height: surface.height,
            });
        }

        let expected = self.info.frame_shape();
        if target.shape() != expected {
            return Err(ConvertError::TargetShape {
                expected,
                actual: target.shape().to_vec(),
            });
        }

        let (left, top, width, height) = align_region(region, surface.width, surface.height)
            .ok_or(ConvertError::EmptyRegion {
                left: region.left,
                top: region.top,
                width: region.width,
                height: region.height,
            })?;

        let cropped = surface
            .crop(left, top, width, height)
            .ok_or_else(|| ConvertError::ImageProcessing("crop out of bounds".to_string()))?;
        let img = RgbImage::from_raw(width, height, cropped.data)
            .ok_or_else(|| ConvertError::ImageProcessing("failed to create image buffer".into()))?;

        let (net_w, net_h) = (self.info.width, self.info.height);
        let ratio = match policy {
            AspectPolicy::Stretch => ScaleRatio {
                x: net_w as f32 / width as f32,
                y: net_h as f32 / height as f32,
            },
            AspectPolicy::MaintainAspectRatio => {
                let r = (net_w as f32 / width as f32).min(net_h as f32 / height as f32);
                ScaleRatio { x: r, y: r }
            }
        };

        let out_w = ((width as f32 * ratio.x).round() as u32).clamp(1, net_w);
        let out_h = ((height as f32 * ratio.y).round() as u32).clamp(1, net_h);
        let resized = imageops::resize(&img, out_w, out_h, self.filter);
        let gray = match self.info.format {
            InputFormat::Gray => Some(Surface::new(resized.as_raw().clone(), out_w, out_h).to_grayscale()),
            _ => None,
        };

        target.fill(0);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (row, col) = (y as usize, x as usize);
            match self.info.format {
                InputFormat::Rgb => {
                    for c in 0..3 {
                        target[[row, col, c]] = pixel[c];
                    }
                }
                InputFormat::Bgr => {
                    for c in 0..3 {
                        target[[row, col, c]] = pixel[2 - c];
                    }
                }
                InputFormat::Gray => {
                    if let Some(gray) = &gray {
                        target[[row, col, 0]] = gray[row * out_w as usize + col];
                    }
                }
            }
        }

        trace!(left, top, width, height, out_w, out_h, "Converted region");

        Ok(Converted {
            ratio,
            region: Rect::new(left as f32, top as f32, width as f32, height as f32),
        })
    }
}
