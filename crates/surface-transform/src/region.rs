//! Region alignment

use frame_meta::Rect;

/// Align a region for conversion and clip it to the surface.
///
/// Left and top are rounded up to even values, width and height down to even
/// values. Returns `(left, top, width, height)` in whole pixels, or `None`
/// when nothing of the region remains.
pub fn align_region(rect: &Rect, surface_width: u32, surface_height: u32) -> Option<(u32, u32, u32, u32)> {
    let left = round_up_even(rect.left);
    let top = round_up_even(rect.top);
    if left >= surface_width || top >= surface_height {
        return None;
    }

    let width = round_down_even(rect.width).min((surface_width - left) & !1);
    let height = round_down_even(rect.height).min((surface_height - top) & !1);
    if width == 0 || height == 0 {
        return None;
    }

    Some((left, top, width, height))
}

fn round_up_even(v: f32) -> u32 {
    let v = v.max(0.0).ceil() as u32;
    v + (v & 1)
}

fn round_down_even(v: f32) -> u32 {
    (v.max(0.0) as u32) & !1
}
