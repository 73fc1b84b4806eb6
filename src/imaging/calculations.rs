//! Pure calculation functions for thumbnail geometry.
//!
//! All functions here are pure and testable without any I/O or images. The
//! backend feeds them source dimensions (and, for smart cropping, an entropy
//! probe) and applies the boxes they return.

use super::params::{AxisOffset, CropOffset};
use crate::parsing::Size;

/// Resize decision for one source/target pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalePlan {
    /// Scale factor applied to the source.
    pub scale: f64,
    /// Dimensions after the resize step (the source dimensions when no resize happens).
    pub scaled: (u32, u32),
    /// Requested box with `0` sides resolved from the aspect ratio.
    pub target: (u32, u32),
    /// Whether the resize step runs at all.
    pub resize: bool,
}

/// Work out the scale factor and resolved target box.
///
/// Every method covers the box: the larger of the axis ratios wins, so both
/// scaled sides reach the box. Cropping methods then trim the overflow and
/// `scale` keeps it. A `0` target side becomes the scaled source side. The image is only resized when shrinking, or when
/// enlarging and `upscale` is allowed.
///
/// # Examples
/// ```
/// # use lazy_thumbs::imaging::calculations::plan_scale;
/// # use lazy_thumbs::parsing::Size;
/// let plan = plan_scale((800, 600), Size::new(200, 0), true);
/// assert_eq!(plan.target, (200, 150));
/// assert_eq!(plan.scaled, (200, 150));
/// ```
pub fn plan_scale(source: (u32, u32), size: Size, upscale: bool) -> ScalePlan {
    let (src_w, src_h) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let (tgt_w, tgt_h) = (size.width as f64, size.height as f64);

    let ratio_w = tgt_w / src_w;
    let ratio_h = tgt_h / src_h;
    let scale = ratio_w.max(ratio_h);

    let target = (
        if size.width == 0 {
            round_dim(src_w * scale)
        } else {
            size.width
        },
        if size.height == 0 {
            round_dim(src_h * scale)
        } else {
            size.height
        },
    );

    let resize = scale < 1.0 || (scale > 1.0 && upscale);
    let scaled = if resize {
        (round_dim(src_w * scale), round_dim(src_h * scale))
    } else {
        source
    };

    ScalePlan {
        scale,
        scaled,
        target,
        resize,
    }
}

fn round_dim(value: f64) -> u32 {
    (value.round() as u32).max(1)
}

/// A crop rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropBox {
    fn from_edges(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }
}

/// Crop box trimming `scaled` down to `target`.
///
/// Centered by default (half the overflow from each side). An axis with an
/// [`AxisOffset`] trims `target * percent / 100` pixels (capped at the
/// overflow) from its near edge, or keeps that many from its far edge.
pub fn crop_box(scaled: (u32, u32), target: (u32, u32), offset: Option<CropOffset>) -> CropBox {
    let (w, h) = scaled;
    let diff_x = w - w.min(target.0);
    let diff_y = h - h.min(target.1);

    let (left, right) = axis_span(w, target.0, diff_x, offset.and_then(|o| o.x));
    let (top, bottom) = axis_span(h, target.1, diff_y, offset.and_then(|o| o.y));
    CropBox::from_edges(left, top, right, bottom)
}

fn axis_span(extent: u32, target: u32, diff: u32, offset: Option<AxisOffset>) -> (u32, u32) {
    match offset {
        None => {
            let half = diff / 2;
            (half, extent.min(target + half))
        }
        Some(axis) => {
            let shift = (target as u64 * axis.percent as u64 / 100).min(diff as u64) as u32;
            if axis.from_far_edge {
                (diff - shift, extent - shift)
            } else {
                (shift, extent - (diff - shift))
            }
        }
    }
}

/// Shannon entropy (bits) of a histogram.
pub fn histogram_entropy(histogram: &[u64]) -> f64 {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -histogram
        .iter()
        .filter(|&&count| count != 0)
        .map(|&count| {
            let p = count as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}

/// Decide how much of a slice to remove from each edge.
///
/// Returns `(from_start, from_end)`. When the entropies differ by less than
/// 1% the removal is split between both edges; otherwise the whole slice is
/// taken from the edge with less information.
pub fn compare_entropy(start: f64, end: f64, slice: u32, difference: u32) -> (u32, u32) {
    if end != 0.0 && (start / end - 1.0).abs() < 0.01 {
        if difference >= slice * 2 {
            return (slice, slice);
        }
        let half = slice / 2;
        return (half, slice - half);
    }
    if start > end { (0, slice) } else { (slice, 0) }
}

/// Smallest slice examined per iteration of [`smart_trim`].
const MIN_SLICE: u32 = 10;

/// Trim `diff` pixels off an axis of length `extent`, least entropy first.
///
/// `entropy(offset, len)` must return the entropy of the slice starting at
/// `offset` along the axis. Each round examines a slice of a fifth of the
/// remaining overflow (at least [`MIN_SLICE`] pixels, at most the overflow)
/// at both edges. Returns the kept span as `(start, end)`.
pub fn smart_trim(diff: u32, extent: u32, mut entropy: impl FnMut(u32, u32) -> f64) -> (u32, u32) {
    let mut diff = diff.min(extent);
    let (mut start, mut end) = (0, extent);
    while diff > 0 {
        let slice = diff.min((diff / 5).max(MIN_SLICE));
        let head = entropy(start, slice);
        let tail = entropy(end - slice, slice);
        let (add, remove) = compare_entropy(head, tail, slice, diff);
        start += add;
        end -= remove;
        diff -= add + remove;
    }
    (start, end)
}
