//! Pure Rust thumbnail backend.
//!
//! ## Pipeline
//!
//! | Step | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP, GIF) | `image::load_from_memory` |
//! | Orientation | `rexif` (EXIF tag 0x0112) + `DynamicImage` rotate/flip |
//! | Colorspace | canonical 8-bit L / LA / RGB / RGBA, alpha optionally composited |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Crop / smart crop | [`calculations`](super::calculations) boxes + `crop_imm` |
//! | Sharpen / detail | `DynamicImage::filter3x3` |
//! | Encode | `JpegEncoder` (quality), `AvifEncoder` (speed 6), `write_to` for the rest |

use super::backend::{BackendError, Generator};
use super::calculations::{CropBox, crop_box, histogram_entropy, plan_scale, smart_trim};
use super::params::{OutputFormat, Quality, TransformOptions};
use crate::parsing::{Method, Size};
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, RgbImage, Rgba};
use rexif::{ExifTag, TagValue};
use std::io::Cursor;
use tracing::{debug, warn};

/// 3x3 sharpen kernel, normalized by `filter3x3`.
const SHARPEN_KERNEL: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];
/// Milder "add detail" kernel.
const DETAIL_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 10.0, -1.0, 0.0, -1.0, 0.0];

/// Alpha replacement colour when the encoder cannot store transparency.
const DEFAULT_BACKGROUND: [u8; 3] = [255, 255, 255];

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-step mapping.
pub struct RustBackend {
    options: TransformOptions,
}

impl RustBackend {
    pub fn new(options: TransformOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new(TransformOptions::default())
    }
}

impl Generator for RustBackend {
    fn generate(
        &self,
        source: &[u8],
        size: Size,
        method: Method,
        format: OutputFormat,
    ) -> Result<Vec<u8>, BackendError> {
        transform(source, size, method, format, &self.options)
    }
}

/// Source bytes in, encoded thumbnail bytes out.
pub fn transform(
    source: &[u8],
    size: Size,
    method: Method,
    format: OutputFormat,
    options: &TransformOptions,
) -> Result<Vec<u8>, BackendError> {
    let img = decode(source, options.orientation)?;
    let img = colorspace(img, options, format);
    let img = scale_and_crop(img, size, method, options);
    let img = filters(img, options);
    encode(&img, format, options.quality)
}

/// Decode and, if asked, apply the EXIF orientation.
fn decode(source: &[u8], orientation: bool) -> Result<DynamicImage, BackendError> {
    let img = image::load_from_memory(source).map_err(|e| BackendError::Decode(e.to_string()))?;
    if !orientation {
        return Ok(img);
    }
    Ok(match exif_orientation(source) {
        Some(value) => apply_orientation(img, value),
        None => img,
    })
}

fn exif_orientation(source: &[u8]) -> Option<u16> {
    let exif = rexif::parse_buffer_quiet(source).0.ok()?;
    let entry = exif
        .entries
        .iter()
        .find(|entry| entry.tag == ExifTag::Orientation)?;
    match &entry.value {
        TagValue::U16(values) => values.first().copied(),
        TagValue::U32(values) => values.first().and_then(|&v| u16::try_from(v).ok()),
        TagValue::U8(values) => values.first().copied().map(u16::from),
        _ => None,
    }
}

/// Rotate and/or flip according to an EXIF orientation value (1-8).
pub fn apply_orientation(image: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Normalize to 8-bit grayscale or RGB, with or without alpha.
///
/// Transparency is composited onto the configured background, or onto white
/// when the output format has no alpha channel. Otherwise it is kept.
fn colorspace(img: DynamicImage, options: &TransformOptions, format: OutputFormat) -> DynamicImage {
    let mut img = img;
    if img.color().has_alpha() {
        let background = options
            .background
            .or((!format.supports_alpha()).then_some(DEFAULT_BACKGROUND));
        if let Some(color) = background {
            img = composite(&img, color);
        }
    }

    let alpha = img.color().has_alpha();
    let gray = options.grayscale || !img.color().has_color();
    match (gray, alpha) {
        (true, true) => DynamicImage::ImageLumaA8(img.to_luma_alpha8()),
        (true, false) => DynamicImage::ImageLuma8(img.to_luma8()),
        (false, true) => DynamicImage::ImageRgba8(img.to_rgba8()),
        (false, false) => DynamicImage::ImageRgb8(img.to_rgb8()),
    }
}

/// Flatten an image with alpha onto a solid colour.
fn composite(img: &DynamicImage, color: [u8; 3]) -> DynamicImage {
    let rgba = img.to_rgba8();
    let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let blend = |fg: u8, bg: u8| -> u8 {
            let a = a as u32;
            ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8
        };
        image::Rgb([blend(r, color[0]), blend(g, color[1]), blend(b, color[2])])
    });
    DynamicImage::ImageRgb8(flattened)
}

/// Resize to the planned scale, then crop according to the method.
fn scale_and_crop(
    img: DynamicImage,
    size: Size,
    method: Method,
    options: &TransformOptions,
) -> DynamicImage {
    let plan = plan_scale((img.width(), img.height()), size, options.upscale);
    debug!(
        source_width = img.width(),
        source_height = img.height(),
        scale = plan.scale,
        target_width = plan.target.0,
        target_height = plan.target.1,
        %method,
        "planned geometry"
    );

    let img = if plan.resize {
        img.resize_exact(plan.scaled.0, plan.scaled.1, FilterType::Lanczos3)
    } else {
        img
    };

    let b = match method {
        Method::Scale => return img,
        Method::Crop => crop_box((img.width(), img.height()), plan.target, options.crop_offset),
        Method::Smart => smart_box(&img, plan.target),
    };
    if (b.x, b.y, b.width, b.height) == (0, 0, img.width(), img.height()) {
        return img;
    }
    img.crop_imm(b.x, b.y, b.width, b.height)
}

/// Crop box removing the lowest-entropy edges on each axis.
fn smart_box(img: &DynamicImage, target: (u32, u32)) -> CropBox {
    let (w, h) = (img.width(), img.height());
    let diff_x = w - w.min(target.0);
    let diff_y = h - h.min(target.1);

    let (left, right) = smart_trim(diff_x, w, |offset, len| region_entropy(img, offset, 0, len, h));
    let (top, bottom) = smart_trim(diff_y, h, |offset, len| {
        region_entropy(img, left, offset, right - left, len)
    });
    CropBox {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    }
}

/// Shannon entropy of the per-channel histogram of a region.
///
/// Expects one of the canonical 8-bit layouts produced by [`colorspace`].
pub fn region_entropy(img: &DynamicImage, x: u32, y: u32, width: u32, height: u32) -> f64 {
    let channels = img.color().channel_count() as usize;
    let stride = img.width() as usize * channels;
    let bytes = img.as_bytes();
    let mut histogram = vec![0u64; 256 * channels];

    for row in y..y + height {
        let start = row as usize * stride + x as usize * channels;
        let end = start + width as usize * channels;
        for (i, &value) in bytes[start..end].iter().enumerate() {
            histogram[(i % channels) * 256 + value as usize] += 1;
        }
    }
    histogram_entropy(&histogram)
}

/// Optional post-resize filters.
fn filters(img: DynamicImage, options: &TransformOptions) -> DynamicImage {
    let mut img = img;
    if options.detail {
        img = img.filter3x3(&DETAIL_KERNEL);
    }
    if options.sharpen {
        img = img.filter3x3(&SHARPEN_KERNEL);
    }
    img
}

/// Encode with the tuned encoder, falling back once to the plain path when
/// the tuned one hits an encoder limit.
fn encode(img: &DynamicImage, format: OutputFormat, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let img = prepare_for_encoder(img, format);
    match encode_tuned(&img, format, quality) {
        Ok(bytes) => Ok(bytes),
        Err(e @ (ImageError::Limits(_) | ImageError::Encoding(_))) => {
            warn!(error = %e, ?format, "tuned encode failed, retrying with defaults");
            encode_plain(&img, format)
        }
        Err(e) => Err(BackendError::Encode(e.to_string())),
    }
}

/// Convert layouts some encoders reject into ones they accept.
fn prepare_for_encoder(img: &DynamicImage, format: OutputFormat) -> DynamicImage {
    use image::ColorType;
    match (format, img.color()) {
        (OutputFormat::Gif, ColorType::Rgba8) => img.clone(),
        (OutputFormat::Gif, _) => DynamicImage::ImageRgba8(img.to_rgba8()),
        (OutputFormat::Avif | OutputFormat::Tiff, ColorType::La8) => {
            DynamicImage::ImageRgba8(img.to_rgba8())
        }
        (OutputFormat::Avif, ColorType::L8) => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img.clone(),
    }
}

fn encode_tuned(img: &DynamicImage, format: OutputFormat, quality: Quality) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality.value() as u8);
            img.write_with_encoder(encoder)?;
        }
        OutputFormat::Avif => {
            let encoder = image::codecs::avif::AvifEncoder::new_with_speed_quality(
                &mut buf,
                6,
                quality.value() as u8,
            );
            img.write_with_encoder(encoder)?;
        }
        other => img.write_to(&mut Cursor::new(&mut buf), other.image_format())?,
    }
    Ok(buf)
}

fn encode_plain(img: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format.image_format())
        .map_err(|e| BackendError::Encode(e.to_string()))?;
    Ok(buf)
}
