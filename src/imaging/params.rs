//! Parameter types for the transform pipeline.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the configuration layer and the
//! [`backend`](super::backend), which does the pixel work.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 85). Clamped on construction.
//! - [`CropOffset`]: Per-axis edge offsets for `crop`, parsed from `"x,y"`.
//! - [`OutputFormat`]: Encoder selected from the requested extension.
//! - [`TransformOptions`]: Everything besides size and method that shapes the output.

use image::ImageFormat;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// Offset along one axis, as a percentage of the target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisOffset {
    pub percent: u32,
    /// Measure from the right/bottom edge instead of the left/top one.
    pub from_far_edge: bool,
}

/// Edge offsets for `crop`. An axis without an offset stays centered.
///
/// Parsed from `"x,y"`:
/// - `"0,0"` crops from the left and top edges
/// - `"-10,-0"` keeps 10% from the right edge and crops from the bottom
/// - `",0"` centers horizontally and crops from the top
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropOffset {
    pub x: Option<AxisOffset>,
    pub y: Option<AxisOffset>,
}

impl CropOffset {
    pub fn parse(input: &str) -> Option<Self> {
        let (x, y) = input.split_once(',')?;
        Some(Self {
            x: parse_axis(x)?,
            y: parse_axis(y)?,
        })
    }
}

/// `Some(None)` for an empty axis, `None` when the axis is malformed.
fn parse_axis(input: &str) -> Option<Option<AxisOffset>> {
    if input.is_empty() {
        return Some(None);
    }
    let (from_far_edge, digits) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let percent = digits.parse().ok()?;
    Some(Some(AxisOffset {
        percent,
        from_far_edge,
    }))
}

/// Parse a `#rrggbb` (or `#rgb`) colour.
pub fn parse_hex_color(input: &str) -> Option<[u8; 3]> {
    let hex = input.strip_prefix('#')?;
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let bytes = hex::decode(expanded).ok()?;
    Some([bytes[0], bytes[1], bytes[2]])
}

/// Encoder selected from the requested output extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Tiff,
    Avif,
}

impl OutputFormat {
    /// Map an extension (with or without the leading dot, any case).
    pub fn from_extension(extension: &str) -> Option<Self> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "gif" => Some(Self::Gif),
            "tif" | "tiff" => Some(Self::Tiff),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::WebP => ImageFormat::WebP,
            Self::Gif => ImageFormat::Gif,
            Self::Tiff => ImageFormat::Tiff,
            Self::Avif => ImageFormat::Avif,
        }
    }

    /// Whether the encoder can store an alpha channel.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
            Self::Tiff => "image/tiff",
            Self::Avif => "image/avif",
        }
    }
}

/// Pipeline options shared by every thumbnail a service produces.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    pub quality: Quality,
    /// Allow enlarging sources smaller than the requested size.
    pub upscale: bool,
    /// Apply EXIF orientation before anything else.
    pub orientation: bool,
    pub grayscale: bool,
    /// Replace transparency with this colour. Kept as alpha when `None`
    /// and the output format supports it.
    pub background: Option<[u8; 3]>,
    pub sharpen: bool,
    pub detail: bool,
    pub crop_offset: Option<CropOffset>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            upscale: true,
            orientation: true,
            grayscale: false,
            background: None,
            sharpen: false,
            detail: false,
            crop_offset: None,
        }
    }
}
