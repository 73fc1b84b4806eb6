//! Parsing and validation of the request fields of a thumbnail.
//!
//! Every inbound identifier and every proxy URL starts as four strings:
//! source path, size, method and extension. This module turns the size and
//! method into typed values and rejects anything malformed before any derived
//! field (secret, key) is computed.
//!
//! ## Size grammar
//!
//! `[W]x[H]`: optional digits, a literal `x`, optional digits. A missing side
//! becomes `0`, which means "derive from the source aspect ratio":
//!
//! - `"200x200"` → 200×200
//! - `"200x"` → 200×0 (height follows the source)
//! - `"x200"` → 0×200 (width follows the source)
//!
//! `"x"`, `"0x0"`, `"200"`, `"200 x 200"` and anything with signs or
//! whitespace are rejected.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("'{0}' is not a valid size string")]
    InvalidSize(String),
    #[error("'{0}' is not a valid method string")]
    InvalidMethod(String),
    #[error("'{0}' is not a valid extension")]
    InvalidExtension(String),
    #[error("source path must not be empty")]
    EmptySource,
}

/// Requested thumbnail bounds. A `0` side is derived from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when one side must be derived from the source aspect ratio.
    pub fn is_one_sided(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Always renders both sides, so `"200x"` round-trips as `"200x0"`.
impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How the source is fitted to the requested size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Fill the box, then trim the overflow (centered or at the configured edge offsets).
    Crop,
    /// Fill the box, then trim the overflow from the edges with the least entropy.
    Smart,
    /// Fill the box and keep the overflow (no trimming).
    Scale,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Crop, Method::Smart, Method::Scale];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Crop => "crop",
            Method::Smart => "smart",
            Method::Scale => "scale",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a size string in the `[W]x[H]` format.
pub fn parse_size(input: &str) -> Result<Size, ParseError> {
    let invalid = || ParseError::InvalidSize(input.to_string());

    let (w, h) = input.split_once('x').ok_or_else(invalid)?;
    let width = parse_side(w).ok_or_else(invalid)?;
    let height = parse_side(h).ok_or_else(invalid)?;

    if width == 0 && height == 0 {
        return Err(invalid());
    }
    Ok(Size { width, height })
}

/// An empty side is the `0` sentinel; anything else must be plain ASCII digits.
fn parse_side(side: &str) -> Option<u32> {
    if side.is_empty() {
        return Some(0);
    }
    if !side.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    side.parse().ok()
}

/// Parse a resize method. Only `crop`, `smart` and `scale` are accepted.
pub fn parse_method(input: &str) -> Result<Method, ParseError> {
    Method::ALL
        .into_iter()
        .find(|m| m.as_str() == input)
        .ok_or_else(|| ParseError::InvalidMethod(input.to_string()))
}

/// Validate an output extension: a dot followed by ASCII alphanumerics.
pub fn parse_extension(input: &str) -> Result<String, ParseError> {
    match input.strip_prefix('.') {
        Some(rest) if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric()) => {
            Ok(input.to_string())
        }
        _ => Err(ParseError::InvalidExtension(input.to_string())),
    }
}
