//! CLI output formatting.
//!
//! # Output Format
//!
//! ## generate / resolve
//!
//! ```text
//! animals/kitten.jpg → animals/kitten.jpg_200x200_crop.jpg (generated)
//!     Size: 200x200 crop
//!     URL: /media/thumbnails/animals/kitten.jpg_200x200_crop.jpg
//!     Path: media/thumbnails/animals/kitten.jpg_200x200_crop.jpg
//!     Delivery: X-Accel-Redirect: /media/thumbnails/animals/kitten.jpg_200x200_crop.jpg
//! ```
//!
//! ## Errors
//!
//! ```text
//! busy: thumbnail is being generated by another worker
//!     Retry: yes
//!     Cache: no-store
//! ```
//!
//! Each `format_*` function returns `Vec<String>` for testability; the
//! `print_*` wrappers write to stdout or stderr. `--json` output goes through
//! [`thumbnail_json`] instead.

use crate::delivery::Delivery;
use crate::service::{CacheHint, ErrorKind, Outcome, Thumbnail, ThumbnailError};

fn indent(line: impl AsRef<str>) -> String {
    format!("    {}", line.as_ref())
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Generated => "generated",
        Outcome::AlreadyExists => "exists",
    }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ClientInput => "invalid request",
        ErrorKind::Unauthorized => "unauthorized",
        ErrorKind::NotFound => "not found",
        ErrorKind::Busy => "busy",
        ErrorKind::Server => "error",
    }
}

fn cache_label(hint: CacheHint) -> String {
    match hint {
        CacheHint::NoStore => "no-store".to_string(),
        CacheHint::ShortLived(secs) => format!("{secs}s"),
        CacheHint::Default => "default".to_string(),
    }
}

/// One-line description of a delivery instruction.
pub fn format_delivery(delivery: &Delivery) -> String {
    match delivery {
        Delivery::Stream { content_type, body } => {
            format!("stream {} bytes ({content_type})", body.len())
        }
        Delivery::InternalRedirect { header, location } => format!("{header}: {location}"),
        Delivery::PermanentRedirect { location } => format!("301 → {location}"),
    }
}

pub fn format_thumbnail(thumbnail: &Thumbnail, delivery: Option<&Delivery>) -> Vec<String> {
    let d = &thumbnail.descriptor;
    let mut lines = vec![
        format!(
            "{} → {} ({})",
            d.source,
            thumbnail.name,
            outcome_label(thumbnail.outcome)
        ),
        indent(format!("Size: {} {}", d.size_string(), d.method)),
        indent(format!("URL: {}", thumbnail.url)),
    ];
    if let Some(path) = &thumbnail.path {
        lines.push(indent(format!("Path: {}", path.display())));
    }
    if let Some(delivery) = delivery {
        lines.push(indent(format!("Delivery: {}", format_delivery(delivery))));
    }
    lines
}

pub fn print_thumbnail(thumbnail: &Thumbnail, delivery: Option<&Delivery>) {
    for line in format_thumbnail(thumbnail, delivery) {
        println!("{line}");
    }
}

pub fn format_error(error: &ThumbnailError) -> Vec<String> {
    vec![
        format!("{}: {error}", kind_label(error.kind())),
        indent(format!(
            "Retry: {}",
            if error.is_retryable() { "yes" } else { "no" }
        )),
        indent(format!("Cache: {}", cache_label(error.cache_hint()))),
    ]
}

pub fn print_error(error: &ThumbnailError) {
    for line in format_error(error) {
        eprintln!("{line}");
    }
}

/// Machine-readable summary for `--json`.
pub fn thumbnail_json(thumbnail: &Thumbnail) -> serde_json::Value {
    let d = &thumbnail.descriptor;
    serde_json::json!({
        "source": d.source,
        "size": d.size_string(),
        "method": d.method.as_str(),
        "extension": d.extension,
        "key": d.key,
        "name": thumbnail.name,
        "url": thumbnail.url,
        "path": thumbnail.path.as_ref().map(|p| p.display().to_string()),
        "outcome": outcome_label(thumbnail.outcome),
    })
}
