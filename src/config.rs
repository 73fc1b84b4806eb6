//! Service configuration.
//!
//! Handles loading, validating, and merging the `lazythumbs.toml` settings
//! file. Stock defaults are the base layer; the user file only needs the keys
//! it wants to override.
//!
//! The resulting [`Settings`] value is passed explicitly into
//! [`ThumbnailService`](crate::service::ThumbnailService) and the backend
//! registries. Nothing here is global, so two services with different keys can
//! live in the same process (and the same test binary).
//!
//! ## Configuration Options
//!
//! ```toml
//! secret_key = "..."                  # Required, signs every thumbnail URL
//! key_prefix = "lazythumbs"           # Namespace for lock keys
//! lock_timeout_secs = 30              # TTL of the generation lock
//! signature = "{source}/{size}/{method}/{secret}{extension}"
//! base_url = "/thumbnails/"           # Prefix for proxy URLs
//!
//! [source]
//! backend = "filesystem"              # filesystem | memory
//! root = "media"
//! base_url = "/media/"
//!
//! [target]
//! backend = "filesystem"
//! root = "media/thumbnails"
//! base_url = "/media/thumbnails/"
//!
//! [locks]
//! backend = "memory"                  # memory | file
//! dir = ".lazythumbs-locks"
//!
//! [proxy]
//! kind = "signed"                     # signed | dummy
//!
//! [delivery]
//! kind = "x-accel-redirect"           # stream | x-accel-redirect | x-sendfile | redirect
//!
//! [processing]
//! quality = 85
//! upscale = true
//! orientation = true
//! grayscale = false
//! # background = "#ffffff"
//! sharpen = false
//! detail = false
//! # crop_offset = "0,-0"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{CropOffset, TransformOptions, parse_hex_color};
use crate::signature::SignatureTemplate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service settings loaded from `lazythumbs.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Server-held key used to derive every thumbnail secret.
    pub secret_key: String,
    /// Prefix for lock keys in the shared lock store.
    pub key_prefix: String,
    /// Lifetime of a generation lock. A crashed worker holds it no longer than this.
    pub lock_timeout_secs: u64,
    /// Identifier template with `{source}`, `{size}`, `{method}`, `{secret}`, `{extension}`.
    pub signature: String,
    /// Base URL that rendered identifiers are joined onto for proxy URLs.
    pub base_url: String,
    /// Where original images are read from.
    pub source: StorageConfig,
    /// Where generated thumbnails are written to.
    pub target: StorageConfig,
    pub locks: LockConfig,
    pub proxy: ProxyConfig,
    pub delivery: DeliveryConfig,
    pub processing: ProcessingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            key_prefix: "lazythumbs".to_string(),
            lock_timeout_secs: 30,
            signature: crate::signature::DEFAULT_TEMPLATE.to_string(),
            base_url: "/thumbnails/".to_string(),
            source: StorageConfig {
                backend: StorageBackend::Filesystem,
                root: "media".to_string(),
                base_url: "/media/".to_string(),
            },
            target: StorageConfig {
                backend: StorageBackend::Filesystem,
                root: "media/thumbnails".to_string(),
                base_url: "/media/thumbnails/".to_string(),
            },
            locks: LockConfig::default(),
            proxy: ProxyConfig::default(),
            delivery: DeliveryConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl Settings {
    /// Defaults with the given secret key, mostly for tests and embedding.
    pub fn with_secret_key(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            ..Self::default()
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.is_empty() {
            return Err(ConfigError::Validation("secret_key must be set".into()));
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "key_prefix must not be empty".into(),
            ));
        }
        if self.lock_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "lock_timeout_secs must be greater than 0".into(),
            ));
        }
        SignatureTemplate::parse(&self.signature)
            .map_err(|e| ConfigError::Validation(format!("signature: {e}")))?;
        self.processing.to_options()?;
        Ok(())
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Filesystem,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the filesystem backend; ignored by the memory backend.
    pub root: String,
    /// Public URL prefix for stored files.
    pub base_url: String,
}

/// Lock store selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Process-local; correct for a single multi-threaded server.
    Memory,
    /// Lock files in a shared directory; correct across processes on one host.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    pub backend: LockBackend,
    /// Directory holding lock files for the `file` backend.
    pub dir: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::Memory,
            dir: ".lazythumbs-locks".to_string(),
        }
    }
}

/// Which URL renderer template helpers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// Signed URL pointing back at the thumbnail endpoint.
    #[default]
    Signed,
    /// Placeholder image service, for development without source files.
    Dummy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
}

/// How a generated file is handed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryKind {
    /// Read the bytes back and return them in the response body.
    Stream,
    /// nginx internal redirect.
    #[default]
    XAccelRedirect,
    /// Apache / lighttpd sendfile header.
    XSendfile,
    /// Permanent redirect to the public URL.
    Redirect,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeliveryConfig {
    pub kind: DeliveryKind,
}

/// Pixel pipeline settings shared by every thumbnail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Lossy encoding quality (1-100).
    pub quality: u32,
    /// Allow enlarging sources smaller than the requested size.
    pub upscale: bool,
    /// Honour EXIF orientation before any other step.
    pub orientation: bool,
    /// Produce grayscale thumbnails.
    pub grayscale: bool,
    /// `#rrggbb` colour replacing transparency. Transparency is kept when absent.
    pub background: Option<String>,
    pub sharpen: bool,
    pub detail: bool,
    /// `"x,y"` percentage offsets for `crop`; a leading `-` measures from the far edge.
    pub crop_offset: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            quality: 85,
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

impl ProcessingConfig {
    /// Convert to pipeline options, validating the string-typed fields.
    pub fn to_options(&self) -> Result<TransformOptions, ConfigError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigError::Validation(
                "processing.quality must be 1-100".into(),
            ));
        }
        let background = self
            .background
            .as_deref()
            .map(|c| {
                parse_hex_color(c).ok_or_else(|| {
                    ConfigError::Validation(format!("processing.background: invalid colour '{c}'"))
                })
            })
            .transpose()?;
        let crop_offset = self
            .crop_offset
            .as_deref()
            .map(|s| {
                CropOffset::parse(s).ok_or_else(|| {
                    ConfigError::Validation(format!("processing.crop_offset: invalid offset '{s}'"))
                })
            })
            .transpose()?;

        Ok(TransformOptions {
            quality: crate::imaging::Quality::new(self.quality),
            upscale: self.upscale,
            orientation: self.orientation,
            grayscale: self.grayscale,
            background,
            sharpen: self.sharpen,
            detail: self.detail,
            crop_offset,
        })
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Settings::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_settings(overlay: Option<toml::Value>) -> Result<Settings, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let settings: Settings = merged.try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from a TOML file.
///
/// A missing file is not an error by itself: the defaults are used, which
/// then fail validation because no `secret_key` is set.
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    let overlay = if path.exists() {
        let content = fs::read_to_string(path)?;
        Some(toml::from_str::<toml::Value>(&content)?)
    } else {
        None
    };
    resolve_settings(overlay)
}

/// Returns a fully-commented stock `lazythumbs.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# lazy-thumbs configuration
# ========================
# All settings except `secret_key` are optional. Values shown are the defaults.
# Unknown keys will cause an error.

# Server-held key every thumbnail secret is derived from. Required.
# Changing it invalidates every previously issued thumbnail URL.
# secret_key = "replace me with a long random string"

# Namespace for generation locks in the lock store.
key_prefix = "lazythumbs"

# Seconds a generation lock lives. A worker that crashes mid-generation
# blocks that thumbnail for at most this long.
lock_timeout_secs = 30

# Identifier template. Placeholders: {source} {size} {method} {secret} {extension}.
# {secret} may be dropped for unauthenticated schemes, e.g.
#   signature = "{source}__{size}__{method}{extension}"
signature = "{source}/{size}/{method}/{secret}{extension}"

# Proxy URLs are this prefix joined with the rendered identifier.
base_url = "/thumbnails/"

# ---------------------------------------------------------------------------
# Storage
# ---------------------------------------------------------------------------
[source]
# filesystem | memory
backend = "filesystem"
root = "media"
base_url = "/media/"

[target]
backend = "filesystem"
root = "media/thumbnails"
base_url = "/media/thumbnails/"

# ---------------------------------------------------------------------------
# Generation locks
# ---------------------------------------------------------------------------
[locks]
# memory: one process, many threads. file: many processes sharing `dir`.
backend = "memory"
dir = ".lazythumbs-locks"

# ---------------------------------------------------------------------------
# URL rendering and delivery
# ---------------------------------------------------------------------------
[proxy]
# signed | dummy
kind = "signed"

[delivery]
# stream | x-accel-redirect | x-sendfile | redirect
kind = "x-accel-redirect"

# ---------------------------------------------------------------------------
# Image processing
# ---------------------------------------------------------------------------
[processing]
# Lossy encoding quality (1 = worst, 100 = best).
quality = 85

# Enlarge sources that are smaller than the requested size.
upscale = true

# Apply EXIF orientation before resizing.
orientation = true

# Produce grayscale thumbnails.
grayscale = false

# Replace transparency with a solid colour. Omit to keep the alpha channel
# (JPEG output always composites against white).
# background = "#ffffff"

# Post-resize filters.
sharpen = false
detail = false

# Edge offsets for `crop`, as "x,y" percentages. A leading `-` measures from
# the right/bottom edge, an empty axis stays centered.
# crop_offset = "0,-0"
"##
}
