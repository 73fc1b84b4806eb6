//! The thumbnail descriptor value object.
//!
//! A [`ThumbnailDescriptor`] is built fresh for every request or proxy URL.
//! Construction validates the four request fields and derives the secret and
//! lock key from them, so holding a descriptor means holding valid fields.
//! Descriptors are never persisted; only the generated file named by
//! [`ThumbnailDescriptor::name`] outlives the call.

use crate::config::Settings;
use crate::identity::{derive_key, derive_secret};
use crate::imaging::OutputFormat;
use crate::parsing::{Method, ParseError, Size, parse_extension, parse_method, parse_size};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailDescriptor {
    /// Storage-relative path of the original image.
    pub source: String,
    pub size: Size,
    pub method: Method,
    /// Output extension including the leading dot.
    pub extension: String,
    /// Hex secret authenticating this exact descriptor.
    pub secret: String,
    /// `<prefix>-<secret>`, the lock store key.
    pub key: String,
}

impl ThumbnailDescriptor {
    /// Validate the request fields and derive the secret and key.
    ///
    /// Fields are checked in order (source, size, method, extension) and the
    /// secret is only computed once all of them pass.
    pub fn new(
        source: &str,
        size: &str,
        method: &str,
        extension: &str,
        settings: &Settings,
    ) -> Result<Self, ParseError> {
        if source.is_empty() {
            return Err(ParseError::EmptySource);
        }
        let size = parse_size(size)?;
        let method = parse_method(method)?;
        let extension = parse_extension(extension)?;

        let secret = derive_secret(
            source,
            &size.to_string(),
            method.as_str(),
            &extension,
            &settings.secret_key,
        );
        let key = derive_key(&secret, &settings.key_prefix);

        Ok(Self {
            source: source.to_string(),
            size,
            method,
            extension,
            secret,
            key,
        })
    }

    /// Normalized `WxH` rendering used in secrets, names and identifiers.
    pub fn size_string(&self) -> String {
        self.size.to_string()
    }

    /// Canonical target path: `<dir>/<file>_<WxH>_<method><extension>`.
    ///
    /// The source directory is normalized (`.` and empty segments dropped,
    /// `..` folded into its parent). The source file name is kept whole, so
    /// `a.jpg` and `a.png` never share a target.
    ///
    /// ```
    /// # use lazy_thumbs::config::Settings;
    /// # use lazy_thumbs::descriptor::ThumbnailDescriptor;
    /// let settings = Settings::with_secret_key("k");
    /// let d = ThumbnailDescriptor::new("animals/./cat.png", "100x", "crop", ".jpg", &settings).unwrap();
    /// assert_eq!(d.name(), "animals/cat.png_100x0_crop.jpg");
    /// ```
    pub fn name(&self) -> String {
        let (dir, file) = match self.source.rsplit_once('/') {
            Some((dir, file)) => (normalize_dir(dir), file),
            None => (String::new(), self.source.as_str()),
        };
        let filename = format!(
            "{file}_{}_{}{}",
            self.size_string(),
            self.method,
            self.extension
        );
        if dir.is_empty() {
            filename
        } else {
            format!("{dir}/{filename}")
        }
    }

    /// Encoder for the requested extension, `None` when unsupported.
    pub fn format(&self) -> Option<OutputFormat> {
        OutputFormat::from_extension(&self.extension)
    }
}

fn normalize_dir(dir: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in dir.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}
