//! URL renderers for thumbnails that may not exist yet.
//!
//! Templates and API responses need a URL for a thumbnail before anyone has
//! asked for it. A [`UrlRenderer`] produces that URL from a descriptor; the
//! thumbnail endpoint generates the file on first request.

use crate::config::{ProxyKind, Settings};
use crate::descriptor::ThumbnailDescriptor;
use crate::signature::{SignatureFields, SignatureTemplate};

/// Public URL for a descriptor.
pub trait UrlRenderer: Send + Sync {
    fn render(&self, descriptor: &ThumbnailDescriptor) -> String;
}

/// Build the renderer the `[proxy]` section asks for.
pub fn from_config(settings: &Settings, template: SignatureTemplate) -> Box<dyn UrlRenderer> {
    match settings.proxy.kind {
        ProxyKind::Signed => Box::new(SignedUrlRenderer::new(template, &settings.base_url)),
        ProxyKind::Dummy => Box::new(DummyImageRenderer),
    }
}

/// `base_url` joined with the rendered identifier.
///
/// Each segment of the source path is percent-encoded; the other fields are
/// already URL safe after validation.
pub struct SignedUrlRenderer {
    template: SignatureTemplate,
    base_url: String,
}

impl SignedUrlRenderer {
    pub fn new(template: SignatureTemplate, base_url: &str) -> Self {
        Self {
            template,
            base_url: base_url.to_string(),
        }
    }
}

impl UrlRenderer for SignedUrlRenderer {
    fn render(&self, descriptor: &ThumbnailDescriptor) -> String {
        let source: Vec<_> = descriptor
            .source
            .split('/')
            .map(urlencoding::encode)
            .collect();
        let fields = SignatureFields {
            source: source.join("/"),
            ..SignatureFields::from(descriptor)
        };
        let identifier = self.template.render_fields(&fields);
        format!("{}/{}", self.base_url.trim_end_matches('/'), identifier)
    }
}

/// Placeholder images from dummyimage.com, for working without source files.
///
/// Only the width falls back: a `0` width takes the height, while the height
/// is passed through as requested, so `120x` renders as `120x0`.
pub struct DummyImageRenderer;

impl UrlRenderer for DummyImageRenderer {
    fn render(&self, descriptor: &ThumbnailDescriptor) -> String {
        let (w, height) = (descriptor.size.width, descriptor.size.height);
        let width = if w == 0 { height } else { w };
        format!("http://dummyimage.com/{width}x{height}")
    }
}
