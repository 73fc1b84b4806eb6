//! Handing a generated thumbnail to the client.
//!
//! The service does not speak HTTP. It returns a [`Delivery`] describing what
//! the response should carry, and the web layer copies it into whatever
//! response type it uses.
//!
//! | Kind | Response |
//! |---|---|
//! | `stream` | file bytes in the body, with a content type |
//! | `x-accel-redirect` | `X-Accel-Redirect: <url>` for nginx, no content type |
//! | `x-sendfile` | `X-Sendfile: <path or url>` for Apache / lighttpd, no content type |
//! | `redirect` | permanent redirect to the public URL |

use crate::config::DeliveryKind;
use crate::service::{CacheHint, Thumbnail};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Stream {
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// Let the front proxy serve the file. The proxy picks the content type.
    InternalRedirect {
        header: &'static str,
        location: String,
    },
    PermanentRedirect { location: String },
}

/// Describe how to hand `thumbnail` to the client.
///
/// Only `stream` touches storage.
pub fn deliver(
    kind: DeliveryKind,
    thumbnail: &Thumbnail,
    target: &dyn Storage,
) -> Result<Delivery, StorageError> {
    Ok(match kind {
        DeliveryKind::Stream => Delivery::Stream {
            content_type: thumbnail
                .descriptor
                .format()
                .map_or("application/octet-stream", |f| f.mime_type()),
            body: target.open(&thumbnail.name)?,
        },
        DeliveryKind::XAccelRedirect => Delivery::InternalRedirect {
            header: "X-Accel-Redirect",
            location: thumbnail.url.clone(),
        },
        DeliveryKind::XSendfile => Delivery::InternalRedirect {
            header: "X-Sendfile",
            location: thumbnail
                .path
                .as_ref()
                .map_or_else(|| thumbnail.url.clone(), |p| p.display().to_string()),
        },
        DeliveryKind::Redirect => Delivery::PermanentRedirect {
            location: thumbnail.url.clone(),
        },
    })
}

/// Response headers for a cache hint.
///
/// `NoStore` is what a busy response gets: neither browsers nor shared
/// caches may keep it, so the next request reaches the service again.
pub fn cache_headers(hint: CacheHint) -> Vec<(&'static str, String)> {
    match hint {
        CacheHint::NoStore => vec![
            (
                "Cache-Control",
                "max-age=0, no-cache, no-store, must-revalidate, private".to_string(),
            ),
            ("Expires", "0".to_string()),
        ],
        CacheHint::ShortLived(secs) => {
            vec![("Cache-Control", format!("public, max-age={secs}"))]
        }
        CacheHint::Default => Vec::new(),
    }
}
