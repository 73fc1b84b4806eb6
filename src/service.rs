//! The single-flight generation orchestrator.
//!
//! [`ThumbnailService::ensure_thumbnail`] makes sure the file for one
//! descriptor exists in target storage, doing the pixel work at most once no
//! matter how many workers ask at the same time:
//!
//! ```text
//! validate ─▶ authenticate ─▶ source exists? ─▶ claim lock ─▶ target exists? ─▶ generate + save
//!    │             │                │                │               │
//!    ▼             ▼                ▼                ▼               ▼
//! InvalidParameter Authentication SourceNotFound    Busy        AlreadyExists
//! ```
//!
//! Rejections that need no shared state come first, so bad requests never
//! contend for a lock. The target check runs only while the lock is held:
//! two workers that both saw "missing" before locking would otherwise both
//! generate. The lock is a [`LockGuard`](crate::lock::LockGuard), released
//! on every exit path; if a worker dies, the TTL frees the key instead.
//!
//! A caller that finds the lock held gets [`ThumbnailError::Busy`] right
//! away. Nothing waits on anything else.

use crate::config::{ConfigError, Settings};
use crate::delivery::{self, Delivery};
use crate::descriptor::ThumbnailDescriptor;
use crate::identity::verify_secret;
use crate::imaging::{BackendError, Generator, RustBackend};
use crate::lock::{self, LockError, LockStore};
use crate::parsing::ParseError;
use crate::proxy::{self, UrlRenderer};
use crate::signature::SignatureTemplate;
use crate::storage::{self, Storage, StorageError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Seconds a "source not found" response may be cached for.
pub const NOT_FOUND_CACHE_SECS: u64 = 300;

/// Failures inside the locked section. The lock is released before these surface.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("no encoder for extension '{0}'")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("lock store: {0}")]
    Lock(#[from] LockError),
}

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ParseError),
    #[error("'{0}' does not match the thumbnail URL pattern")]
    InvalidIdentifier(String),
    #[error("secret does not match the requested thumbnail")]
    Authentication,
    #[error("source '{0}' does not exist")]
    SourceNotFound(String),
    #[error("thumbnail is being generated by another worker")]
    Busy,
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

/// Coarse category of a [`ThumbnailError`], for mapping onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ClientInput,
    Unauthorized,
    NotFound,
    Busy,
    Server,
}

/// How long a response for an outcome may be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHint {
    /// Must not be cached anywhere.
    NoStore,
    /// Cacheable for this many seconds.
    ShortLived(u64),
    /// No opinion.
    Default,
}

impl ThumbnailError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(_) | Self::InvalidIdentifier(_) => ErrorKind::ClientInput,
            Self::Authentication => ErrorKind::Unauthorized,
            Self::SourceNotFound(_) => ErrorKind::NotFound,
            Self::Busy => ErrorKind::Busy,
            Self::Generation(_) => ErrorKind::Server,
        }
    }

    /// Only `Busy` goes away by asking again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// Busy responses are never cached so they act as back-pressure; missing
    /// sources are cached briefly so bogus URLs stop probing storage.
    pub fn cache_hint(&self) -> CacheHint {
        match self {
            Self::Busy => CacheHint::NoStore,
            Self::SourceNotFound(_) => CacheHint::ShortLived(NOT_FOUND_CACHE_SECS),
            _ => CacheHint::Default,
        }
    }
}

/// Raw request fields. `secret` is `None` for trusted callers that skip
/// authentication (the CLI, or templates without a `{secret}`).
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailRequest<'a> {
    pub source: &'a str,
    pub size: &'a str,
    pub method: &'a str,
    pub extension: &'a str,
    pub secret: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// This call did the pixel work.
    Generated,
    /// The file was already in target storage.
    AlreadyExists,
}

/// A thumbnail present in target storage.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub descriptor: ThumbnailDescriptor,
    /// Storage-relative name in target storage.
    pub name: String,
    pub url: String,
    /// Native location, when the target storage has one.
    pub path: Option<PathBuf>,
    pub outcome: Outcome,
}

/// Orchestrates validation, locking, generation and storage of thumbnails.
///
/// Everything is injected: two services with different settings or backends
/// can run side by side in one process.
pub struct ThumbnailService {
    settings: Settings,
    template: SignatureTemplate,
    source: Arc<dyn Storage>,
    target: Arc<dyn Storage>,
    locks: Arc<dyn LockStore>,
    generator: Arc<dyn Generator>,
    renderer: Box<dyn UrlRenderer>,
}

impl ThumbnailService {
    /// Assemble a service from explicit collaborators.
    pub fn new(
        settings: Settings,
        source: Arc<dyn Storage>,
        target: Arc<dyn Storage>,
        locks: Arc<dyn LockStore>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let template = SignatureTemplate::parse(&settings.signature)
            .map_err(|e| ConfigError::Validation(format!("signature: {e}")))?;
        let renderer = proxy::from_config(&settings, template.clone());
        Ok(Self {
            settings,
            template,
            source,
            target,
            locks,
            generator,
            renderer,
        })
    }

    /// Resolve every collaborator from the settings' backend selections.
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let options = settings.processing.to_options()?;
        let source = storage::from_config(&settings.source);
        let target = storage::from_config(&settings.target);
        let locks = lock::from_config(&settings.locks);
        Self::new(
            settings,
            source,
            target,
            locks,
            Arc::new(RustBackend::new(options)),
        )
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn template(&self) -> &SignatureTemplate {
        &self.template
    }

    pub fn target(&self) -> &dyn Storage {
        self.target.as_ref()
    }

    /// Validated descriptor for raw fields.
    pub fn descriptor(
        &self,
        source: &str,
        size: &str,
        method: &str,
        extension: &str,
    ) -> Result<ThumbnailDescriptor, ThumbnailError> {
        Ok(ThumbnailDescriptor::new(
            source,
            size,
            method,
            extension,
            &self.settings,
        )?)
    }

    /// Public URL that will produce this thumbnail when requested.
    ///
    /// An empty source yields `Ok(None)` so templates can pass optional
    /// images through without a branch.
    pub fn proxy_url(
        &self,
        source: &str,
        size: &str,
        method: &str,
        extension: &str,
    ) -> Result<Option<String>, ThumbnailError> {
        if source.is_empty() {
            return Ok(None);
        }
        let descriptor = self.descriptor(source, size, method, extension)?;
        Ok(Some(self.renderer.render(&descriptor)))
    }

    /// Parse an inbound identifier and ensure its thumbnail.
    ///
    /// The identifier is the part of the request path after the service's
    /// base URL, already percent-decoded.
    pub fn ensure_identifier(&self, identifier: &str) -> Result<Thumbnail, ThumbnailError> {
        let fields = self
            .template
            .capture(identifier)
            .ok_or_else(|| ThumbnailError::InvalidIdentifier(identifier.to_string()))?;
        self.ensure_thumbnail(ThumbnailRequest {
            source: &fields.source,
            size: &fields.size,
            method: &fields.method,
            extension: &fields.extension,
            secret: fields.secret.as_deref(),
        })
    }

    /// Make sure the thumbnail for `request` exists in target storage.
    pub fn ensure_thumbnail(&self, request: ThumbnailRequest<'_>) -> Result<Thumbnail, ThumbnailError> {
        let descriptor = self.descriptor(
            request.source,
            request.size,
            request.method,
            request.extension,
        )?;

        if let Some(secret) = request.secret {
            let valid = verify_secret(
                secret,
                &descriptor.source,
                &descriptor.size_string(),
                descriptor.method.as_str(),
                &descriptor.extension,
                &self.settings.secret_key,
            );
            if !valid {
                debug!(source = %descriptor.source, "secret mismatch");
                return Err(ThumbnailError::Authentication);
            }
        }

        if !self.source.exists(&descriptor.source) {
            debug!(source = %descriptor.source, "source missing");
            return Err(ThumbnailError::SourceNotFound(descriptor.source));
        }

        let guard = lock::acquire(
            self.locks.as_ref(),
            &descriptor.key,
            self.settings.lock_timeout(),
        )
        .map_err(GenerationError::from)?;
        let Some(_guard) = guard else {
            debug!(key = %descriptor.key, "busy");
            return Err(ThumbnailError::Busy);
        };

        let name = descriptor.name();
        let outcome = if self.target.exists(&name) {
            debug!(key = %descriptor.key, name = %name, "target already exists");
            Outcome::AlreadyExists
        } else {
            let started = Instant::now();
            if let Err(e) = self.generate(&descriptor, &name) {
                warn!(key = %descriptor.key, source = %descriptor.source, error = %e, "generation failed");
                return Err(e.into());
            }
            info!(
                key = %descriptor.key,
                source = %descriptor.source,
                name = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "generated thumbnail"
            );
            Outcome::Generated
        };

        Ok(Thumbnail {
            url: self.target.url(&name),
            path: self.target.path(&name),
            name,
            descriptor,
            outcome,
        })
    }

    /// Pixel work for one descriptor. Runs with the lock held.
    fn generate(&self, descriptor: &ThumbnailDescriptor, name: &str) -> Result<(), GenerationError> {
        let format = descriptor
            .format()
            .ok_or_else(|| GenerationError::UnsupportedFormat(descriptor.extension.clone()))?;
        let bytes = self.source.open(&descriptor.source)?;
        let output = self
            .generator
            .generate(&bytes, descriptor.size, descriptor.method, format)?;
        self.target.save(name, &output)?;
        Ok(())
    }

    /// Describe the response for a thumbnail using the configured delivery kind.
    pub fn deliver(&self, thumbnail: &Thumbnail) -> Result<Delivery, ThumbnailError> {
        delivery::deliver(self.settings.delivery.kind, thumbnail, self.target.as_ref())
            .map_err(|e| ThumbnailError::Generation(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockGenerator;
    use crate::test_helpers::{Fixture, fixture, fixture_with};
    use std::thread;
    use std::time::Duration;

    fn request<'a>(source: &'a str, secret: Option<&'a str>) -> ThumbnailRequest<'a> {
        ThumbnailRequest {
            source,
            size: "100x100",
            method: "crop",
            extension: ".jpg",
            secret,
        }
    }

    fn secret_for(fx: &Fixture, source: &str) -> String {
        fx.service
            .descriptor(source, "100x100", "crop", ".jpg")
            .unwrap()
            .secret
    }

    // =========================================================================
    // Happy path and idempotence
    // =========================================================================

    #[test]
    fn generates_and_saves_under_canonical_name() {
        let fx = fixture();
        fx.source.save("animals/kitten.jpg", b"source").unwrap();

        let thumb = fx.service.ensure_thumbnail(request("animals/kitten.jpg", None)).unwrap();
        assert_eq!(thumb.outcome, Outcome::Generated);
        assert_eq!(thumb.name, "animals/kitten.jpg_100x100_crop.jpg");
        assert_eq!(thumb.url, "/media/thumbnails/animals/kitten.jpg_100x100_crop.jpg");
        assert_eq!(thumb.path, None);
        assert_eq!(
            fx.target.open("animals/kitten.jpg_100x100_crop.jpg").unwrap(),
            b"100x100-crop"
        );
        assert_eq!(fx.generator.calls(), 1);
        assert_eq!(fx.generator.get_operations()[0].source_len, 6);
    }

    #[test]
    fn second_call_is_a_no_op() {
        let fx = fixture();
        fx.source.save("a.jpg", b"x").unwrap();

        let first = fx.service.ensure_thumbnail(request("a.jpg", None)).unwrap();
        let second = fx.service.ensure_thumbnail(request("a.jpg", None)).unwrap();
        assert_eq!(first.outcome, Outcome::Generated);
        assert_eq!(second.outcome, Outcome::AlreadyExists);
        assert_eq!(fx.generator.calls(), 1);
        assert!(!fx.locks.get(&first.descriptor.key).unwrap());
    }

    #[test]
    fn sources_sharing_a_stem_are_generated_separately() {
        let fx = fixture();
        fx.source.save("photos/a.jpg", b"jpeg").unwrap();
        fx.source.save("photos/a.png", b"png!!").unwrap();

        let first = fx.service.ensure_thumbnail(request("photos/a.jpg", None)).unwrap();
        let second = fx.service.ensure_thumbnail(request("photos/a.png", None)).unwrap();
        assert_ne!(first.name, second.name);
        assert_eq!(second.outcome, Outcome::Generated);
        assert_eq!(fx.generator.calls(), 2);
        assert_eq!(fx.target.len(), 2);
    }

    #[test]
    fn valid_secret_is_accepted() {
        let fx = fixture();
        fx.source.save("a.jpg", b"x").unwrap();
        let secret = secret_for(&fx, "a.jpg");
        let thumb = fx.service.ensure_thumbnail(request("a.jpg", Some(secret.as_str()))).unwrap();
        assert_eq!(thumb.outcome, Outcome::Generated);
    }

    // =========================================================================
    // Rejections before the lock
    // =========================================================================

    #[test]
    fn invalid_parameters_touch_nothing() {
        let fx = fixture();
        fx.source.save("a.jpg", b"x").unwrap();
        let bad = ThumbnailRequest {
            size: "200 x 200",
            ..request("a.jpg", None)
        };
        let err = fx.service.ensure_thumbnail(bad).unwrap_err();
        assert!(matches!(err, ThumbnailError::InvalidParameter(ParseError::InvalidSize(_))));
        assert_eq!(err.kind(), ErrorKind::ClientInput);

        let bad = ThumbnailRequest {
            method: "derp",
            ..request("a.jpg", None)
        };
        assert!(matches!(
            fx.service.ensure_thumbnail(bad),
            Err(ThumbnailError::InvalidParameter(ParseError::InvalidMethod(_)))
        ));
        assert_eq!(fx.generator.calls(), 0);
        assert!(fx.target.is_empty());
    }

    #[test]
    fn wrong_secret_is_rejected_without_locking() {
        let fx = fixture();
        fx.source.save("a.jpg", b"x").unwrap();
        let other = secret_for(&fx, "b.jpg");

        let err = fx
            .service
            .ensure_thumbnail(request("a.jpg", Some(other.as_str())))
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Authentication));
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let err = fx
            .service
            .ensure_thumbnail(request("a.jpg", Some("not-even-hex")))
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Authentication));

        let key = fx.service.descriptor("a.jpg", "100x100", "crop", ".jpg").unwrap().key;
        // The lock was never claimed, so it can be claimed now.
        assert!(fx.locks.set_with_ttl(&key, "test", Duration::from_secs(1)).unwrap());
        assert_eq!(fx.generator.calls(), 0);
    }

    #[test]
    fn missing_source_is_not_found() {
        let fx = fixture();
        let err = fx.service.ensure_thumbnail(request("ghost.jpg", None)).unwrap_err();
        assert!(matches!(&err, ThumbnailError::SourceNotFound(s) if s == "ghost.jpg"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.cache_hint(), CacheHint::ShortLived(NOT_FOUND_CACHE_SECS));
        assert!(!err.is_retryable());
        assert_eq!(fx.generator.calls(), 0);
    }

    // =========================================================================
    // Locking
    // =========================================================================

    #[test]
    fn held_lock_means_busy() {
        let fx = fixture();
        fx.source.save("a.jpg", b"x").unwrap();
        let key = fx.service.descriptor("a.jpg", "100x100", "crop", ".jpg").unwrap().key;
        fx.locks.set_with_ttl(&key, "other-worker", Duration::from_secs(30)).unwrap();

        let err = fx.service.ensure_thumbnail(request("a.jpg", None)).unwrap_err();
        assert!(matches!(err, ThumbnailError::Busy));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert_eq!(err.cache_hint(), CacheHint::NoStore);
        assert_eq!(fx.generator.calls(), 0);
    }

    #[test]
    fn expired_lock_lets_generation_proceed() {
        let fx = fixture();
        fx.source.save("a.jpg", b"x").unwrap();
        let key = fx.service.descriptor("a.jpg", "100x100", "crop", ".jpg").unwrap().key;
        // A worker that claimed the key and then died.
        fx.locks.set_with_ttl(&key, "dead-worker", Duration::from_millis(50)).unwrap();
        assert!(matches!(
            fx.service.ensure_thumbnail(request("a.jpg", None)),
            Err(ThumbnailError::Busy)
        ));

        thread::sleep(Duration::from_millis(150));
        let thumb = fx.service.ensure_thumbnail(request("a.jpg", None)).unwrap();
        assert_eq!(thumb.outcome, Outcome::Generated);
    }

    #[test]
    fn generation_error_releases_lock() {
        let fx = fixture_with(MockGenerator::failing("decoder exploded"));
        fx.source.save("a.jpg", b"x").unwrap();

        let err = fx.service.ensure_thumbnail(request("a.jpg", None)).unwrap_err();
        assert!(matches!(
            err,
            ThumbnailError::Generation(GenerationError::Backend(BackendError::ProcessingFailed(_)))
        ));
        assert_eq!(err.kind(), ErrorKind::Server);

        let key = fx.service.descriptor("a.jpg", "100x100", "crop", ".jpg").unwrap().key;
        assert!(!fx.locks.get(&key).unwrap());
        // Not busy on retry: the failure is reported again
        assert!(matches!(
            fx.service.ensure_thumbnail(request("a.jpg", None)),
            Err(ThumbnailError::Generation(_))
        ));
        assert_eq!(fx.generator.calls(), 2);
        assert!(fx.target.is_empty());
    }

    #[test]
    fn unsupported_extension_is_a_generation_error() {
        let fx = fixture();
        fx.source.save("a.jpg", b"x").unwrap();
        let req = ThumbnailRequest {
            extension: ".bmp",
            ..request("a.jpg", None)
        };
        assert!(matches!(
            fx.service.ensure_thumbnail(req),
            Err(ThumbnailError::Generation(GenerationError::UnsupportedFormat(ext))) if ext == ".bmp"
        ));
        assert_eq!(fx.generator.calls(), 0);
    }

    #[test]
    fn concurrent_requests_generate_once() {
        let (generator, entered, release) = MockGenerator::gated();
        let fx = fixture_with(generator);
        fx.source.save("a.jpg", b"x").unwrap();

        thread::scope(|s| {
            let first = s.spawn(|| fx.service.ensure_thumbnail(request("a.jpg", None)));
            entered.recv().unwrap();

            // The first request is inside the generator holding the lock.
            let second = fx.service.ensure_thumbnail(request("a.jpg", None));
            assert!(matches!(second, Err(ThumbnailError::Busy)));

            release.send(()).unwrap();
            let first = first.join().unwrap().unwrap();
            assert_eq!(first.outcome, Outcome::Generated);
        });

        assert_eq!(fx.generator.calls(), 1);
        let third = fx.service.ensure_thumbnail(request("a.jpg", None)).unwrap();
        assert_eq!(third.outcome, Outcome::AlreadyExists);
    }

    // =========================================================================
    // Identifiers, proxy URLs, delivery
    // =========================================================================

    #[test]
    fn ensure_identifier_round_trips_a_proxy_url() {
        let fx = fixture();
        fx.source.save("pets/dog.png", b"x").unwrap();

        let url = fx
            .service
            .proxy_url("pets/dog.png", "100x100", "crop", ".jpg")
            .unwrap()
            .unwrap();
        let identifier = url.strip_prefix("/thumbnails/").unwrap();
        let thumb = fx.service.ensure_identifier(identifier).unwrap();
        assert_eq!(thumb.name, "pets/dog.png_100x100_crop.jpg");
        assert_eq!(thumb.outcome, Outcome::Generated);
    }

    #[test]
    fn ensure_identifier_rejects_tampering() {
        let fx = fixture();
        fx.source.save("a.jpg", b"x").unwrap();
        let url = fx.service.proxy_url("a.jpg", "100x100", "crop", ".jpg").unwrap().unwrap();
        let tampered = url
            .strip_prefix("/thumbnails/")
            .unwrap()
            .replace("100x100", "900x900");
        assert!(matches!(
            fx.service.ensure_identifier(&tampered),
            Err(ThumbnailError::Authentication)
        ));
        assert!(matches!(
            fx.service.ensure_identifier("no-pattern-here"),
            Err(ThumbnailError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn ensure_identifier_without_secret_template() {
        let mut settings = Settings::with_secret_key("k");
        settings.signature = "{source}__{size}__{method}{extension}".into();
        let fx = crate::test_helpers::fixture_from(settings, MockGenerator::new());
        fx.source.save("a.jpg", b"x").unwrap();

        let thumb = fx.service.ensure_identifier("a.jpg__50x__scale.png").unwrap();
        assert_eq!(thumb.name, "a.jpg_50x0_scale.png");
    }

    #[test]
    fn proxy_url_for_empty_source_is_none() {
        let fx = fixture();
        assert_eq!(fx.service.proxy_url("", "10x10", "crop", ".jpg").unwrap(), None);
        assert!(matches!(
            fx.service.proxy_url("a.jpg", "10", "crop", ".jpg"),
            Err(ThumbnailError::InvalidParameter(_))
        ));
    }

    #[test]
    fn deliver_uses_configured_kind() {
        let fx = fixture();
        fx.source.save("a.jpg", b"x").unwrap();
        let thumb = fx.service.ensure_thumbnail(request("a.jpg", None)).unwrap();
        assert_eq!(
            fx.service.deliver(&thumb).unwrap(),
            Delivery::InternalRedirect {
                header: "X-Accel-Redirect",
                location: "/media/thumbnails/a.jpg_100x100_crop.jpg".into()
            }
        );
    }

    #[test]
    fn new_rejects_invalid_settings() {
        let fx = fixture();
        let result = ThumbnailService::new(
            Settings::default(),
            fx.source.clone(),
            fx.target.clone(),
            fx.locks.clone(),
            fx.generator.clone(),
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
