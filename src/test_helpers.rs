//! Shared test utilities for the lazy-thumbs test suite.
//!
//! Provides synthetic source images and a fully in-memory
//! [`ThumbnailService`] whose collaborators stay reachable for assertions.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let fx = fixture();
//! fx.source.save("a.jpg", &jpeg_bytes(80, 60)).unwrap();
//!
//! let thumb = fx.service.ensure_thumbnail(request).unwrap();
//! assert_eq!(fx.generator.calls(), 1);
//! assert!(fx.target.exists(&thumb.name));
//! ```

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use crate::config::Settings;
use crate::imaging::backend::tests::MockGenerator;
use crate::lock::MemoryLockStore;
use crate::service::ThumbnailService;
use crate::storage::MemoryStorage;

// =========================================================================
// Synthetic images
// =========================================================================

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format)
        .expect("synthetic image must encode");
    buf
}

/// RGB gradient JPEG. Plenty of colour so grayscale checks are meaningful.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

/// Fully transparent RGBA PNG.
pub fn png_rgba_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

/// Grayscale PNG, black on the left half and white on the right.
pub fn split_image_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::GrayImage::from_fn(width, height, |x, _| {
        if x < width / 2 { Luma([0]) } else { Luma([255]) }
    });
    encode(DynamicImage::ImageLuma8(img), ImageFormat::Png)
}

// =========================================================================
// Service fixture
// =========================================================================

/// A service over in-memory collaborators, with handles to each of them.
pub struct Fixture {
    pub service: ThumbnailService,
    pub source: Arc<MemoryStorage>,
    pub target: Arc<MemoryStorage>,
    pub locks: Arc<MemoryLockStore>,
    pub generator: Arc<MockGenerator>,
}

/// Default settings with a test key and a recording mock generator.
pub fn fixture() -> Fixture {
    fixture_with(MockGenerator::new())
}

pub fn fixture_with(generator: MockGenerator) -> Fixture {
    fixture_from(Settings::with_secret_key("test-secret-key"), generator)
}

pub fn fixture_from(settings: Settings, generator: MockGenerator) -> Fixture {
    let source = Arc::new(MemoryStorage::new(&settings.source.base_url));
    let target = Arc::new(MemoryStorage::new(&settings.target.base_url));
    let locks = Arc::new(MemoryLockStore::new());
    let generator = Arc::new(generator);
    let service = ThumbnailService::new(
        settings,
        source.clone(),
        target.clone(),
        locks.clone(),
        generator.clone(),
    )
    .expect("fixture settings must be valid");
    Fixture {
        service,
        source,
        target,
        locks,
        generator,
    }
}
