//! Thumbnail generator trait and shared types.
//!
//! The [`Generator`] trait is the one capability the orchestrator needs from
//! the pixel side: source bytes in, encoded thumbnail bytes out. The
//! production implementation is [`RustBackend`](super::rust_backend::RustBackend);
//! tests swap in a recording mock so orchestration logic can be exercised
//! without decoding a single pixel.

use super::params::OutputFormat;
use crate::parsing::{Method, Size};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode source image: {0}")]
    Decode(String),
    #[error("Failed to encode thumbnail: {0}")]
    Encode(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Produces encoded thumbnail bytes from encoded source bytes.
///
/// Implementations must be pure with respect to their inputs: the same source,
/// size, method and format always yield the same bytes. Concurrent writers of
/// one target rely on this.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        source: &[u8],
        size: Size,
        method: Method,
        format: OutputFormat,
    ) -> Result<Vec<u8>, BackendError>;
}
