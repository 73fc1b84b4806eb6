//! # Lazy Thumbs
//!
//! Signed, lazily generated image thumbnails. A thumbnail is addressed by a
//! deterministic identifier built from its source path, size, resize method
//! and output extension, plus a secret that only the server can compute.
//! Nothing is generated until the identifier is first requested.
//!
//! # Request Flow
//!
//! ```text
//! template ──proxy_url──▶ /thumbnails/animals/kitten.jpg/200x200/crop/<secret>.jpg
//!                                              │
//! endpoint ──ensure_identifier──▶ capture ──▶ descriptor ──▶ single-flight generate
//!                                                                  │
//!                                            target storage ◀──────┘──▶ delivery
//! ```
//!
//! Concurrent requests for one identifier do the pixel work once: the first
//! claims a TTL lock, the rest get a retryable `Busy` immediately instead of
//! queueing behind it.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`parsing`] | `WxH` size grammar and the `crop` / `smart` / `scale` methods |
//! | [`identity`] | Secret derivation (HMAC-SHA256) and lock keys |
//! | [`descriptor`] | The validated thumbnail value object and its canonical target name |
//! | [`signature`] | Identifier template: render descriptors, capture inbound identifiers |
//! | [`imaging`] | Pure-Rust transform pipeline: orientation, colorspace, scale, crop, smart crop, encode |
//! | [`storage`] | Source and target storage backends |
//! | [`lock`] | TTL lock stores and the scoped lock guard |
//! | [`service`] | The single-flight orchestrator and its error model |
//! | [`proxy`] | URL renderers for not-yet-generated thumbnails |
//! | [`delivery`] | How a generated file is handed to the client |
//! | [`config`] | `lazythumbs.toml` loading, defaults, validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Secrets Instead of Allow-Lists
//!
//! Any combination of size and method could be requested, and each one costs
//! a decode, a resize and an encode. Rather than keeping a list of permitted
//! sizes, every URL carries a keyed hash of its own fields. Only URLs the
//! server rendered are ever generated, and changing the server key revokes
//! all of them at once.
//!
//! ## Busy, Not Blocking
//!
//! A worker that finds the lock held returns at once. Waiting would tie up a
//! worker per duplicate request for the length of an encode; bouncing the
//! request (uncacheable) lets clients retry and keeps the pool free. The lock
//! expires on its own, so a crashed worker delays a thumbnail by at most the
//! TTL.
//!
//! ## Explicit Configuration
//!
//! [`config::Settings`] is passed into
//! [`ThumbnailService`](service::ThumbnailService) rather than read from a
//! global. Backends are chosen by enum in the settings and resolved once when
//! the service is built.

pub mod config;
pub mod delivery;
pub mod descriptor;
pub mod identity;
pub mod imaging;
pub mod lock;
pub mod output;
pub mod parsing;
pub mod proxy;
pub mod service;
pub mod signature;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;
