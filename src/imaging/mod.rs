//! Image processing in pure Rust, no system libraries.
//!
//! | Step | Crate / function |
//! |---|---|
//! | **Decode** | `image::load_from_memory` |
//! | **Orientation** | `rexif` EXIF lookup + rotate/flip |
//! | **Scale / crop** | Lanczos3 resize + [`calculations`] boxes |
//! | **Smart crop** | histogram entropy per edge slice |
//! | **Encode** | format picked from the requested extension |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for geometry and entropy math (unit testable)
//! - **Parameters**: Data structures describing the transform
//! - **Backend**: [`Generator`] trait + [`RustBackend`]

pub mod backend;
pub mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Generator};
pub use params::{AxisOffset, CropOffset, OutputFormat, Quality, TransformOptions, parse_hex_color};
pub use rust_backend::RustBackend;
