//! Image processing: transcoding and inline placeholders.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Transcode** | decode + EXIF orientation, Lanczos3 fit, progressive 4:4:4 JPEG |
//! | **Placeholder** | tiny baseline JPEG, base64 `data:` URI |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{Orientation, fit_long_edge};
pub use operations::{
    PlaceholderConfig, TranscodeConfig, create_placeholder, get_dimensions, transcode_image,
};
pub use params::{PreviewParams, Quality, TranscodeParams};
pub use rust_backend::{RustBackend, supported_input_extensions};
