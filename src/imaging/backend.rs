//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three operations every backend must
//! support: identify, transcode, and preview.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Tests use the
//! `MockBackend` below, which records operations without touching pixels.

use super::params::{PreviewParams, TranscodeParams};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
pub trait ImageBackend: Sync {
    /// Read the pixel dimensions stored in a file's header.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Decode, apply EXIF orientation, fit to the long edge and re-encode
    /// as the canonical output format, replacing `params.output`.
    fn transcode(&self, params: &TranscodeParams) -> Result<(), BackendError>;

    /// Encode a tiny rendition in memory and return its bytes.
    fn preview(&self, params: &PreviewParams) -> Result<Vec<u8>, BackendError>;
}
