//! Shared test utilities for the gallery-prep test suite.
//!
//! Provides synthetic image fixtures, a throwaway site layout, and lookup
//! helpers for manifests.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = TestSite::new();
//! site.jpeg("portraits/Jane 1.jpg", 300, 200);
//! let config = site.config();
//!
//! let entry = find_entry(&manifest, "/optimized/portraits/jane-1.jpg");
//! assert_eq!(entry.category, "portraits");
//! ```

use crate::config::PipelineConfig;
use crate::manifest::{Manifest, ManifestEntry};
use image::{ImageBuffer, Rgb};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =========================================================================
// Synthetic images
// =========================================================================

/// A gradient so resampling and JPEG encoding have real content to work on.
fn gradient(width: u32, height: u32) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// Write a JPEG of the given size, creating parent directories.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Jpeg)
        .unwrap();
}

/// Write a PNG of the given size, creating parent directories.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Png)
        .unwrap();
}

/// Write a JPEG whose pixels are `width`×`height` as stored, tagged with an
/// EXIF Orientation value (1-8) that viewers apply on display.
pub fn create_oriented_jpeg(path: &Path, width: u32, height: u32, orientation: u16) {
    let mut plain = Vec::new();
    gradient(width, height)
        .write_to(&mut std::io::Cursor::new(&mut plain), image::ImageFormat::Jpeg)
        .unwrap();

    // APP1 "Exif": big-endian TIFF header, one IFD holding only tag 0x0112
    let mut app1 = vec![0xFF, 0xE1, 0x00, 0x22];
    app1.extend_from_slice(b"Exif\0\0");
    app1.extend_from_slice(b"MM\0\x2A\0\0\0\x08");
    app1.extend_from_slice(&[0x00, 0x01]);
    app1.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
    app1.extend_from_slice(&orientation.to_be_bytes());
    app1.extend_from_slice(&[0x00, 0x00]);
    app1.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

    let mut bytes = plain[..2].to_vec();
    bytes.extend_from_slice(&app1);
    bytes.extend_from_slice(&plain[2..]);

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Write bytes that carry an image extension but decode as nothing.
pub fn write_corrupt(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"not an image at all").unwrap();
}

// =========================================================================
// Site fixture
// =========================================================================

/// A temporary site root with the stock layout (`public/`-style root,
/// `optimized/` output, manifest at the root).
pub struct TestSite {
    pub tmp: TempDir,
}

impl TestSite {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn jpeg(&self, rel: &str, width: u32, height: u32) -> PathBuf {
        let path = self.path(rel);
        create_test_jpeg(&path, width, height);
        path
    }

    pub fn png(&self, rel: &str, width: u32, height: u32) -> PathBuf {
        let path = self.path(rel);
        create_test_png(&path, width, height);
        path
    }

    /// A placeholder file for mock-backend tests, where content is never decoded.
    pub fn dummy(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, rel.as_bytes()).unwrap();
        path
    }

    /// Stock configuration rooted at this site.
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            site_root: self.root().to_string_lossy().into_owned(),
            processing: crate::config::ProcessingConfig {
                max_processes: Some(2),
            },
            ..PipelineConfig::default()
        }
    }
}

// =========================================================================
// Manifest lookups (panic with a clear message on miss)
// =========================================================================

/// Find an entry by `src`. Panics if not found.
pub fn find_entry<'a>(manifest: &'a Manifest, src: &str) -> &'a ManifestEntry {
    manifest.get(src).unwrap_or_else(|| {
        let srcs = entry_srcs(manifest);
        panic!("entry '{src}' not found. Available: {srcs:?}")
    })
}

/// All `src` values in manifest order.
pub fn entry_srcs(manifest: &Manifest) -> Vec<&str> {
    manifest.entries().iter().map(|e| e.src.as_str()).collect()
}
