//! Source discovery.
//!
//! Walks each configured input directory (relative to the site root) and
//! collects every image file beneath it, at any depth:
//!
//! ```text
//! public/                          # Site root
//! ├── hero/                        # Category "hero"
//! │   ├── Dawn Over Hills.JPG
//! │   └── 2024/
//! │       └── beach.tif            # Nested files belong to the same category
//! ├── portraits/
//! │   ├── jane-1.jpg
//! │   └── notes.txt                # Not an image → ignored
//! └── weddings/                    # Missing or empty → skipped silently
//! ```
//!
//! ## Rules
//!
//! - Extensions are matched case-insensitively against the allow-list from
//!   [`supported_input_extensions`].
//! - Files above the size limit are reported in [`ScanResult::skipped`] and
//!   never fail the scan.
//! - A missing or unreadable directory counts as "zero files". Individual
//!   unreadable entries are logged and skipped.
//! - The slug of each input directory's base name is the category.
//! - Files are listed in file-name order so repeated runs see the same order.
//!
//! Scanning is read-only.

use crate::imaging::supported_input_extensions;
use crate::naming;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A discovered source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    /// Filesystem path of the source.
    pub path: PathBuf,
    /// Path relative to its input directory, `/`-separated.
    pub relative_path: String,
    pub category: String,
    /// Site-root-relative served path, e.g. `/hero/2024/beach.tif`.
    pub original: String,
    /// Size in bytes.
    pub size: u64,
}

/// A source excluded because it exceeds the size limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// All images found beneath one input directory.
#[derive(Debug, Clone)]
pub struct CategoryScan {
    pub category: String,
    pub dir: PathBuf,
    pub images: Vec<SourceImage>,
}

/// Result of scanning every input directory.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Only categories with at least one image, in configuration order.
    pub categories: Vec<CategoryScan>,
    pub skipped: Vec<SkippedFile>,
}

impl ScanResult {
    pub fn image_count(&self) -> usize {
        self.categories.iter().map(|c| c.images.len()).sum()
    }
}

/// Whether a path has an allow-listed image extension.
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            supported_input_extensions()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Category name for an input directory: the slug of its base name.
pub fn category_name(dir: &str) -> String {
    let base = Path::new(dir.trim_end_matches('/'))
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    naming::slugify(&base)
}

/// Scan every input directory under `site_root`.
///
/// `input_dirs` are relative to `site_root`; their served prefix is the same
/// relative path, so `"hero"` yields originals like `/hero/a.jpg`.
pub fn scan(site_root: &Path, input_dirs: &[String], max_input_bytes: u64) -> ScanResult {
    let mut result = ScanResult::default();

    for input in input_dirs {
        let category = category_name(input);
        if category.is_empty() {
            warn!(dir = %input, "input directory name has no usable characters, skipping");
            continue;
        }
        let dir = site_root.join(input);
        let served_base = format!("/{}", input.trim_matches('/'));

        let (images, skipped) = scan_dir(&dir, &category, &served_base, max_input_bytes);
        result.skipped.extend(skipped);

        if images.is_empty() {
            debug!(dir = %dir.display(), "no images found");
            continue;
        }
        result.categories.push(CategoryScan {
            category,
            dir,
            images,
        });
    }

    result
}

/// Collect images beneath a single directory.
///
/// `served_base` is the served path of `dir` itself (no trailing slash);
/// each image's `original` is `served_base/relative_path`.
pub fn scan_dir(
    dir: &Path,
    category: &str,
    served_base: &str,
    max_input_bytes: u64,
) -> (Vec<SourceImage>, Vec<SkippedFile>) {
    let mut images = Vec::new();
    let mut skipped = Vec::new();

    if !dir.is_dir() {
        return (images, skipped);
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "unreadable entry, skipping");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_image(entry.path()) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "cannot stat file, skipping");
                continue;
            }
        };
        if size > max_input_bytes {
            warn!(
                path = %entry.path().display(),
                size_mb = size / 1_000_000,
                "source exceeds size limit, skipping"
            );
            skipped.push(SkippedFile {
                path: entry.path().to_path_buf(),
                size,
            });
            continue;
        }

        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let relative_path = to_posix(rel);
        images.push(SourceImage {
            path: entry.path().to_path_buf(),
            original: format!("{}/{}", served_base.trim_end_matches('/'), relative_path),
            relative_path,
            category: category.to_string(),
            size,
        });
    }

    (images, skipped)
}

/// Join path components with `/` regardless of platform.
fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
