//! Canonical slugs for output filenames and category names.
//!
//! Every transcoded image is stored as `<slug>.jpg`, and the slug is also the
//! stable part of its manifest key (`src`). The rule is deliberately simple so
//! the same source name always produces the same slug:
//!
//! - `"My Photo #1"` → `"my-photo-1"`
//! - `"my-photo-1"` → `"my-photo-1"`
//! - `"My_Photo__1"` → `"my_photo__1"` (underscores are kept, never collapsed)
//! - `"--Dusk--"` → `"dusk"`
//!
//! ## Collisions
//!
//! Two different names can map to the same slug (`"A B"` and `"a-b"`). Within
//! one category this means both sources target the same output file and the
//! later one wins. The pipeline warns about it but does not disambiguate.

use std::path::Path;

/// Extension of every transcoded output file.
pub const OUTPUT_EXTENSION: &str = "jpg";

/// Slug used when a name contains nothing but separators.
const FALLBACK_SLUG: &str = "image";

/// Normalize a name into a slug.
///
/// Lower-cases the input, replaces every run of characters outside
/// `[a-z0-9_-]` with a single hyphen, collapses repeated hyphens and trims
/// hyphens from both ends. Returns an empty string when nothing survives.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut slug = String::with_capacity(lower.len());
    let mut last_was_hyphen = false;

    for c in lower.chars() {
        let keep = c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_';
        if keep {
            slug.push(c);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            // Literal hyphens and disallowed runs both end up as one hyphen
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    slug.trim_matches('-').to_string()
}

/// Slug for a source file: its stem (name without extension), normalized.
///
/// Falls back to `"image"` when the stem normalizes to nothing, so the
/// output never becomes a bare `.jpg`.
pub fn file_slug(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let slug = slugify(&stem);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Canonical output filename for a source file: `<slug>.jpg`.
pub fn output_filename(path: &Path) -> String {
    format!("{}.{}", file_slug(path), OUTPUT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_and_punctuation_become_one_hyphen() {
        assert_eq!(slugify("My Photo #1"), "my-photo-1");
    }

    #[test]
    fn already_canonical_is_unchanged() {
        assert_eq!(slugify("my-photo-1"), "my-photo-1");
    }

    #[test]
    fn underscores_are_preserved() {
        assert_eq!(slugify("My_Photo__1"), "my_photo__1");
    }

    #[test]
    fn repeated_hyphens_collapse() {
        assert_eq!(slugify("dawn---over--hills"), "dawn-over-hills");
    }

    #[test]
    fn hyphen_next_to_disallowed_run_collapses() {
        assert_eq!(slugify("a - b"), "a-b");
    }

    #[test]
    fn leading_and_trailing_hyphens_trimmed() {
        assert_eq!(slugify("  (Dusk)  "), "dusk");
        assert_eq!(slugify("--x--"), "x");
    }

    #[test]
    fn non_ascii_letters_are_replaced() {
        assert_eq!(slugify("Café Noir"), "caf-noir");
    }

    #[test]
    fn only_separators_gives_empty() {
        assert_eq!(slugify("#!?"), "");
    }

    #[test]
    fn file_slug_strips_extension() {
        assert_eq!(file_slug(Path::new("shoots/My Photo #1.JPG")), "my-photo-1");
    }

    #[test]
    fn file_slug_fallback_for_empty() {
        assert_eq!(file_slug(Path::new("dir/###.png")), "image");
    }

    #[test]
    fn output_filename_uses_canonical_extension() {
        assert_eq!(output_filename(Path::new("My_Photo__1.jpg")), "my_photo__1.jpg");
        assert_eq!(output_filename(Path::new("scan.TIFF")), "scan.jpg");
    }

    #[test]
    fn distinct_names_can_collide() {
        assert_eq!(
            output_filename(Path::new("A B.jpg")),
            output_filename(Path::new("a-b.png"))
        );
    }
}
