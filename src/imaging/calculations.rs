//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Orientation class of an image, decided after EXIF rotation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Width ≥ height (squares count as landscape).
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn of(width: u32, height: u32) -> Self {
        if width >= height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

/// Fit an image to a target long edge without ever enlarging it.
///
/// Only the constrained dimension is targeted: width for landscape, height
/// for portrait. The other dimension follows the source aspect ratio and is
/// rounded to the nearest pixel (never below 1).
///
/// # Examples
/// ```
/// # use gallery_prep::imaging::fit_long_edge;
/// // 4000x2000 landscape, target 2400 → 2400x1200
/// assert_eq!(fit_long_edge((4000, 2000), 2400), (2400, 1200));
///
/// // 800x600 is already smaller than the target → unchanged
/// assert_eq!(fit_long_edge((800, 600), 2400), (800, 600));
/// ```
pub fn fit_long_edge(source: (u32, u32), target: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return source;
    }

    match Orientation::of(src_w, src_h) {
        Orientation::Landscape => {
            if src_w <= target {
                return source;
            }
            let h = scale(src_h, target, src_w);
            (target, h)
        }
        Orientation::Portrait => {
            if src_h <= target {
                return source;
            }
            let w = scale(src_w, target, src_h);
            (w, target)
        }
    }
}

/// `value * num / den`, rounded, at least 1.
fn scale(value: u32, num: u32, den: u32) -> u32 {
    let scaled = (value as f64 * num as f64 / den as f64).round() as u32;
    scaled.max(1)
}
