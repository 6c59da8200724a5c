//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | EXIF orientation | `ImageDecoder::orientation` + `DynamicImage::apply_orientation` |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → JPEG (output) | `jpeg-encoder`: progressive, 4:4:4, fixed quality |
//! | Encode → JPEG (preview) | `image::codecs::jpeg::JpegEncoder` (baseline) |
//!
//! Both encoders are deterministic: the same decoded pixels and quality
//! always produce the same bytes.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::fit_long_edge;
use super::params::{PreviewParams, Quality, TranscodeParams};
use crate::fsio::write_atomic;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageFormat, ImageReader};
use std::path::Path;
use std::sync::LazyLock;

/// Source formats the pipeline accepts, by extension.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("webp", ImageFormat::WebP),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode an image and apply its EXIF orientation, so the returned pixels
/// carry no residual rotation or flip.
fn load_oriented(path: &Path) -> Result<DynamicImage, BackendError> {
    let mut reader = ImageReader::open(path)?.with_guessed_format()?;
    // Large camera files exceed the default allocation limit
    reader.no_limits();

    let decode_err = |e: image::ImageError| {
        BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
    };
    let mut decoder = reader.into_decoder().map_err(decode_err)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Fit to `long_edge` without enlarging. Returns the image untouched when
/// no resize is needed.
fn fit(img: DynamicImage, long_edge: u32, filter: FilterType) -> DynamicImage {
    let (w, h) = fit_long_edge((img.width(), img.height()), long_edge);
    if (w, h) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(w, h, filter)
    }
}

/// Encode as a progressive JPEG with full-resolution chroma.
fn encode_output_jpeg(img: &DynamicImage, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let too_large = || {
        BackendError::ProcessingFailed(format!(
            "{}x{} exceeds the JPEG size limit",
            img.width(),
            img.height()
        ))
    };
    let width = u16::try_from(img.width()).map_err(|_| too_large())?;
    let height = u16::try_from(img.height()).map_err(|_| too_large())?;

    let rgb = img.to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut bytes, quality.as_u8());
    encoder.set_progressive(true);
    encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_4_4);
    encoder
        .encode(rgb.as_raw(), width, height, jpeg_encoder::ColorType::Rgb)
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {}", e)))?;
    Ok(bytes)
}

/// Encode a small baseline JPEG in memory.
fn encode_preview_jpeg(img: &DynamicImage, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let rgb = img.to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.as_u8())
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| BackendError::ProcessingFailed(format!("Preview encode failed: {}", e)))?;
    Ok(bytes)
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
        })?;
        Ok(Dimensions { width, height })
    }

    fn transcode(&self, params: &TranscodeParams) -> Result<(), BackendError> {
        let img = load_oriented(&params.source)?;
        let fitted = fit(img, params.long_edge, FilterType::Lanczos3);
        let bytes = encode_output_jpeg(&fitted, params.quality)?;
        // Source and output may be the same file (in-place reprocessing);
        // the source is fully decoded before the output is replaced.
        write_atomic(&params.output, &bytes)?;
        Ok(())
    }

    fn preview(&self, params: &PreviewParams) -> Result<Vec<u8>, BackendError> {
        let img = load_oriented(&params.source)?;
        let small = fit(img, params.long_edge, FilterType::Triangle);
        encode_preview_jpeg(&small, params.quality)
    }
}
