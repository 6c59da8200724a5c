//! High-level image operations.
//!
//! These functions combine calculations with backend execution.
//! They take configuration, compute parameters, and call the backend.

use super::backend::{BackendError, ImageBackend};
use super::params::{PreviewParams, Quality, TranscodeParams};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::Path;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &impl ImageBackend, path: &Path) -> Result<(u32, u32)> {
    let dims = backend.identify(path)?;
    Ok((dims.width, dims.height))
}

/// Configuration for transcoding one category.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    pub long_edge: u32,
    pub quality: Quality,
}

/// Plan a transcode operation without executing it.
pub fn plan_transcode(source: &Path, output: &Path, config: &TranscodeConfig) -> TranscodeParams {
    TranscodeParams {
        source: source.to_path_buf(),
        output: output.to_path_buf(),
        long_edge: config.long_edge,
        quality: config.quality,
    }
}

/// Transcode `source` into `output`.
///
/// The caller reads the written dimensions back with [`get_dimensions`];
/// the pre-resize size of the source is never trusted.
pub fn transcode_image(
    backend: &impl ImageBackend,
    source: &Path,
    output: &Path,
    config: &TranscodeConfig,
) -> Result<()> {
    backend.transcode(&plan_transcode(source, output, config))
}

/// Configuration for inline placeholders.
#[derive(Debug, Clone)]
pub struct PlaceholderConfig {
    pub long_edge: u32,
    pub quality: Quality,
    /// Encoded previews above this size are rejected.
    pub max_bytes: usize,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            long_edge: 24,
            quality: Quality::new(40),
            max_bytes: 4096,
        }
    }
}

/// Wrap JPEG bytes in a `data:` URI.
pub fn jpeg_data_uri(bytes: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes))
}

/// Build the inline placeholder for an already-transcoded image.
pub fn create_placeholder(
    backend: &impl ImageBackend,
    transcoded: &Path,
    config: &PlaceholderConfig,
) -> Result<String> {
    let bytes = backend.preview(&PreviewParams {
        source: transcoded.to_path_buf(),
        long_edge: config.long_edge,
        quality: config.quality,
    })?;
    if bytes.len() > config.max_bytes {
        return Err(BackendError::ProcessingFailed(format!(
            "placeholder is {} bytes, limit is {}",
            bytes.len(),
            config.max_bytes
        )));
    }
    Ok(jpeg_data_uri(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Dimensions;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};

    #[test]
    fn get_dimensions_calls_backend() {
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 1920,
            height: 1080,
        }]);

        let dims = get_dimensions(&backend, Path::new("/test.jpg")).unwrap();
        assert_eq!(dims, (1920, 1080));
    }

    #[test]
    fn plan_transcode_copies_config() {
        let config = TranscodeConfig {
            long_edge: 3840,
            quality: Quality::new(82),
        };
        let params = plan_transcode(Path::new("/in/a.png"), Path::new("/out/a.jpg"), &config);
        assert_eq!(params.long_edge, 3840);
        assert_eq!(params.quality.value(), 82);
        assert_eq!(params.output, Path::new("/out/a.jpg"));
    }

    #[test]
    fn transcode_runs_single_backend_op() {
        let backend = MockBackend::new();
        let config = TranscodeConfig {
            long_edge: 2400,
            quality: Quality::default(),
        };

        transcode_image(
            &backend,
            Path::new("/in/a.jpg"),
            Path::new("/out/a.jpg"),
            &config,
        )
        .unwrap();

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            &ops[0],
            RecordedOp::Transcode { long_edge: 2400, output, .. } if output == "/out/a.jpg"
        ));
    }

    #[test]
    fn transcode_failure_propagates() {
        let backend = MockBackend::with_fixed_dimensions(1, 1).failing_on("bad");
        let config = TranscodeConfig {
            long_edge: 2400,
            quality: Quality::default(),
        };
        let result = transcode_image(
            &backend,
            Path::new("/in/bad.jpg"),
            Path::new("/out/bad.jpg"),
            &config,
        );
        assert!(result.is_err());
    }

    #[test]
    fn data_uri_format() {
        assert_eq!(jpeg_data_uri(b"tiny"), "data:image/jpeg;base64,dGlueQ==");
    }

    #[test]
    fn placeholder_uses_preview_settings() {
        let backend = MockBackend::new();
        let uri = create_placeholder(
            &backend,
            Path::new("/out/a.jpg"),
            &PlaceholderConfig::default(),
        )
        .unwrap();
        assert!(uri.starts_with("data:image/jpeg;base64,"));

        let ops = backend.get_operations();
        assert!(matches!(
            &ops[0],
            RecordedOp::Preview {
                long_edge: 24,
                quality: 40,
                ..
            }
        ));
    }

    #[test]
    fn placeholder_over_limit_errors() {
        let backend = MockBackend::new();
        let config = PlaceholderConfig {
            max_bytes: 2,
            ..PlaceholderConfig::default()
        };
        assert!(create_placeholder(&backend, Path::new("/out/a.jpg"), &config).is_err());
    }

    #[test]
    fn placeholder_backend_failure_propagates() {
        let backend = MockBackend::new().without_previews();
        let result = create_placeholder(
            &backend,
            Path::new("/out/a.jpg"),
            &PlaceholderConfig::default(),
        );
        assert!(result.is_err());
    }
}
