//! Pipeline configuration.
//!
//! Configuration is layered, lowest to highest priority:
//!
//! 1. Stock defaults ([`PipelineConfig::default`])
//! 2. An optional `gallery-prep.toml` (or the file passed with `--config`)
//! 3. Environment variables (`MAX_INPUT_BYTES`, `LONG_EDGE`, `LONG_EDGE_HERO`,
//!    `JPG_QUALITY`)
//!
//! The merged result is validated before use.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! site_root = "public"                  # Served web root
//! manifest = "images.manifest.json"     # Relative to site_root
//! output_dir = "optimized"              # Relative to site_root, also the served prefix
//! categories = ["hero", "recents", "portraits", "weddings"]
//!
//! [scan]
//! max_input_bytes = 150000000           # Larger sources are skipped
//!
//! [images]
//! long_edge = 2400                      # Target long edge for most categories
//! quality = 82                          # JPEG quality (1-100)
//!
//! [images.long_edge_overrides]
//! hero = 3840                           # Per-category target long edge
//!
//! [placeholder]
//! edge = 24                             # Long edge of the inline preview
//! quality = 40
//! max_bytes = 4096                      # Larger previews are dropped
//!
//! [processing]
//! max_processes = 4                     # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file looked up in the working directory.
pub const CONFIG_FILENAME: &str = "gallery-prep.toml";

/// Category that gets the larger stock long edge.
pub const HERO_CATEGORY: &str = "hero";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value for environment variable {name}: {value:?}")]
    Env { name: &'static str, value: String },
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Served web root. Every path in the manifest is relative to it.
    pub site_root: String,
    /// Manifest file, relative to `site_root`.
    pub manifest: String,
    /// Output tree for transcoded images, relative to `site_root`.
    pub output_dir: String,
    /// Input directories, relative to `site_root`. The base name of each
    /// becomes the category of the images found beneath it.
    pub categories: Vec<String>,
    pub scan: ScanConfig,
    pub images: ImagesConfig,
    pub placeholder: PlaceholderConfig,
    pub processing: ProcessingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            site_root: "public".to_string(),
            manifest: "images.manifest.json".to_string(),
            output_dir: "optimized".to_string(),
            categories: ["hero", "recents", "portraits", "weddings"]
                .into_iter()
                .map(String::from)
                .collect(),
            scan: ScanConfig::default(),
            images: ImagesConfig::default(),
            placeholder: PlaceholderConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.images.quality) {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if !(1..=100).contains(&self.placeholder.quality) {
            return Err(ConfigError::Validation(
                "placeholder.quality must be 1-100".into(),
            ));
        }
        if self.images.long_edge == 0 {
            return Err(ConfigError::Validation(
                "images.long_edge must be non-zero".into(),
            ));
        }
        if let Some((name, _)) = self
            .images
            .long_edge_overrides
            .iter()
            .find(|(_, edge)| **edge == 0)
        {
            return Err(ConfigError::Validation(format!(
                "images.long_edge_overrides.{name} must be non-zero"
            )));
        }
        if self.placeholder.edge == 0 {
            return Err(ConfigError::Validation(
                "placeholder.edge must be non-zero".into(),
            ));
        }
        if self.placeholder.max_bytes == 0 {
            return Err(ConfigError::Validation(
                "placeholder.max_bytes must be non-zero".into(),
            ));
        }
        if self.categories.is_empty() {
            return Err(ConfigError::Validation(
                "categories must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn site_root(&self) -> PathBuf {
        PathBuf::from(&self.site_root)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.site_root().join(&self.manifest)
    }

    /// Filesystem directory holding `<category>/<slug>.jpg` outputs.
    pub fn output_root(&self) -> PathBuf {
        self.site_root().join(&self.output_dir)
    }

    /// Served prefix of the output tree, e.g. `/optimized`.
    pub fn output_prefix(&self) -> String {
        format!("/{}", self.output_dir.trim_matches('/'))
    }

    /// Target long edge for a category.
    pub fn long_edge_for(&self, category: &str) -> u32 {
        self.images
            .long_edge_overrides
            .get(category)
            .copied()
            .unwrap_or(self.images.long_edge)
    }
}

/// Source discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Sources larger than this many bytes are skipped and reported.
    pub max_input_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: 150_000_000,
        }
    }
}

/// Transcoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Target long edge in pixels for categories without an override.
    pub long_edge: u32,
    /// JPEG quality (1-100).
    pub quality: u32,
    /// Per-category long edge, keyed by category name.
    pub long_edge_overrides: BTreeMap<String, u32>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            long_edge: 2400,
            quality: 82,
            long_edge_overrides: BTreeMap::from([(HERO_CATEGORY.to_string(), 3840)]),
        }
    }
}

/// Inline preview settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaceholderConfig {
    /// Long edge of the preview in pixels.
    pub edge: u32,
    /// JPEG quality of the preview (1-100).
    pub quality: u32,
    /// Upper bound on the encoded preview size in bytes.
    pub max_bytes: usize,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            edge: 24,
            quality: 40,
            max_bytes: 4096,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel transcoding workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(PipelineConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Apply environment overrides on top of a file-level config.
///
/// `lookup` abstracts `std::env::var` so tests never touch the process
/// environment.
pub fn apply_env_overrides(
    mut config: PipelineConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PipelineConfig, ConfigError> {
    if let Some(v) = parse_env(&lookup, "MAX_INPUT_BYTES")? {
        config.scan.max_input_bytes = v;
    }
    if let Some(v) = parse_env(&lookup, "LONG_EDGE")? {
        config.images.long_edge = v;
    }
    if let Some(v) = parse_env(&lookup, "LONG_EDGE_HERO")? {
        config
            .images
            .long_edge_overrides
            .insert(HERO_CATEGORY.to_string(), v);
    }
    if let Some(v) = parse_env(&lookup, "JPG_QUALITY")? {
        config.images.quality = v;
    }
    Ok(config)
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim().replace('_', "");
            trimmed
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Env { name, value: raw })
        }
    }
}

/// Merge an optional overlay onto the stock defaults, apply environment
/// overrides, then validate.
pub fn resolve_config(
    overlay: Option<toml::Value>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PipelineConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PipelineConfig = merged.try_into()?;
    let config = apply_env_overrides(config, lookup)?;
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path` (missing file = stock defaults) and apply
/// the process environment.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let overlay = load_raw_config(path)?;
    resolve_config(overlay, |name| std::env::var(name).ok())
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# gallery-prep configuration
# =========================
# All options are optional. Values shown are the stock defaults.
# Environment variables override this file:
#   MAX_INPUT_BYTES, LONG_EDGE, LONG_EDGE_HERO, JPG_QUALITY

# Served web root. Manifest paths ("/optimized/...") are relative to it.
site_root = "public"

# Manifest written by `prepare`, updated by `reprocess` and `migrate`.
manifest = "images.manifest.json"

# Transcoded images land in <site_root>/<output_dir>/<category>/<slug>.jpg
output_dir = "optimized"

# Input directories under site_root. Each directory name is a category.
categories = ["hero", "recents", "portraits", "weddings"]

[scan]
# Sources larger than this are skipped (reported, never fatal).
max_input_bytes = 150000000

[images]
# Target long edge in pixels. Images are never enlarged.
long_edge = 2400
# JPEG quality (1-100). Output is progressive with 4:4:4 chroma.
quality = 82

[images.long_edge_overrides]
# Per-category long edge.
hero = 3840

[placeholder]
# Long edge of the inline blur preview.
edge = 24
# JPEG quality of the preview (1-100).
quality = 40
# Previews larger than this are dropped (empty blurDataURL).
max_bytes = 4096

[processing]
# Maximum parallel transcoding workers. Omit for auto (= CPU cores).
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.scan.max_input_bytes, 150_000_000);
        assert_eq!(config.images.long_edge, 2400);
        assert_eq!(config.images.quality, 82);
        assert_eq!(config.placeholder.edge, 24);
        assert_eq!(config.placeholder.quality, 40);
        assert_eq!(
            config.categories,
            vec!["hero", "recents", "portraits", "weddings"]
        );
    }

    #[test]
    fn long_edge_hero_and_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.long_edge_for("hero"), 3840);
        assert_eq!(config.long_edge_for("portraits"), 2400);
        assert_eq!(config.long_edge_for("unknown"), 2400);
    }

    #[test]
    fn paths_are_relative_to_site_root() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("public/images.manifest.json")
        );
        assert_eq!(config.output_root(), PathBuf::from("public/optimized"));
        assert_eq!(config.output_prefix(), "/optimized");
    }

    #[test]
    fn output_prefix_trims_slashes() {
        let config = PipelineConfig {
            output_dir: "/assets/opt/".to_string(),
            ..PipelineConfig::default()
        };
        assert_eq!(config.output_prefix(), "/assets/opt");
    }

    #[test]
    fn parse_partial_config() {
        let overlay: toml::Value = toml::from_str(
            r#"
            [images]
            quality = 90
            "#,
        )
        .unwrap();
        let config = resolve_config(Some(overlay), no_env).unwrap();
        assert_eq!(config.images.quality, 90);
        assert_eq!(config.images.long_edge, 2400);
        assert_eq!(config.long_edge_for("hero"), 3840);
    }

    #[test]
    fn overrides_table_merges_with_stock() {
        let overlay: toml::Value = toml::from_str(
            r#"
            [images.long_edge_overrides]
            weddings = 3000
            "#,
        )
        .unwrap();
        let config = resolve_config(Some(overlay), no_env).unwrap();
        assert_eq!(config.long_edge_for("weddings"), 3000);
        assert_eq!(config.long_edge_for("hero"), 3840);
    }

    #[test]
    fn env_overrides_file_values() {
        let overlay: toml::Value = toml::from_str("[images]\nlong_edge = 1000").unwrap();
        let env = env_from(&[
            ("LONG_EDGE", "2000"),
            ("LONG_EDGE_HERO", "4000"),
            ("JPG_QUALITY", "75"),
            ("MAX_INPUT_BYTES", "1_000"),
        ]);
        let config = resolve_config(Some(overlay), env).unwrap();
        assert_eq!(config.images.long_edge, 2000);
        assert_eq!(config.long_edge_for("hero"), 4000);
        assert_eq!(config.images.quality, 75);
        assert_eq!(config.scan.max_input_bytes, 1000);
    }

    #[test]
    fn env_invalid_number_is_error() {
        let result = resolve_config(None, env_from(&[("LONG_EDGE", "wide")]));
        assert!(matches!(
            result,
            Err(ConfigError::Env {
                name: "LONG_EDGE",
                ..
            })
        ));
    }

    #[test]
    fn env_quality_out_of_range_fails_validation() {
        let result = resolve_config(None, env_from(&[("JPG_QUALITY", "0")]));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_raw_config(&tmp.path().join(CONFIG_FILENAME)).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn load_raw_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&path, "site_root = \"www\"\ncategories = [\"hero\"]\n").unwrap();
        let raw = load_raw_config(&path).unwrap().unwrap();
        let config = resolve_config(Some(raw), no_env).unwrap();
        assert_eq!(config.site_root, "www");
        assert_eq!(config.categories, vec!["hero"]);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&path, "this is not [valid toml").unwrap();
        assert!(matches!(load_raw_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let overlay: toml::Value = toml::from_str("[images]\nsizes = [800]").unwrap();
        assert!(resolve_config(Some(overlay), no_env).is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        let overlay: toml::Value = toml::from_str("[theme]\ngap = 1").unwrap();
        assert!(resolve_config(Some(overlay), no_env).is_err());
    }

    #[test]
    fn validate_empty_categories() {
        let config = PipelineConfig {
            categories: vec![],
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_zero_override() {
        let mut config = PipelineConfig::default();
        config
            .images
            .long_edge_overrides
            .insert("weddings".to_string(), 0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("weddings"));
    }

    #[test]
    fn validate_default_config_passes() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn effective_threads_auto() {
        let threads = effective_threads(&ProcessingConfig::default());
        assert!(threads >= 1);
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = ProcessingConfig {
            max_processes: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    #[test]
    fn effective_threads_zero_means_one() {
        let config = ProcessingConfig {
            max_processes: Some(0),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Value = toml::from_str("b = 3").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"].as_integer(), Some(1));
        assert_eq!(merged["b"].as_integer(), Some(3));
    }

    #[test]
    fn merge_toml_arrays_replace() {
        let base: toml::Value = toml::from_str("c = [\"a\", \"b\"]").unwrap();
        let overlay: toml::Value = toml::from_str("c = [\"z\"]").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["c"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let value: toml::Value = toml::from_str(stock_config_toml()).unwrap();
        let config = resolve_config(Some(value), no_env).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }
}
