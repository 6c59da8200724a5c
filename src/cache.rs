//! Processing cache for incremental full runs.
//!
//! Decoding, resampling and progressive JPEG encoding of a 40-megapixel
//! source takes seconds. A full run consults this cache first and skips the
//! transcode when neither the source bytes nor the encode settings changed.
//!
//! Only the transcode is cached. Dimensions and the inline placeholder are
//! always read back from the output file, so a manifest entry comes out the
//! same whether its output was reused or freshly encoded.
//!
//! Each record also holds the SHA-256 of the output as it was written. A
//! lookup only succeeds while the file on disk still has that hash, so an
//! output overwritten since (by `reprocess`, by hand, or by another source
//! that took over the path) is never offered for reuse.
//!
//! ## Keys
//!
//! Entries are found by [`ContentKey`]: the SHA-256 of the source bytes plus
//! the SHA-256 of the encode settings. The output path plays no part in the
//! lookup. A source that was renamed or moved to another category finds its
//! old output under the previous path, and the pipeline copies it instead of
//! re-encoding.
//!
//! ## On disk
//!
//! `<output_dir>/.gallery-cache.json`, keyed by output path relative to the
//! output directory and written atomically. A missing, unreadable or
//! outdated file is an empty cache, never an error.
//!
//! `prepare --no-cache` starts from an empty cache. `reprocess` never reads
//! or writes it.

use crate::fsio::write_atomic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

const CACHE_FILENAME: &str = ".gallery-cache.json";

/// Bumped whenever the file layout or key derivation changes; older files
/// are then ignored.
const FORMAT_VERSION: u32 = 3;

/// Mixed into the settings hash. Must change with the encoder configuration.
const ENCODER_TAG: &[u8] = b"jpeg-progressive-444\0";

/// Where an output's content came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    /// SHA-256 of the source file, hex.
    pub source: String,
    /// SHA-256 of the encode settings, hex. See [`settings_hash`].
    pub settings: String,
}

impl ContentKey {
    pub fn new(source: impl Into<String>, settings: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            settings: settings.into(),
        }
    }
}

/// What the cache knows about one output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CachedOutput {
    #[serde(flatten)]
    key: ContentKey,
    /// SHA-256 of the output file, hex.
    output: String,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    format: u32,
    outputs: BTreeMap<String, CachedOutput>,
}

/// Output path → content key and output hash, plus the reverse index used
/// for lookups.
#[derive(Debug, Clone, Default)]
pub struct ProcessingCache {
    outputs: BTreeMap<String, CachedOutput>,
    by_content: HashMap<ContentKey, String>,
}

impl ProcessingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `<output_dir>/.gallery-cache.json`. Anything short of a readable
    /// file in the current format yields an empty cache.
    pub fn load(output_dir: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(cache_path(output_dir)) else {
            return Self::new();
        };
        match serde_json::from_str::<CacheFile>(&text) {
            Ok(file) if file.format == FORMAT_VERSION => Self::from_outputs(file.outputs),
            Ok(file) => {
                tracing::debug!(format = file.format, "ignoring cache in old format");
                Self::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unreadable cache");
                Self::new()
            }
        }
    }

    fn from_outputs(outputs: BTreeMap<String, CachedOutput>) -> Self {
        let by_content = outputs
            .iter()
            .map(|(path, cached)| (cached.key.clone(), path.clone()))
            .collect();
        Self {
            outputs,
            by_content,
        }
    }

    pub fn save(&self, output_dir: &Path) -> io::Result<()> {
        let file = CacheFile {
            format: FORMAT_VERSION,
            outputs: self.outputs.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        write_atomic(&cache_path(output_dir), json.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Output path (relative to `output_dir`) last produced from `key`,
    /// provided the file there still hashes to what was recorded. It may
    /// differ from the path the caller is about to write.
    pub fn lookup(&self, key: &ContentKey, output_dir: &Path) -> Option<&str> {
        let path = self.by_content.get(key)?;
        let recorded = &self.outputs.get(path)?.output;
        let current = hash_file(&output_dir.join(path)).ok()?;
        (current == *recorded).then_some(path.as_str())
    }

    /// Remember that `output` now holds the content identified by `key`,
    /// and that the file hashes to `output_hash`.
    ///
    /// Each key maps to one output and each output to one key; whichever
    /// older record conflicts is forgotten.
    pub fn record(&mut self, output: String, key: ContentKey, output_hash: String) {
        if let Some(previous_output) = self.by_content.get(&key)
            && *previous_output != output
        {
            self.outputs.remove(previous_output);
        }
        if let Some(previous) = self.outputs.get(&output)
            && previous.key != key
        {
            self.by_content.remove(&previous.key);
        }
        self.by_content.insert(key.clone(), output.clone());
        self.outputs.insert(
            output,
            CachedOutput {
                key,
                output: output_hash,
            },
        );
    }

    /// Forget every output not listed in `live`, so outputs of deleted
    /// sources are no longer offered for copying.
    pub fn retain_outputs(&mut self, live: &[String]) {
        self.outputs.retain(|path, _| live.contains(path));
        self.by_content.retain(|_, path| live.contains(path));
    }
}

pub fn cache_path(output_dir: &Path) -> PathBuf {
    output_dir.join(CACHE_FILENAME)
}

/// Hex SHA-256 of a file's bytes.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex(&Sha256::digest(&bytes)))
}

/// Hex SHA-256 of everything that affects the encoded bytes of one output.
pub fn settings_hash(long_edge: u32, quality: u32) -> String {
    let digest = Sha256::new()
        .chain_update(ENCODER_TAG)
        .chain_update(long_edge.to_le_bytes())
        .chain_update(quality.to_le_bytes())
        .finalize();
    hex(&digest)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// How each output of a run was produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Output already in place.
    pub hits: u32,
    /// Output copied from another path.
    pub copies: u32,
    /// Output encoded from the source.
    pub misses: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.copies + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits == 0 && self.copies == 0 {
            return write!(f, "{} encoded", self.misses);
        }
        let mut parts = vec![format!("{} cached", self.hits)];
        if self.copies > 0 {
            parts.push(format!("{} copied", self.copies));
        }
        parts.push(format!("{} encoded", self.misses));
        write!(f, "{} ({} total)", parts.join(", "), self.total())
    }
}
