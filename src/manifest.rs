//! The image manifest: the one piece of state shared between runs.
//!
//! The manifest is a JSON array with one record per processed image:
//!
//! ```json
//! [{
//!   "original": "/portraits/Jane 1.jpg",
//!   "src": "/optimized/portraits/jane-1.jpg",
//!   "width": 1600, "height": 2400,
//!   "blurDataURL": "data:image/jpeg;base64,...",
//!   "alt": "Jane on the porch",
//!   "tags": ["featured"],
//!   "category": "portraits"
//! }]
//! ```
//!
//! ## Computed vs. curated fields
//!
//! Every entry is the merge of two parts:
//!
//! - [`ComputedFields`]: paths, dimensions, placeholder, category. Always
//!   recomputed and overwritten by the pipeline.
//! - [`CuratedFields`]: `alt` and `tags`. Written by hand after the fact and
//!   never regenerated; [`Manifest::upsert`] carries them forward from the
//!   previous entry with the same `src`.
//!
//! ## Read-modify-write
//!
//! Every tool loads the whole manifest, computes the whole next manifest in
//! memory and replaces the file atomically ([`save`]). There are no partial
//! updates against the file on disk, and no locking: concurrent runs against
//! the same manifest are not supported.
//!
//! `src` is the natural key. Entry order is insertion order; consumers sort
//! for themselves.

use crate::fsio::write_atomic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One processed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Served path of the source as discovered, e.g. `/portraits/Jane 1.jpg`.
    #[serde(default)]
    pub original: String,
    /// Served path of the transcoded output, e.g. `/optimized/portraits/jane-1.jpg`.
    pub src: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Inline preview `data:` URI, empty if generation failed.
    #[serde(rename = "blurDataURL", default)]
    pub blur_data_url: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: String,
    /// Keys added by hand that the pipeline does not know about. Kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields the pipeline owns and recomputes on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedFields {
    pub original: String,
    pub src: String,
    pub width: u32,
    pub height: u32,
    pub blur_data_url: String,
    pub category: String,
}

/// Fields the operator owns. Never regenerated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CuratedFields {
    pub alt: String,
    pub tags: Vec<String>,
    /// Unknown keys of the entry.
    pub extra: Map<String, Value>,
}

impl ManifestEntry {
    pub fn from_parts(computed: ComputedFields, curated: CuratedFields) -> Self {
        Self {
            original: computed.original,
            src: computed.src,
            width: computed.width,
            height: computed.height,
            blur_data_url: computed.blur_data_url,
            alt: curated.alt,
            tags: curated.tags,
            category: computed.category,
            extra: curated.extra,
        }
    }

    pub fn curated(&self) -> CuratedFields {
        CuratedFields {
            alt: self.alt.clone(),
            tags: self.tags.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Fill `alt`, `tags` and unknown keys that are unset here from `other`.
    pub fn fill_curated_from(&mut self, other: &ManifestEntry) {
        if self.alt.is_empty() {
            self.alt = other.alt.clone();
        }
        if self.tags.is_empty() {
            self.tags = other.tags.clone();
        }
        for (key, value) in &other.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Whether an upsert added a new entry or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Ordered collection of entries, keyed by `src`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    /// `src` → position in `entries`. Rebuilt after deserialization.
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        let mut manifest = Self {
            entries,
            index: HashMap::new(),
        };
        manifest.rebuild_index();
        manifest
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.src.clone(), i))
            .collect();
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Mutable access for bulk rewrites. The `src` index is rebuilt when the
    /// returned guard is dropped.
    pub fn entries_mut(&mut self) -> EntriesMut<'_> {
        EntriesMut { manifest: self }
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, src: &str) -> Option<&ManifestEntry> {
        self.index.get(src).map(|&i| &self.entries[i])
    }

    /// Curated fields of the entry with this `src`, if any.
    pub fn curated_for(&self, src: &str) -> Option<CuratedFields> {
        self.get(src).map(ManifestEntry::curated)
    }

    /// Insert or replace the entry keyed by `computed.src`.
    ///
    /// An existing entry keeps its position and its curated fields; only the
    /// computed fields change. A new entry is appended with empty curated
    /// fields.
    pub fn upsert(&mut self, computed: ComputedFields) -> UpsertOutcome {
        match self.index.get(&computed.src) {
            Some(&i) => {
                let curated = self.entries[i].curated();
                self.entries[i] = ManifestEntry::from_parts(computed, curated);
                UpsertOutcome::Updated
            }
            None => {
                self.index.insert(computed.src.clone(), self.entries.len());
                self.entries
                    .push(ManifestEntry::from_parts(computed, CuratedFields::default()));
                UpsertOutcome::Inserted
            }
        }
    }

    /// Copy curated fields from entries of `prior` with the same `src`.
    ///
    /// Used by full runs, which rebuild every entry from scratch.
    pub fn carry_curated_from(&mut self, prior: &Manifest) {
        for entry in &mut self.entries {
            if let Some(curated) = prior.curated_for(&entry.src) {
                entry.alt = curated.alt;
                entry.tags = curated.tags;
                entry.extra = curated.extra;
            }
        }
    }

    /// `src` values that appear more than once.
    pub fn duplicate_srcs(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut dupes = Vec::new();
        for entry in &self.entries {
            if !seen.insert(entry.src.as_str()) && !dupes.contains(&entry.src.as_str()) {
                dupes.push(entry.src.as_str());
            }
        }
        dupes
    }

    /// `src` values whose asset does not exist under `site_root`.
    pub fn missing_assets(&self, site_root: &Path) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| !served_path_to_fs(site_root, &e.src).is_file())
            .map(|e| e.src.as_str())
            .collect()
    }
}

/// Result of validating a manifest against the invariants consumers rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub entries: usize,
    pub duplicate_srcs: Vec<String>,
    pub missing_assets: Vec<String>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.duplicate_srcs.is_empty() && self.missing_assets.is_empty()
    }
}

/// Verify `src` uniqueness and that every `src` resolves to a file.
pub fn check(manifest: &Manifest, site_root: &Path) -> CheckReport {
    CheckReport {
        entries: manifest.len(),
        duplicate_srcs: manifest
            .duplicate_srcs()
            .into_iter()
            .map(String::from)
            .collect(),
        missing_assets: manifest
            .missing_assets(site_root)
            .into_iter()
            .map(String::from)
            .collect(),
    }
}

/// Guard returned by [`Manifest::entries_mut`].
pub struct EntriesMut<'a> {
    manifest: &'a mut Manifest,
}

impl std::ops::Deref for EntriesMut<'_> {
    type Target = Vec<ManifestEntry>;
    fn deref(&self) -> &Self::Target {
        &self.manifest.entries
    }
}

impl std::ops::DerefMut for EntriesMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.manifest.entries
    }
}

impl Drop for EntriesMut<'_> {
    fn drop(&mut self) {
        self.manifest.rebuild_index();
    }
}

/// Map a served path (`/optimized/a/b.jpg`) onto the filesystem under `site_root`.
pub fn served_path_to_fs(site_root: &Path, served: &str) -> PathBuf {
    site_root.join(served.trim_start_matches('/'))
}

/// Load a manifest strictly.
///
/// Returns `Ok(None)` when the file does not exist, and an error when it
/// exists but cannot be read or parsed.
pub fn load(path: &Path) -> Result<Option<Manifest>, ManifestError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ManifestError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if content.trim().is_empty() {
        return Ok(Some(Manifest::new()));
    }
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Some(Manifest::from_entries(entries)))
}

/// Load a manifest for consumers: any failure yields an empty manifest.
///
/// This is the read side used by the site. An empty result means "no images
/// yet", never an error.
pub fn load_or_empty(path: &Path) -> Manifest {
    match load(path) {
        Ok(Some(m)) => m,
        Ok(None) => Manifest::new(),
        Err(e) => {
            warn!(error = %e, "manifest unreadable, serving empty collection");
            Manifest::new()
        }
    }
}

/// Pretty-printed JSON, as written to disk.
pub fn to_json(manifest: &Manifest) -> Result<String, ManifestError> {
    Ok(serde_json::to_string_pretty(manifest)?)
}

/// Atomically replace the manifest file with `manifest`.
///
/// Serialization happens before the file is touched, so a serialization
/// failure never leaves a malformed manifest behind.
pub fn save(path: &Path, manifest: &Manifest) -> Result<(), ManifestError> {
    let json = to_json(manifest)?;
    write_atomic(path, json.as_bytes()).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn computed(src: &str, width: u32, height: u32) -> ComputedFields {
        ComputedFields {
            original: format!("/portraits/{}", src.rsplit('/').next().unwrap()),
            src: src.to_string(),
            width,
            height,
            blur_data_url: "data:image/jpeg;base64,AA==".to_string(),
            category: "portraits".to_string(),
        }
    }

    #[test]
    fn serializes_with_wire_field_names_and_order() {
        let entry = ManifestEntry::from_parts(
            computed("/optimized/portraits/jane-1.jpg", 10, 20),
            CuratedFields::default(),
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"original":"/portraits/jane-1.jpg","src":"/optimized/portraits/jane-1.jpg","width":10,"height":20,"blurDataURL":"data:image/jpeg;base64,AA==","alt":"","tags":[],"category":"portraits"}"#
        );
    }

    #[test]
    fn manifest_serializes_as_array() {
        let mut m = Manifest::new();
        m.upsert(computed("/optimized/portraits/a.jpg", 1, 1));
        let value: serde_json::Value = serde_json::to_value(&m).unwrap();
        assert!(value.is_array());
        assert_eq!(value.as_array().unwrap().len(), 1);
    }

    #[test]
    fn deserializes_sparse_entries() {
        let json = r#"[{"src": "/optimized/hero/a.jpg"}]"#;
        let entries: Vec<ManifestEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].width, 0);
        assert!(entries[0].tags.is_empty());
        assert_eq!(entries[0].blur_data_url, "");
    }

    #[test]
    fn unknown_keys_survive_load_upsert_save() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("images.manifest.json");
        fs::write(
            &path,
            r#"[{"src": "/optimized/portraits/jane-1.jpg", "alt": "Jane", "credit": "A. Smith", "featuredOrder": 3}]"#,
        )
        .unwrap();

        let mut m = load(&path).unwrap().unwrap();
        m.upsert(computed("/optimized/portraits/jane-1.jpg", 10, 20));
        save(&path, &m).unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &value[0];
        assert_eq!(entry["credit"], "A. Smith");
        assert_eq!(entry["featuredOrder"], 3);
        assert_eq!(entry["alt"], "Jane");
        assert_eq!(entry["width"], 10);
    }

    #[test]
    fn fill_curated_only_sets_empty_fields() {
        let mut target = ManifestEntry::from_parts(
            computed("/optimized/portraits/a.jpg", 1, 1),
            CuratedFields {
                alt: "mine".into(),
                ..CuratedFields::default()
            },
        );
        let mut other_extra = Map::new();
        other_extra.insert("credit".into(), Value::from("B"));
        let other = ManifestEntry::from_parts(
            computed("/optimized/portraits/a.jpg", 1, 1),
            CuratedFields {
                alt: "theirs".into(),
                tags: vec!["featured".into()],
                extra: other_extra,
            },
        );

        target.fill_curated_from(&other);
        assert_eq!(target.alt, "mine");
        assert_eq!(target.tags, vec!["featured"]);
        assert_eq!(target.extra["credit"], "B");
    }

    #[test]
    fn upsert_inserts_new_src() {
        let mut m = Manifest::new();
        let outcome = m.upsert(computed("/optimized/portraits/a.jpg", 1, 1));
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("/optimized/portraits/a.jpg").unwrap().alt, "");
    }

    #[test]
    fn upsert_preserves_curated_fields() {
        let mut m = Manifest::from_entries(vec![ManifestEntry {
            alt: "Jane on the porch".to_string(),
            tags: vec!["featured".to_string()],
            ..ManifestEntry::from_parts(
                computed("/optimized/portraits/jane-1.jpg", 2400, 1600),
                CuratedFields::default(),
            )
        }]);

        let outcome = m.upsert(computed("/optimized/portraits/jane-1.jpg", 1600, 2400));
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(m.len(), 1);

        let entry = m.get("/optimized/portraits/jane-1.jpg").unwrap();
        assert_eq!(entry.alt, "Jane on the porch");
        assert_eq!(entry.tags, vec!["featured"]);
        assert_eq!((entry.width, entry.height), (1600, 2400));
    }

    #[test]
    fn upsert_keeps_position() {
        let mut m = Manifest::new();
        m.upsert(computed("/optimized/portraits/a.jpg", 1, 1));
        m.upsert(computed("/optimized/portraits/b.jpg", 1, 1));
        m.upsert(computed("/optimized/portraits/a.jpg", 5, 5));
        let srcs: Vec<&str> = m.entries().iter().map(|e| e.src.as_str()).collect();
        assert_eq!(
            srcs,
            vec!["/optimized/portraits/a.jpg", "/optimized/portraits/b.jpg"]
        );
        assert_eq!(m.entries()[0].width, 5);
    }

    #[test]
    fn carry_curated_from_prior_by_src() {
        let prior = Manifest::from_entries(vec![ManifestEntry {
            alt: "Dawn".to_string(),
            tags: vec!["cover".to_string()],
            ..ManifestEntry::from_parts(
                computed("/optimized/hero/dawn.jpg", 1, 1),
                CuratedFields::default(),
            )
        }]);

        let mut next = Manifest::new();
        next.upsert(computed("/optimized/hero/dawn.jpg", 2, 2));
        next.upsert(computed("/optimized/hero/new.jpg", 2, 2));
        next.carry_curated_from(&prior);

        assert_eq!(next.get("/optimized/hero/dawn.jpg").unwrap().alt, "Dawn");
        assert_eq!(next.get("/optimized/hero/dawn.jpg").unwrap().tags, vec!["cover"]);
        assert_eq!(next.get("/optimized/hero/new.jpg").unwrap().alt, "");
    }

    #[test]
    fn entries_mut_rebuilds_index() {
        let mut m = Manifest::new();
        m.upsert(computed("/optimized/n_p/a.jpg", 1, 1));
        {
            let mut entries = m.entries_mut();
            entries[0].src = "/optimized/portraits/a.jpg".to_string();
        }
        assert!(m.get("/optimized/n_p/a.jpg").is_none());
        assert!(m.get("/optimized/portraits/a.jpg").is_some());
    }

    #[test]
    fn duplicate_srcs_reported_once() {
        let e = ManifestEntry::from_parts(
            computed("/optimized/x/a.jpg", 1, 1),
            CuratedFields::default(),
        );
        let m = Manifest::from_entries(vec![e.clone(), e.clone(), e]);
        assert_eq!(m.duplicate_srcs(), vec!["/optimized/x/a.jpg"]);
    }

    #[test]
    fn missing_assets_checks_site_root() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("optimized/portraits")).unwrap();
        fs::write(tmp.path().join("optimized/portraits/a.jpg"), "x").unwrap();

        let mut m = Manifest::new();
        m.upsert(computed("/optimized/portraits/a.jpg", 1, 1));
        m.upsert(computed("/optimized/portraits/gone.jpg", 1, 1));
        assert_eq!(
            m.missing_assets(tmp.path()),
            vec!["/optimized/portraits/gone.jpg"]
        );
    }

    #[test]
    fn check_reports_both_violations() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("optimized/hero")).unwrap();
        fs::write(tmp.path().join("optimized/hero/a.jpg"), "x").unwrap();

        let a = ManifestEntry::from_parts(
            computed("/optimized/hero/a.jpg", 1, 1),
            CuratedFields::default(),
        );
        let gone = ManifestEntry::from_parts(
            computed("/optimized/hero/gone.jpg", 1, 1),
            CuratedFields::default(),
        );
        let report = check(
            &Manifest::from_entries(vec![a.clone(), a.clone(), gone]),
            tmp.path(),
        );
        assert!(!report.is_ok());
        assert_eq!(report.entries, 3);
        assert_eq!(report.duplicate_srcs, vec!["/optimized/hero/a.jpg"]);
        assert_eq!(report.missing_assets, vec!["/optimized/hero/gone.jpg"]);

        assert!(check(&Manifest::from_entries(vec![a]), tmp.path()).is_ok());
    }

    #[test]
    fn load_missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load(&tmp.path().join("images.manifest.json")).unwrap().is_none());
    }

    #[test]
    fn load_corrupt_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("images.manifest.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load(&path), Err(ManifestError::Parse { .. })));
    }

    #[test]
    fn load_object_instead_of_array_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("images.manifest.json");
        fs::write(&path, r#"{"src": "/a.jpg"}"#).unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn load_or_empty_degrades() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("images.manifest.json");
        assert!(load_or_empty(&path).is_empty());
        fs::write(&path, "garbage").unwrap();
        assert!(load_or_empty(&path).is_empty());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("public/images.manifest.json");

        let mut m = Manifest::new();
        m.upsert(computed("/optimized/portraits/a.jpg", 3, 4));
        save(&path, &m).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded, m);
        assert!(loaded.get("/optimized/portraits/a.jpg").is_some());
    }
}
