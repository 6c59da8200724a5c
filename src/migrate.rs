//! Category migration: relocate one category's outputs and rewrite the manifest.
//!
//! ```text
//! optimized/n_p/eunice.jpg          ──move──▶  optimized/portraits/eunice.jpg
//! { src: /optimized/n_p/eunice.jpg,            { src: /optimized/portraits/eunice.jpg,
//!   category: n_p,                   ──────▶     category: portraits,
//!   original: /n_p/eunice.jpg }                  original: /portraits/eunice.jpg }
//! ```
//!
//! ## Steps
//!
//! 1. Load the manifest strictly. A parse failure aborts before anything is
//!    touched; a missing manifest means there is nothing to rewrite.
//! 2. Move every regular file directly inside `<output_dir>/<from>/` into
//!    `<output_dir>/<to>/` with [`move_with_fallback`]. A file that cannot be
//!    moved is logged and left in place; the others still move.
//! 3. Remove `<output_dir>/<from>/` only if it is now empty.
//! 4. Rewrite matching entries ([`rewrite_entries`]) and replace the manifest
//!    in one atomic write, only if something changed. Entries whose file is
//!    still under `<from>/` after step 2 are left as they are, so every `src`
//!    keeps pointing at a real file. A relocated entry that lands on a `src`
//!    already present in `<to>` replaces that entry.
//!
//! Running the same migration twice is a no-op the second time.

use crate::cache::hash_file;
use crate::config::PipelineConfig;
use crate::fsio::write_atomic;
use crate::manifest::{self, Manifest, ManifestError};
use crate::naming;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Invalid category {0:?}: expected a lowercase slug")]
    InvalidCategory(String),
    #[error("Source and destination are both {0:?}")]
    SameCategory(String),
    #[error("Cannot create destination directory {path}: {source}")]
    DestinationDir { path: PathBuf, source: io::Error },
    #[error("Cannot list {path}: {source}")]
    ListDir { path: PathBuf, source: io::Error },
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

/// How a file reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Renamed,
    /// Rename was refused; the file was copied, verified and the source deleted.
    Copied,
}

/// What happened to the source directory after the moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDirOutcome {
    Removed,
    /// Not empty after the moves; the remaining names are listed.
    Kept(Vec<String>),
    Missing,
}

/// Progress events, one per file plus directory and manifest outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrateEvent {
    Moved { name: String, method: MoveMethod },
    MoveFailed { name: String, error: String },
    SourceDir(SourceDirOutcome),
    ManifestRewritten { entries: usize },
    ManifestUnchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub from: String,
    pub to: String,
    pub moved: Vec<(String, MoveMethod)>,
    pub failed: Vec<(String, String)>,
    pub source_dir: SourceDirOutcome,
    /// Manifest entries with at least one field rewritten.
    pub entries_rewritten: usize,
    /// `src` of entries in `<to>` replaced by a relocated entry.
    pub entries_superseded: Vec<String>,
    /// `src` of entries not rewritten because their file did not move.
    pub entries_left_behind: Vec<String>,
    pub manifest_written: bool,
}

/// Outcome of [`rewrite_entries`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rewrite {
    /// Entries with at least one field rewritten.
    pub changed: usize,
    /// New `src` values that replaced an entry already present there.
    pub superseded: Vec<String>,
}

/// Move `src` to `dest`, falling back to copy-verify-delete.
///
/// `rename` is tried first. If it fails because the paths are on different
/// filesystems or the destination exists, the bytes are copied to `dest`
/// atomically, the copy is checked against the source by SHA-256, and only
/// then is `src` removed. Any other rename error is returned unchanged.
pub fn move_with_fallback(
    src: &Path,
    dest: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> io::Result<MoveMethod> {
    match rename(src, dest) {
        Ok(()) => Ok(MoveMethod::Renamed),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::CrossesDevices | io::ErrorKind::AlreadyExists
            ) =>
        {
            let bytes = std::fs::read(src)?;
            write_atomic(dest, &bytes)?;
            if hash_file(src)? != hash_file(dest)? {
                return Err(io::Error::other(format!(
                    "copy of {} does not match its source",
                    src.display()
                )));
            }
            std::fs::remove_file(src)?;
            Ok(MoveMethod::Copied)
        }
        Err(e) => Err(e),
    }
}

/// Rewrite every entry that belongs to category `from` so it belongs to `to`.
///
/// - `src` starting with `<prefix>/<from>/` gets the `<prefix>/<to>/` prefix
/// - `category == from` becomes `to`
/// - the first `/<from>/` segment of `original` becomes `/<to>/`
///
/// Entries whose `src` is in `left_behind` are not touched at all.
///
/// When a relocated entry's new `src` is already taken by another entry, the
/// relocated entry takes that entry's position and the old one is dropped.
/// Curated fields the relocated entry lacks are filled from the dropped one.
pub fn rewrite_entries(
    manifest: &mut Manifest,
    output_prefix: &str,
    from: &str,
    to: &str,
    left_behind: &HashSet<String>,
) -> Rewrite {
    let old_src = format!("{}/{}/", output_prefix, from);
    let new_src = format!("{}/{}/", output_prefix, to);
    let old_segment = format!("/{}/", from);
    let new_segment = format!("/{}/", to);

    let mut rewrite = Rewrite::default();
    let mut entries = manifest.entries_mut();
    let mut relocated = vec![false; entries.len()];
    for (i, entry) in entries.iter_mut().enumerate() {
        if left_behind.contains(&entry.src) {
            continue;
        }
        let mut touched = false;
        if let Some(rest) = entry.src.strip_prefix(&old_src) {
            entry.src = format!("{}{}", new_src, rest);
            relocated[i] = true;
            touched = true;
        }
        if entry.category == from {
            entry.category = to.to_string();
            touched = true;
        }
        if entry.original.contains(&old_segment) {
            entry.original = entry.original.replacen(&old_segment, &new_segment, 1);
            touched = true;
        }
        if touched {
            rewrite.changed += 1;
        }
    }

    let mut resident: HashMap<String, usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if !relocated[i] {
            resident.entry(entry.src.clone()).or_insert(i);
        }
    }

    let mut dropped = vec![false; entries.len()];
    for i in 0..entries.len() {
        if !relocated[i] {
            continue;
        }
        let Some(&j) = resident.get(&entries[i].src) else {
            continue;
        };
        let mut moved = entries[i].clone();
        moved.fill_curated_from(&entries[j]);
        info!(src = %moved.src, "relocated entry replaces existing entry");
        rewrite.superseded.push(moved.src.clone());
        entries[j] = moved;
        dropped[i] = true;
    }

    let mut position = 0;
    entries.retain(|_| {
        let keep = !dropped[position];
        position += 1;
        keep
    });
    rewrite
}

/// Migrate category `from` to `to`. See the [module docs](self).
pub fn migrate(
    config: &PipelineConfig,
    from: &str,
    to: &str,
    sender: Option<Sender<MigrateEvent>>,
) -> Result<MigrationReport, MigrateError> {
    migrate_with(config, from, to, sender, |a, b| std::fs::rename(a, b))
}

fn migrate_with(
    config: &PipelineConfig,
    from: &str,
    to: &str,
    sender: Option<Sender<MigrateEvent>>,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> Result<MigrationReport, MigrateError> {
    for name in [from, to] {
        if name.is_empty() || naming::slugify(name) != name {
            return Err(MigrateError::InvalidCategory(name.to_string()));
        }
    }
    if from == to {
        return Err(MigrateError::SameCategory(from.to_string()));
    }

    let emit = |event: MigrateEvent| {
        if let Some(tx) = &sender {
            tx.send(event).ok();
        }
    };

    // Strict load before any file moves
    let manifest_path = config.manifest_path();
    let prior = manifest::load(&manifest_path)?;

    let output_root = config.output_root();
    let from_dir = output_root.join(from);
    let to_dir = output_root.join(to);

    let mut report = MigrationReport {
        from: from.to_string(),
        to: to.to_string(),
        moved: Vec::new(),
        failed: Vec::new(),
        source_dir: SourceDirOutcome::Missing,
        entries_rewritten: 0,
        entries_superseded: Vec::new(),
        entries_left_behind: Vec::new(),
        manifest_written: false,
    };

    if from_dir.is_dir() {
        std::fs::create_dir_all(&to_dir).map_err(|source| MigrateError::DestinationDir {
            path: to_dir.clone(),
            source,
        })?;

        for (name, path) in list_files(&from_dir)? {
            let dest = to_dir.join(&name);
            match move_with_fallback(&path, &dest, &rename) {
                Ok(method) => {
                    info!(file = %name, ?method, "moved");
                    emit(MigrateEvent::Moved {
                        name: name.clone(),
                        method,
                    });
                    report.moved.push((name, method));
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "move failed, leaving file in place");
                    emit(MigrateEvent::MoveFailed {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        report.source_dir = remove_if_empty(&from_dir);
        emit(MigrateEvent::SourceDir(report.source_dir.clone()));
    }

    if let Some(mut manifest) = prior {
        let prefix = config.output_prefix();
        let site_root = config.site_root();

        let old_src = format!("{}/{}/", prefix, from);
        let left_behind: Vec<String> = manifest
            .entries()
            .iter()
            .filter(|e| {
                e.src.starts_with(&old_src)
                    && manifest::served_path_to_fs(&site_root, &e.src).is_file()
            })
            .map(|e| e.src.clone())
            .collect();
        for src in &left_behind {
            warn!(src = %src, "file was not moved, entry left unchanged");
        }

        let skip: HashSet<String> = left_behind.iter().cloned().collect();
        let rewrite = rewrite_entries(&mut manifest, &prefix, from, to, &skip);
        report.entries_rewritten = rewrite.changed;
        report.entries_superseded = rewrite.superseded;
        report.entries_left_behind = left_behind;

        if report.entries_rewritten > 0 {
            for src in manifest.missing_assets(&site_root) {
                warn!(src, "manifest entry has no asset on disk");
            }
            manifest::save(&manifest_path, &manifest)?;
            report.manifest_written = true;
        }
    }
    emit(if report.manifest_written {
        MigrateEvent::ManifestRewritten {
            entries: report.entries_rewritten,
        }
    } else {
        MigrateEvent::ManifestUnchanged
    });

    Ok(report)
}

/// Regular files directly inside `dir`, sorted by name.
fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, MigrateError> {
    let list_err = |source| MigrateError::ListDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

fn remove_if_empty(dir: &Path) -> SourceDirOutcome {
    let mut remaining: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => return SourceDirOutcome::Missing,
    };
    if remaining.is_empty() {
        match std::fs::remove_dir(dir) {
            Ok(()) => return SourceDirOutcome::Removed,
            Err(e) => warn!(dir = %dir.display(), error = %e, "cannot remove empty directory"),
        }
    } else {
        remaining.sort();
        warn!(dir = %dir.display(), ?remaining, "directory not empty, leaving it in place");
    }
    SourceDirOutcome::Kept(remaining)
}
