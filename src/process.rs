//! Manifest builder: transcode sources and assemble the manifest.
//!
//! Two entry points share one per-image pipeline:
//!
//! | Mode | Entry point | Inputs | Manifest write |
//! |---|---|---|---|
//! | Full replacement | [`prepare`] | every configured input directory | new manifest replaces the old one |
//! | Upsert | [`reprocess`] | files already in `<output_dir>/<category>/` | prior manifest updated by `src` |
//!
//! Per image:
//!
//! ```text
//! source ──transcode──▶ optimized/<category>/<slug>.jpg
//!                             │
//!                             ├──identify──▶ width, height     (0×0 if unreadable)
//!                             └──preview───▶ blurDataURL       ("" on failure)
//! ```
//!
//! ## Failure policy
//!
//! A source that cannot be decoded or encoded is reported in
//! [`ProcessResult::failures`] and left out of the manifest; the batch always
//! continues. Only failures that would leave the manifest inconsistent (the
//! output directory cannot be created, the manifest cannot be written) are
//! returned as [`ProcessError`].
//!
//! ## Slug collisions
//!
//! Two sources that map to the same `src` in one run are resolved
//! last-write-wins in scan order before any work starts, so parallel workers
//! never race on one output file. The dropped source is logged and listed in
//! [`ProcessResult::collisions`].
//!
//! ## Cache decisions
//!
//! In a full run every source is hashed and looked up in the processing cache
//! before any output is written. A job reuses an output only if no other job
//! of the run writes that path; otherwise it encodes. Two sources that traded
//! contents, or a renamed source whose old name now holds a new photo, are
//! therefore encoded rather than fed each other's output.
//!
//! ## Parallel Processing
//!
//! Images are processed in parallel using [rayon](https://docs.rs/rayon).
//! Results are collected in scan order, so the manifest order does not depend
//! on scheduling. Progress events are sent from the workers as each image
//! finishes; the manifest itself is written once, from the calling thread.

use crate::cache::{self, CacheStats, ContentKey, ProcessingCache};
use crate::config::PipelineConfig;
use crate::fsio::write_atomic;
use crate::imaging::{
    BackendError, ImageBackend, PlaceholderConfig, Quality, TranscodeConfig, create_placeholder,
    get_dimensions, transcode_image,
};
use crate::manifest::{self, ComputedFields, Manifest, ManifestError};
use crate::naming;
use crate::scan::{self, SkippedFile, SourceImage};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("Invalid category {0:?}: expected a lowercase slug")]
    InvalidCategory(String),
}

/// How an output file came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStatus {
    /// Output already on disk from an earlier run with the same source and params.
    Cached,
    /// Reused an earlier output stored under another path.
    Copied,
    Encoded,
}

/// Progress events, sent as images finish.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    CategoryStarted {
        category: String,
        image_count: usize,
    },
    ImageProcessed {
        /// 1-based position within the category, in scan order.
        index: usize,
        original: String,
        src: String,
        width: u32,
        height: u32,
        has_placeholder: bool,
        status: EncodeStatus,
    },
    ImageFailed {
        index: usize,
        original: String,
        error: String,
    },
}

/// A source that produced no manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFailure {
    pub original: String,
    pub error: String,
}

/// Two sources that normalized to the same `src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugCollision {
    pub src: String,
    /// The later source, whose output is kept.
    pub kept: String,
    pub dropped: String,
}

/// Outcome of a run. The manifest has already been written when this is returned.
#[derive(Debug)]
pub struct ProcessResult {
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
    pub processed: usize,
    pub failures: Vec<ImageFailure>,
    pub skipped: Vec<SkippedFile>,
    pub collisions: Vec<SlugCollision>,
    pub cache_stats: CacheStats,
}

/// One unit of work: one source, one output.
#[derive(Debug, Clone)]
struct Job {
    index: usize,
    image: SourceImage,
    output: PathBuf,
    /// Output path relative to the output root; the cache key.
    output_key: String,
    src: String,
    plan: OutputPlan,
    /// Source hash and encode settings. Unset in `reprocess`.
    content_key: Option<ContentKey>,
}

/// How a job produces its output, decided before any job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputPlan {
    Encode,
    /// The output already holds this source's encoding.
    Keep,
    /// Copy the encoding stored at this path, relative to the output root.
    CopyFrom(String),
}

/// Jobs of one category, sharing encode settings.
#[derive(Debug)]
struct CategoryJobs {
    category: String,
    transcode: TranscodeConfig,
    jobs: Vec<Job>,
}

/// Settings shared by every job in a run.
struct RunSettings<'a> {
    output_root: &'a Path,
    placeholder: PlaceholderConfig,
    sender: Option<&'a Sender<ProcessEvent>>,
}

struct Processed {
    computed: ComputedFields,
    status: EncodeStatus,
    /// Content key and output hash to record in the cache.
    cache_entry: Option<(ContentKey, String)>,
    output_key: String,
}

/// Full-replacement run over every configured input directory.
///
/// The new manifest holds exactly one entry per successfully processed
/// source; entries whose source disappeared are dropped. Curated fields are
/// carried over from the previous manifest when it can be read.
///
/// With `use_cache`, sources whose bytes and encode parameters match the
/// processing cache are not re-encoded.
pub fn prepare(
    backend: &impl ImageBackend,
    config: &PipelineConfig,
    use_cache: bool,
    sender: Option<Sender<ProcessEvent>>,
) -> Result<ProcessResult, ProcessError> {
    let site_root = config.site_root();
    let output_root = config.output_root();
    let manifest_path = config.manifest_path();

    let scanned = scan::scan(&site_root, &config.categories, config.scan.max_input_bytes);
    info!(
        images = scanned.image_count(),
        skipped = scanned.skipped.len(),
        "scan complete"
    );

    let mut planned: Vec<CategoryJobs> = scanned
        .categories
        .into_iter()
        .map(|c| CategoryJobs {
            transcode: transcode_config(config, &c.category),
            jobs: plan_jobs(&output_root, &config.output_prefix(), &c.category, c.images),
            category: c.category,
        })
        .collect();
    let collisions = drop_collisions(&mut planned);

    let cache = if use_cache {
        ProcessingCache::load(&output_root)
    } else {
        ProcessingCache::new()
    };

    plan_outputs(&mut planned, &cache, &output_root);

    let settings = RunSettings {
        output_root: &output_root,
        placeholder: placeholder_config(config),
        sender: sender.as_ref(),
    };
    let (processed, failures) = run_categories(backend, &planned, &settings)?;

    let mut next = Manifest::new();
    let mut cache = cache;
    let mut stats = CacheStats::default();
    let mut outputs = Vec::with_capacity(processed.len());
    for p in processed {
        match p.status {
            EncodeStatus::Cached => stats.hits += 1,
            EncodeStatus::Copied => stats.copies += 1,
            EncodeStatus::Encoded => stats.misses += 1,
        }
        if let Some((key, output_hash)) = p.cache_entry {
            cache.record(p.output_key.clone(), key, output_hash);
        }
        outputs.push(p.output_key);
        next.upsert(p.computed);
    }

    let prior = match manifest::load(&manifest_path) {
        Ok(m) => m.unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "previous manifest unreadable, curated fields start empty");
            Manifest::new()
        }
    };
    next.carry_curated_from(&prior);

    warn_missing_assets(&next, &site_root);
    manifest::save(&manifest_path, &next)?;

    cache.retain_outputs(&outputs);
    if let Err(e) = cache.save(&output_root) {
        warn!(error = %e, "failed to save processing cache");
    }

    Ok(ProcessResult {
        processed: next.len(),
        manifest: next,
        manifest_path,
        failures,
        skipped: scanned.skipped,
        collisions,
        cache_stats: stats,
    })
}

/// Upsert run over the already-transcoded files of one category.
///
/// Every image under `<output_dir>/<category>/` is re-encoded to its
/// canonical output path and upserted into the existing manifest by `src`.
/// `alt`/`tags` of existing entries are preserved; entries of other
/// categories are untouched. An unreadable manifest counts as empty.
///
/// When a file's canonical output differs from the file itself (a `.png`
/// becomes `.jpg`), the superseded file is removed once the output exists.
pub fn reprocess(
    backend: &impl ImageBackend,
    config: &PipelineConfig,
    category: &str,
    sender: Option<Sender<ProcessEvent>>,
) -> Result<ProcessResult, ProcessError> {
    if category.is_empty() || naming::slugify(category) != category {
        return Err(ProcessError::InvalidCategory(category.to_string()));
    }

    let site_root = config.site_root();
    let output_root = config.output_root();
    let manifest_path = config.manifest_path();
    let prefix = config.output_prefix();

    let dir = output_root.join(category);
    let served_base = format!("{}/{}", prefix, category);
    let (images, skipped) =
        scan::scan_dir(&dir, category, &served_base, config.scan.max_input_bytes);
    info!(category, images = images.len(), "reprocessing");

    let mut planned = vec![CategoryJobs {
        category: category.to_string(),
        transcode: transcode_config(config, category),
        jobs: plan_jobs(&output_root, &prefix, category, images),
    }];
    let collisions = drop_collisions(&mut planned);

    let mut manifest = match manifest::load(&manifest_path) {
        Ok(m) => m.unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "manifest unreadable, starting from an empty collection");
            Manifest::new()
        }
    };

    let settings = RunSettings {
        output_root: &output_root,
        placeholder: placeholder_config(config),
        sender: sender.as_ref(),
    };
    let (processed, failures) = run_categories(backend, &planned, &settings)?;

    let count = processed.len();
    let stats = CacheStats {
        misses: count as u32,
        ..CacheStats::default()
    };
    for p in processed {
        manifest.upsert(p.computed);
    }

    for job in planned.iter().flat_map(|c| &c.jobs) {
        let done = !failures.iter().any(|f| f.original == job.image.original);
        if done && job.image.path != job.output {
            remove_superseded(&job.image.path);
        }
    }

    warn_missing_assets(&manifest, &site_root);
    manifest::save(&manifest_path, &manifest)?;

    Ok(ProcessResult {
        manifest,
        manifest_path,
        processed: count,
        failures,
        skipped,
        collisions,
        cache_stats: stats,
    })
}

fn transcode_config(config: &PipelineConfig, category: &str) -> TranscodeConfig {
    TranscodeConfig {
        long_edge: config.long_edge_for(category),
        quality: Quality::new(config.images.quality),
    }
}

fn placeholder_config(config: &PipelineConfig) -> PlaceholderConfig {
    PlaceholderConfig {
        long_edge: config.placeholder.edge,
        quality: Quality::new(config.placeholder.quality),
        max_bytes: config.placeholder.max_bytes,
    }
}

/// Map each source to its output path and served `src`.
fn plan_jobs(
    output_root: &Path,
    output_prefix: &str,
    category: &str,
    images: Vec<SourceImage>,
) -> Vec<Job> {
    images
        .into_iter()
        .enumerate()
        .map(|(i, image)| {
            let filename = naming::output_filename(&image.path);
            Job {
                index: i + 1,
                output: output_root.join(category).join(&filename),
                output_key: format!("{}/{}", category, filename),
                src: format!("{}/{}/{}", output_prefix, category, filename),
                image,
                plan: OutputPlan::Encode,
                content_key: None,
            }
        })
        .collect()
}

/// Keep only the last job for each `src`, in scan order across categories.
fn drop_collisions(planned: &mut [CategoryJobs]) -> Vec<SlugCollision> {
    let mut last: HashMap<String, String> = HashMap::new();
    for job in planned.iter().flat_map(|c| &c.jobs) {
        last.insert(job.src.clone(), job.image.original.clone());
    }

    let mut collisions = Vec::new();
    for category in planned.iter_mut() {
        category.jobs.retain(|job| {
            let kept = &last[&job.src];
            if *kept == job.image.original {
                return true;
            }
            warn!(
                src = %job.src,
                kept = %kept,
                dropped = %job.image.original,
                "slug collision, later source wins"
            );
            collisions.push(SlugCollision {
                src: job.src.clone(),
                kept: kept.clone(),
                dropped: job.image.original.clone(),
            });
            false
        });
    }
    collisions
}

/// Hash every source and decide from the cache how its output is produced.
///
/// A cached output at a path some job of this run writes is not reused:
/// it may be overwritten before the copy is made.
fn plan_outputs(planned: &mut [CategoryJobs], cache: &ProcessingCache, output_root: &Path) {
    let live: HashSet<String> = planned
        .iter()
        .flat_map(|c| &c.jobs)
        .map(|job| job.output_key.clone())
        .collect();

    for category in planned.iter_mut() {
        let params_hash = cache::settings_hash(
            category.transcode.long_edge,
            category.transcode.quality.value(),
        );
        category.jobs.par_iter_mut().for_each(|job| {
            let key = match cache::hash_file(&job.image.path) {
                Ok(source) => ContentKey::new(source, params_hash.as_str()),
                Err(e) => {
                    debug!(source = %job.image.path.display(), error = %e, "cannot hash source");
                    return;
                }
            };
            job.plan = match cache.lookup(&key, output_root) {
                Some(stored) if stored == job.output_key => OutputPlan::Keep,
                Some(stored) if live.contains(stored) => {
                    debug!(
                        output = %job.output_key,
                        from = %stored,
                        "cached output is rewritten this run"
                    );
                    OutputPlan::Encode
                }
                Some(stored) => OutputPlan::CopyFrom(stored.to_string()),
                None => OutputPlan::Encode,
            };
            job.content_key = Some(key);
        });
    }
}

/// Process every category in order. Returns successes and failures, both in
/// scan order.
fn run_categories(
    backend: &impl ImageBackend,
    planned: &[CategoryJobs],
    settings: &RunSettings<'_>,
) -> Result<(Vec<Processed>, Vec<ImageFailure>), ProcessError> {
    let mut processed = Vec::new();
    let mut failures = Vec::new();

    for category in planned {
        if category.jobs.is_empty() {
            continue;
        }
        let dir = settings.output_root.join(&category.category);
        std::fs::create_dir_all(&dir).map_err(|source| ProcessError::OutputDir {
            path: dir.clone(),
            source,
        })?;

        if let Some(tx) = settings.sender {
            tx.send(ProcessEvent::CategoryStarted {
                category: category.category.clone(),
                image_count: category.jobs.len(),
            })
            .ok();
        }

        let results: Vec<Result<Processed, ImageFailure>> = category
            .jobs
            .par_iter()
            .map(|job| {
                let result = process_job(
                    backend,
                    job,
                    &category.category,
                    &category.transcode,
                    settings,
                );
                if let Some(tx) = settings.sender {
                    tx.send(job_event(job, &result)).ok();
                }
                result
            })
            .collect();

        for result in results {
            match result {
                Ok(p) => processed.push(p),
                Err(f) => failures.push(f),
            }
        }
    }

    Ok((processed, failures))
}

fn job_event(job: &Job, result: &Result<Processed, ImageFailure>) -> ProcessEvent {
    match result {
        Ok(p) => ProcessEvent::ImageProcessed {
            index: job.index,
            original: p.computed.original.clone(),
            src: p.computed.src.clone(),
            width: p.computed.width,
            height: p.computed.height,
            has_placeholder: !p.computed.blur_data_url.is_empty(),
            status: p.status,
        },
        Err(f) => ProcessEvent::ImageFailed {
            index: job.index,
            original: f.original.clone(),
            error: f.error.clone(),
        },
    }
}

/// Run one image through transcode, identify and preview.
fn process_job(
    backend: &impl ImageBackend,
    job: &Job,
    category: &str,
    transcode: &TranscodeConfig,
    settings: &RunSettings<'_>,
) -> Result<Processed, ImageFailure> {
    let status = encode_or_reuse(backend, job, transcode, settings.output_root).map_err(|e| {
        warn!(source = %job.image.path.display(), error = %e, "failed to process image");
        ImageFailure {
            original: job.image.original.clone(),
            error: e.to_string(),
        }
    })?;

    let cache_entry = job
        .content_key
        .as_ref()
        .and_then(|key| match cache::hash_file(&job.output) {
            Ok(output_hash) => Some((key.clone(), output_hash)),
            Err(e) => {
                debug!(output = %job.output.display(), error = %e, "cannot hash output");
                None
            }
        });

    let (width, height) = get_dimensions(backend, &job.output).unwrap_or_else(|e| {
        warn!(output = %job.output.display(), error = %e, "cannot read output dimensions");
        (0, 0)
    });

    let blur_data_url = create_placeholder(backend, &job.output, &settings.placeholder)
        .unwrap_or_else(|e| {
            warn!(output = %job.output.display(), error = %e, "placeholder generation failed");
            String::new()
        });

    Ok(Processed {
        computed: ComputedFields {
            original: job.image.original.clone(),
            src: job.src.clone(),
            width,
            height,
            blur_data_url,
            category: category.to_string(),
        },
        status,
        cache_entry,
        output_key: job.output_key.clone(),
    })
}

/// Produce the output file the way the job's plan says. A failed copy
/// falls back to encoding.
fn encode_or_reuse(
    backend: &impl ImageBackend,
    job: &Job,
    transcode: &TranscodeConfig,
    output_root: &Path,
) -> Result<EncodeStatus, BackendError> {
    match &job.plan {
        OutputPlan::Keep => return Ok(EncodeStatus::Cached),
        OutputPlan::CopyFrom(stored) => {
            match copy_output(&output_root.join(stored), &job.output) {
                Ok(()) => return Ok(EncodeStatus::Copied),
                Err(e) => debug!(from = %stored, error = %e, "cache copy failed, re-encoding"),
            }
        }
        OutputPlan::Encode => {}
    }

    transcode_image(backend, &job.image.path, &job.output, transcode)?;
    Ok(EncodeStatus::Encoded)
}

fn copy_output(from: &Path, to: &Path) -> std::io::Result<()> {
    let bytes = std::fs::read(from)?;
    write_atomic(to, &bytes)
}

fn remove_superseded(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "removed superseded source"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "cannot remove superseded source"),
    }
}

fn warn_missing_assets(manifest: &Manifest, site_root: &Path) {
    for src in manifest.missing_assets(site_root) {
        warn!(src, "manifest entry has no asset on disk");
    }
}
