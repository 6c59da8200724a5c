//! # gallery-prep
//!
//! Image preparation pipeline for a photography website. Source photos live
//! in category directories; the pipeline turns them into web-ready JPEGs and
//! a JSON manifest the site reads at runtime.
//!
//! # Architecture: One Pipeline, One Shared Document
//!
//! ```text
//! scan      public/<category>/**     →  SourceImage list      (read-only)
//! naming    "Jane 1.png"             →  "jane-1.jpg"
//! imaging   source                   →  optimized/<category>/<slug>.jpg + blur preview
//! process   per-image results        →  images.manifest.json  (replace or upsert)
//! migrate   optimized/<a>/ + manifest →  optimized/<b>/ + rewritten manifest
//! ```
//!
//! Every tool follows the same discipline on the manifest: load the whole
//! document, compute the whole next document in memory, replace the file
//! atomically. The manifest is the only state that survives between runs
//! apart from the output images and the processing cache.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Discovers sources by extension and size limit; category = directory name |
//! | [`naming`] | Canonical slugs and output filenames |
//! | [`imaging`] | Decode, EXIF orientation, long-edge fit, JPEG encode, inline placeholders |
//! | [`manifest`] | Entry model, strict and lenient loading, atomic save, upsert |
//! | [`process`] | Full-replacement ([`process::prepare`]) and upsert ([`process::reprocess`]) runs |
//! | [`migrate`] | Moves a category's outputs and rewrites the manifest |
//! | [`cache`] | Content-addressed cache that skips unchanged transcodes |
//! | [`config`] | `gallery-prep.toml` loading, env overrides, validation |
//! | [`fsio`] | Atomic file replacement |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Computed vs. Curated Fields
//!
//! `alt` and `tags` are written by a person after the fact. No run ever
//! regenerates them: upserts keep them, full runs carry them over by `src`,
//! migrations rewrite paths around them.
//!
//! ## Deterministic Output
//!
//! Same source bytes and same settings give byte-identical JPEGs. The
//! processing cache relies on this, and so does the recovery story: a run
//! killed halfway is fixed by running it again.
//!
//! ## One Bad File Never Stops a Batch
//!
//! Corrupt sources, oversized sources and failed placeholders are logged and
//! reported; the rest of the batch carries on. Only failures that would leave
//! the manifest inconsistent abort a run.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate for decoding and resampling
//! and `jpeg-encoder` for progressive JPEG output. No system libraries, so
//! the binary runs anywhere it compiles.

pub mod cache;
pub mod config;
pub mod fsio;
pub mod imaging;
pub mod manifest;
pub mod migrate;
pub mod naming;
pub mod output;
pub mod process;
pub mod scan;

#[cfg(test)]
pub(crate) mod test_helpers;
