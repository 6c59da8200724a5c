//! CLI output formatting for every command.
//!
//! # Information-First Display
//!
//! Each image leads with its positional index and served path (`src`), the
//! identity consumers see. The source file and outcome follow as indented
//! context lines, so the output reads as an inventory of what the site will
//! serve while still letting the operator trace entries back to files.
//!
//! # Output Format
//!
//! ## Prepare / reprocess
//!
//! ```text
//! hero (2 photos)
//!     001 /optimized/hero/dawn.jpg
//!         Source: /hero/Dawn.JPG
//!         3840x2560, encoded
//!     002 FAILED /hero/broken.jpg
//!         Error: Processing failed: Failed to decode ...
//!
//! Skipped (over size limit)
//!     /site/hero/huge.tif (181 MB)
//!
//! Manifest: 1 entry → public/images.manifest.json
//! Cache: 0 cached, 1 encoded (1 total)
//! 1 failed
//! ```
//!
//! ## Migrate
//!
//! ```text
//! Moved eunice.jpg
//! Moved jane.jpg (copied)
//! Removed empty directory
//! Manifest: 2 entries rewritten
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::manifest::CheckReport;
use crate::migrate::{MigrateEvent, MigrationReport, MoveMethod, SourceDirOutcome};
use crate::process::{EncodeStatus, ProcessEvent, ProcessResult};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `count` followed by the singular or plural noun.
fn plural(count: usize, one: &str, many: &str) -> String {
    format!("{} {}", count, if count == 1 { one } else { many })
}

fn status_label(status: EncodeStatus) -> &'static str {
    match status {
        EncodeStatus::Cached => "cached",
        EncodeStatus::Copied => "copied",
        EncodeStatus::Encoded => "encoded",
    }
}

// ============================================================================
// Prepare / reprocess
// ============================================================================

/// Format a single process progress event as display lines.
pub fn format_process_event(event: &ProcessEvent) -> Vec<String> {
    match event {
        ProcessEvent::CategoryStarted {
            category,
            image_count,
        } => vec![format!(
            "{} ({})",
            category,
            plural(*image_count, "photo", "photos")
        )],
        ProcessEvent::ImageProcessed {
            index,
            original,
            src,
            width,
            height,
            has_placeholder,
            status,
        } => {
            let mut detail = format!("{}x{}, {}", width, height, status_label(*status));
            if !has_placeholder {
                detail.push_str(", no placeholder");
            }
            vec![
                format!("{}{} {}", indent(1), format_index(*index), src),
                format!("{}Source: {}", indent(2), original),
                format!("{}{}", indent(2), detail),
            ]
        }
        ProcessEvent::ImageFailed {
            index,
            original,
            error,
        } => vec![
            format!("{}{} FAILED {}", indent(1), format_index(*index), original),
            format!("{}Error: {}", indent(2), error),
        ],
    }
}

/// Format the end-of-run summary: skipped files, collisions, totals.
pub fn format_process_summary(result: &ProcessResult) -> Vec<String> {
    let mut lines = Vec::new();

    if !result.skipped.is_empty() {
        lines.push(String::new());
        lines.push("Skipped (over size limit)".to_string());
        for file in &result.skipped {
            lines.push(format!(
                "{}{} ({} MB)",
                indent(1),
                file.path.display(),
                file.size / 1_000_000
            ));
        }
    }

    if !result.collisions.is_empty() {
        lines.push(String::new());
        lines.push("Slug collisions (later source kept)".to_string());
        for c in &result.collisions {
            lines.push(format!("{}{}", indent(1), c.src));
            lines.push(format!("{}kept: {}", indent(2), c.kept));
            lines.push(format!("{}dropped: {}", indent(2), c.dropped));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "Manifest: {} \u{2192} {}",
        plural(result.manifest.len(), "entry", "entries"),
        result.manifest_path.display()
    ));
    lines.push(format!("Cache: {}", result.cache_stats));
    if !result.failures.is_empty() {
        lines.push(format!("{} failed", result.failures.len()));
    }
    lines
}

/// Print the process summary to stdout.
pub fn print_process_summary(result: &ProcessResult) {
    for line in format_process_summary(result) {
        println!("{}", line);
    }
}

// ============================================================================
// Migrate
// ============================================================================

pub fn format_migrate_event(event: &MigrateEvent) -> Vec<String> {
    match event {
        MigrateEvent::Moved { name, method } => match method {
            MoveMethod::Renamed => vec![format!("Moved {}", name)],
            MoveMethod::Copied => vec![format!("Moved {} (copied)", name)],
        },
        MigrateEvent::MoveFailed { name, error } => vec![
            format!("FAILED {}", name),
            format!("{}Error: {}", indent(1), error),
        ],
        MigrateEvent::SourceDir(outcome) => match outcome {
            SourceDirOutcome::Removed => vec!["Removed empty directory".to_string()],
            SourceDirOutcome::Kept(remaining) => vec![format!(
                "Directory not empty, left in place: {}",
                remaining.join(", ")
            )],
            SourceDirOutcome::Missing => Vec::new(),
        },
        MigrateEvent::ManifestRewritten { entries } => vec![format!(
            "Manifest: {} rewritten",
            plural(*entries, "entry", "entries")
        )],
        MigrateEvent::ManifestUnchanged => vec!["Manifest: no changes needed".to_string()],
    }
}

/// One-line result of a migration.
pub fn format_migration_summary(report: &MigrationReport) -> Vec<String> {
    let mut summary = format!(
        "{} \u{2192} {}: {} moved",
        report.from,
        report.to,
        plural(report.moved.len(), "file", "files")
    );
    if !report.failed.is_empty() {
        summary.push_str(&format!(", {} failed", report.failed.len()));
    }
    let mut lines = vec![summary];
    if !report.entries_superseded.is_empty() {
        lines.push("Replaced existing entries".to_string());
        for src in &report.entries_superseded {
            lines.push(format!("{}{}", indent(1), src));
        }
    }
    if !report.entries_left_behind.is_empty() {
        lines.push("Entries left unchanged (file not moved)".to_string());
        for src in &report.entries_left_behind {
            lines.push(format!("{}{}", indent(1), src));
        }
    }
    lines
}

pub fn print_migration_summary(report: &MigrationReport) {
    for line in format_migration_summary(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

pub fn format_check_report(report: &CheckReport, manifest_path: &Path) -> Vec<String> {
    let mut lines = vec![format!(
        "{}: {}",
        manifest_path.display(),
        plural(report.entries, "entry", "entries")
    )];
    if !report.duplicate_srcs.is_empty() {
        lines.push("Duplicate src".to_string());
        for src in &report.duplicate_srcs {
            lines.push(format!("{}{}", indent(1), src));
        }
    }
    if !report.missing_assets.is_empty() {
        lines.push("Missing assets".to_string());
        for src in &report.missing_assets {
            lines.push(format!("{}{}", indent(1), src));
        }
    }
    if report.is_ok() {
        lines.push("Manifest is valid".to_string());
    }
    lines
}

pub fn print_check_report(report: &CheckReport, manifest_path: &Path) {
    for line in format_check_report(report, manifest_path) {
        println!("{}", line);
    }
}
