//! Input discovery.
//!
//! Expands the paths given on the command line into a deduplicated, sorted
//! snapshot of document files. Directories are walked with `walkdir` and
//! filtered by the `[extraction]` include/exclude globs (matched against the
//! path relative to the directory, case-insensitively). Files named
//! explicitly are taken as-is; unsupported ones are skipped later by the
//! pipeline with a reason.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::ExtractionConfig;
use crate::error::{Error, ExtractError, Result};

pub fn discover(inputs: &[PathBuf], config: &ExtractionConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/.*/**".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    for input in inputs {
        let meta = std::fs::metadata(input)
            .map_err(|_| Error::MetadataExtraction(ExtractError::NotFound(input.clone())))?;
        if meta.is_file() {
            files.push(input.clone());
            continue;
        }

        let mut walker = WalkDir::new(input).follow_links(config.follow_symlinks);
        if !config.recursive {
            walker = walker.max_depth(1);
        }
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(input).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }
            files.push(path.to_path_buf());
        }
    }

    // Snapshot: one entry per file, deterministic order
    let mut files: Vec<PathBuf> = files.into_iter().map(|p| normalize(&p)).collect();
    files.sort();
    files.dedup();
    tracing::debug!(count = files.len(), "discovered input files");
    Ok(files)
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Configuration(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Configuration(format!("invalid glob set: {}", e)))
}
