//! Reconciliation pipeline orchestration.
//!
//! Coordinates the per-file flow: load → filename + embedded properties →
//! merge/score → content scan (when weak and advanced extraction is on) →
//! cache-checked AI enhancement (when below threshold and enabled) →
//! accept-if-better → synthesize name → rename or dry-run report.
//!
//! Files run as one task each, bounded by a semaphore of
//! `run.max_concurrent` permits. Per-file failures become
//! [`OutcomeStatus::Failed`] outcomes and never abort the batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::cache::{self, Cache};
use crate::config::Config;
use crate::enhance::{build_query, MetadataOracle};
use crate::error::{Error, ErrorKind, ExtractError, FileOpError, Result};
use crate::extract::Document;
use crate::merge::Merger;
use crate::models::{Enhancement, FileOutcome, MergedRecord, OutcomeStatus, RawCandidate};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::{extract_content, extract_filename, extract_properties, naming};

/// Everything a batch run needs. Cheap to clone into per-file tasks.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    oracle: Arc<dyn MetadataOracle>,
    cache: Arc<Cache>,
}

/// Counts per status for the end-of-run report.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub renamed: usize,
    pub dry_run: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub ai_used: usize,
}

impl Summary {
    pub fn from_outcomes(outcomes: &[FileOutcome]) -> Self {
        let mut s = Summary {
            total: outcomes.len(),
            ..Default::default()
        };
        for o in outcomes {
            match o.status {
                OutcomeStatus::Renamed => s.renamed += 1,
                OutcomeStatus::DryRun => s.dry_run += 1,
                OutcomeStatus::Unchanged => s.unchanged += 1,
                OutcomeStatus::Skipped => s.skipped += 1,
                OutcomeStatus::Failed => s.failed += 1,
            }
            if o.enhancement.used_ai() {
                s.ai_used += 1;
            }
        }
        s
    }
}

impl Pipeline {
    pub fn new(config: Config, oracle: Arc<dyn MetadataOracle>, cache: Arc<Cache>) -> Self {
        Self {
            config: Arc::new(config),
            oracle,
            cache,
        }
    }

    /// Process a snapshot of files. Outcomes come back sorted by path.
    pub async fn run_batch(
        &self,
        paths: Vec<PathBuf>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Vec<FileOutcome> {
        let total = paths.len() as u64;
        reporter.report(ProgressEvent::Discovered { total });

        let semaphore = Arc::new(Semaphore::new(self.config.run.max_concurrent.max(1)));
        let done = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::with_capacity(paths.len());

        for path in paths {
            let pipeline = self.clone();
            let semaphore = semaphore.clone();
            let reporter = reporter.clone();
            let done = done.clone();
            let task_path = path.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return FileOutcome::failed(
                            task_path,
                            ErrorKind::FileOperation,
                            "worker pool closed".to_string(),
                        )
                    }
                };
                let outcome = pipeline.process_file(&task_path).await;
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                reporter.report(ProgressEvent::Finished {
                    path: task_path,
                    status: outcome.status,
                    n,
                    total,
                });
                outcome
            });
            handles.push((path, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (path, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "file task aborted");
                    outcomes.push(FileOutcome::failed(
                        path,
                        ErrorKind::MetadataExtraction,
                        format!("task aborted: {}", e),
                    ));
                }
            }
        }
        outcomes.sort_by(|a, b| a.original.cmp(&b.original));
        outcomes
    }

    /// Run the whole pipeline for one file. Never fails: errors are folded
    /// into the outcome.
    pub async fn process_file(&self, path: &Path) -> FileOutcome {
        match self.try_process(path).await {
            Ok(outcome) => {
                tracing::info!(
                    path = %path.display(),
                    status = outcome.status.as_str(),
                    confidence = outcome.confidence,
                    "processed"
                );
                outcome
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "file failed");
                FileOutcome::failed(path.to_path_buf(), e.kind(), e.to_string())
            }
        }
    }

    async fn try_process(&self, path: &Path) -> Result<FileOutcome> {
        let config = &*self.config;

        let doc = match Document::load(path) {
            Ok(doc) => doc,
            Err(ExtractError::Unsupported(ext)) => {
                return Ok(skipped(path, format!("unsupported document type: {}", ext)));
            }
            Err(e) => return Err(e.into()),
        };

        let stem = doc.stem();
        let merger = Merger::new(&config.years, &config.scoring);
        let mut warnings = Vec::new();

        // Fast sources
        let mut candidates: Vec<RawCandidate> = vec![extract_filename::extract(&stem)];
        match extract_properties::extract(&doc) {
            Ok(c) => candidates.push(c),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "embedded properties unavailable");
                warnings.push(format!("properties: {}", e));
            }
        }
        let mut record = merger.merge(&candidates, &stem);

        // Slow source
        if config.extraction.advanced && record.confidence < config.enhancement.threshold {
            match extract_content::extract(&doc, config.extraction.content_pages, &config.years) {
                Ok(c) => {
                    candidates.push(c);
                    record = merger.merge(&candidates, &stem);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "content scan failed");
                    warnings.push(format!("content: {}", e));
                }
            }
        }

        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (record, enhancement) = self
            .enhance(record, &candidates, &stem, &file_name, &merger, &mut warnings)
            .await;

        if !record.has_identity() {
            let mut outcome = skipped(path, "author and title unknown".to_string());
            outcome.confidence = record.confidence;
            outcome.enhancement = enhancement;
            outcome.record = Some(record);
            outcome.warnings = warnings;
            return Ok(outcome);
        }

        let name = naming::render(&record, doc.kind.extension(), &config.naming);
        let mut outcome = FileOutcome {
            original: path.to_path_buf(),
            proposed: None,
            status: OutcomeStatus::Unchanged,
            confidence: record.confidence,
            enhancement,
            record: Some(record),
            error: None,
            message: None,
            warnings,
        };

        if name == file_name {
            outcome.proposed = Some(path.to_path_buf());
            return Ok(outcome);
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let target = naming::resolve_collision(dir, &name, path, &config.naming)?;

        // already carries the disambiguated form of its name
        if target == path {
            outcome.proposed = Some(target);
            return Ok(outcome);
        }

        if config.run.dry_run {
            outcome.status = OutcomeStatus::DryRun;
        } else {
            rename(path, &target)?;
            outcome.status = OutcomeStatus::Renamed;
        }
        outcome.proposed = Some(target);
        Ok(outcome)
    }

    /// Consult the oracle (through the cache) when the record is weak. AI
    /// failures degrade to the pre-enhancement record.
    async fn enhance(
        &self,
        record: MergedRecord,
        candidates: &[RawCandidate],
        stem: &str,
        file_name: &str,
        merger: &Merger<'_>,
        warnings: &mut Vec<String>,
    ) -> (MergedRecord, Enhancement) {
        let enhancement = &self.config.enhancement;
        if record.confidence >= enhancement.threshold {
            return (record, Enhancement::NotNeeded);
        }
        if !enhancement.enabled {
            return (record, Enhancement::Disabled);
        }

        let fingerprint = cache::fingerprint(&record, stem);
        let query = build_query(&record, file_name, fingerprint.clone());
        let oracle = self.oracle.clone();

        let fetched = self
            .cache
            .get_or_fetch(&fingerprint, move || async move {
                tracing::info!(file = %query.file_name, oracle = oracle.name(), "querying AI");
                oracle.lookup(&query).await
            })
            .await;

        match fetched {
            Ok(fetched) => {
                let mut all = candidates.to_vec();
                all.push(fetched.candidate);
                let improved = merger.merge(&all, stem);
                if improved.confidence > record.confidence {
                    tracing::debug!(
                        before = record.confidence,
                        after = improved.confidence,
                        cached = fetched.cached,
                        "AI result accepted"
                    );
                    (improved, Enhancement::Accepted { cached: fetched.cached })
                } else {
                    (record, Enhancement::Rejected { cached: fetched.cached })
                }
            }
            Err(e) => {
                let e = Error::from(e);
                tracing::warn!(file = %file_name, error = %e, "AI enhancement failed");
                warnings.push(format!("{}: {}", e.kind(), e));
                (record, Enhancement::Failed)
            }
        }
    }
}

fn skipped(path: &Path, reason: String) -> FileOutcome {
    FileOutcome {
        original: path.to_path_buf(),
        proposed: None,
        status: OutcomeStatus::Skipped,
        confidence: 0.0,
        enhancement: Enhancement::NotNeeded,
        record: None,
        error: None,
        message: Some(reason),
        warnings: Vec::new(),
    }
}

fn rename(from: &Path, to: &Path) -> Result<(), FileOpError> {
    std::fs::rename(from, to).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FileOpError::PermissionDenied {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        },
        _ => FileOpError::Io {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: e,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: OutcomeStatus, enhancement: Enhancement) -> FileOutcome {
        FileOutcome {
            status,
            enhancement,
            ..FileOutcome::failed(PathBuf::from("x"), ErrorKind::Cache, String::new())
        }
    }

    #[test]
    fn summary_counts_statuses() {
        let outcomes = vec![
            outcome(OutcomeStatus::DryRun, Enhancement::Accepted { cached: false }),
            outcome(OutcomeStatus::DryRun, Enhancement::Rejected { cached: true }),
            outcome(OutcomeStatus::Skipped, Enhancement::NotNeeded),
            outcome(OutcomeStatus::Failed, Enhancement::NotNeeded),
        ];
        let s = Summary::from_outcomes(&outcomes);
        assert_eq!(s.total, 4);
        assert_eq!(s.dry_run, 2);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.ai_used, 1);
    }

    #[tokio::test]
    async fn unsupported_file_is_skipped_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let pipeline = Pipeline::new(
            Config::minimal(),
            Arc::new(crate::enhance::DisabledOracle),
            Arc::new(Cache::in_memory()),
        );
        let out = pipeline.process_file(&path).await;
        assert_eq!(out.status, OutcomeStatus::Skipped);
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn missing_file_is_failed_with_kind() {
        let pipeline = Pipeline::new(
            Config::minimal(),
            Arc::new(crate::enhance::DisabledOracle),
            Arc::new(Cache::in_memory()),
        );
        let out = pipeline
            .process_file(Path::new("/nonexistent/book.pdf"))
            .await;
        assert_eq!(out.status, OutcomeStatus::Failed);
        assert_eq!(out.error, Some(ErrorKind::MetadataExtraction));
    }
}
