//! Core data models used throughout shelfname.
//!
//! These types represent the candidates, merged records and per-file outcomes
//! that flow through the reconciliation pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::ErrorKind;

/// Where a candidate came from. Declaration order is merge priority for the
/// local sources; [`Source::Ai`] is placed first during the re-merge step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Filename,
    Properties,
    Content,
    Ai,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Filename => "filename",
            Source::Properties => "properties",
            Source::Content => "content",
            Source::Ai => "ai",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw fields produced by one extractor for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub source: Source,
    pub author: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    /// Extractor's own estimate in [0, 1] of how well it matched.
    pub quality: f64,
}

impl RawCandidate {
    pub fn empty(source: Source) -> Self {
        Self {
            source,
            author: None,
            title: None,
            year: None,
            quality: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.author.is_none() && self.title.is_none() && self.year.is_none()
    }
}

/// Sources agreeing with each chosen field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Provenance {
    pub author: BTreeSet<Source>,
    pub title: BTreeSet<Source>,
    pub year: BTreeSet<Source>,
}

/// Reconciled metadata for one file. `None` means unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergedRecord {
    pub author: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub confidence: f64,
    pub provenance: Provenance,
}

impl MergedRecord {
    pub fn has_identity(&self) -> bool {
        self.author.is_some() || self.title.is_some()
    }
}

/// Query sent to the metadata oracle.
#[derive(Debug, Clone)]
pub struct AiQuery {
    pub prompt: String,
    pub fingerprint: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Renamed,
    DryRun,
    Unchanged,
    Skipped,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Renamed => "renamed",
            OutcomeStatus::DryRun => "dry_run",
            OutcomeStatus::Unchanged => "unchanged",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Failed => "failed",
        }
    }
}

/// What happened with AI enhancement for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Enhancement {
    NotNeeded,
    Disabled,
    Accepted { cached: bool },
    Rejected { cached: bool },
    Failed,
}

impl Enhancement {
    pub fn used_ai(&self) -> bool {
        matches!(self, Enhancement::Accepted { .. })
    }
}

/// Per-file result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub original: PathBuf,
    pub proposed: Option<PathBuf>,
    pub status: OutcomeStatus,
    pub confidence: f64,
    pub enhancement: Enhancement,
    pub record: Option<MergedRecord>,
    pub error: Option<ErrorKind>,
    pub message: Option<String>,
    pub warnings: Vec<String>,
}

impl FileOutcome {
    pub fn failed(original: PathBuf, kind: ErrorKind, message: String) -> Self {
        Self {
            original,
            proposed: None,
            status: OutcomeStatus::Failed,
            confidence: 0.0,
            enhancement: Enhancement::NotNeeded,
            record: None,
            error: Some(kind),
            message: Some(message),
            warnings: Vec::new(),
        }
    }
}
