//! Error taxonomy for the reconciliation pipeline.
//!
//! Every pipeline step returns an explicit [`Result`]; the orchestrator turns
//! failures into per-file outcomes tagged with an [`ErrorKind`]. Only
//! configuration errors are fatal for a run, and those are raised before any
//! file is touched.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Convenience alias used across the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration (missing credential, bad threshold).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A source extractor could not read the file.
    #[error(transparent)]
    MetadataExtraction(#[from] ExtractError),

    /// AI enhancement failed to reach the service or the service refused the call.
    #[error("AI communication error: {0}")]
    AiCommunication(String),

    /// AI enhancement got a reply that could not be parsed into metadata.
    #[error("AI processing error: {0}")]
    AiProcessing(String),

    /// A filesystem operation on the target name failed.
    #[error(transparent)]
    FileOperation(#[from] FileOpError),

    /// The durable cache could not be opened or written.
    #[error("cache error: {0}")]
    Cache(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::MetadataExtraction(_) => ErrorKind::MetadataExtraction,
            Error::AiCommunication(_) => ErrorKind::AiCommunication,
            Error::AiProcessing(_) => ErrorKind::AiProcessing,
            Error::FileOperation(_) => ErrorKind::FileOperation,
            Error::Cache(_) => ErrorKind::Cache,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Cache(e.to_string())
    }
}

impl From<EnhanceError> for Error {
    fn from(e: EnhanceError) -> Self {
        match e {
            EnhanceError::Communication(msg) => Error::AiCommunication(msg),
            EnhanceError::Processing(msg) => Error::AiProcessing(msg),
        }
    }
}

/// Plain tag carried in per-file outcomes and JSON reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    MetadataExtraction,
    AiCommunication,
    AiProcessing,
    FileOperation,
    Cache,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::MetadataExtraction => "metadata_extraction",
            ErrorKind::AiCommunication => "ai_communication",
            ErrorKind::AiProcessing => "ai_processing",
            ErrorKind::FileOperation => "file_operation",
            ErrorKind::Cache => "cache",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extraction failure. "The file has no usable metadata" is not an error:
/// extractors return an empty candidate for that case.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt {format} container: {reason}")]
    Corrupt { format: &'static str, reason: String },

    #[error("unsupported document type: {0}")]
    Unsupported(String),
}

/// Failure of the AI client. Cloneable so one in-flight result can be shared
/// with every caller waiting on the same fingerprint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnhanceError {
    #[error("{0}")]
    Communication(String),
    #[error("{0}")]
    Processing(String),
}

/// Filename synthesis / rename failure.
#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("target name {} still collides after {budget} disambiguation attempts", .target.display())]
    CollisionBudgetExhausted { target: PathBuf, budget: u32 },

    #[error("permission denied renaming {} to {}", .from.display(), .to.display())]
    PermissionDenied { from: PathBuf, to: PathBuf },

    #[error("rename {} to {} failed: {source}", .from.display(), .to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
