use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Debug, Error)]
pub enum CurateError {
    /// A store line that is not valid JSON.
    #[error("{}:{line}: malformed record: {source}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Valid JSON that does not fit the record schema, even after fix-ups.
    #[error("{}:{line}: schema violation: {reason}", path.display())]
    SchemaViolation {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The manifest and the store it describes disagree.
    #[error("integrity mismatch for {}: {detail}", path.display())]
    IntegrityMismatch { path: PathBuf, detail: String },

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read csv {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("serialize: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl CurateError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = CurateError> = std::result::Result<T, E>;

/// A reconcile run that stopped before publishing.
///
/// The on-disk store is untouched unless `stage` is past `Write`.
#[derive(Debug, Error)]
#[error("reconcile aborted at {stage} after processing {processed} records: {source}")]
pub struct ReconcileError {
    pub stage: Stage,
    pub processed: usize,
    #[source]
    pub source: CurateError,
}
