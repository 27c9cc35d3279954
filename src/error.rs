use std::path::PathBuf;

use thiserror::Error;

/// Failures a single scan cycle can run into. None of them are fatal to the
/// watcher; the next trigger starts a fresh cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("source file {} is unavailable: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("persistence failure: {0:#}")]
    PersistenceFailure(anyhow::Error),

    #[error("scan abandoned because the watcher was stopped")]
    Cancelled,
}

impl SyncError {
    pub fn source_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::SourceUnavailable {
            path: path.into(),
            source,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
