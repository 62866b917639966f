//! Resolution error taxonomy
//!
//! None of these reach `ConfigResolver::resolve` callers: resolution always
//! degrades to a default. They surface from the refresh path and in logs.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed snapshot line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("snapshot not present at {path:?}")]
    MissingSnapshot { path: PathBuf },

    #[error("configuration source changed from '{previous}' to '{current}'")]
    SourceMismatch { previous: String, current: String },

    #[error("a snapshot refresh is already running")]
    RefreshInProgress,

    #[error("failed to fetch snapshot from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("snapshot from {url} contained no usable records")]
    EmptySnapshot { url: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ResolveError {
    /// Expected conditions that only warrant a debug log
    pub fn is_expected(&self) -> bool {
        matches!(self, ResolveError::MissingSnapshot { .. })
    }
}
