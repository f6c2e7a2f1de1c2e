use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to {operation} '{}': {source}", path.display())]
    FileAccess {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("invalid timestamp pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("settings parse error: {0}")]
    Settings(#[from] serde_json::Error),
    #[error("could not start refinement workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("output write error: {0}")]
    Output(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn file(path: &Path, operation: &'static str, source: io::Error) -> Self {
        Error::FileAccess { path: path.to_path_buf(), operation, source }
    }

    /// True when the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::FileAccess { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
