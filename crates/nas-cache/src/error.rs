use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from the file-based caches.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing a cache file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The lock guarding a cache file could not be taken. Not retried.
    #[error("failed to lock {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A builder failed while producing the data for a key.
    #[error("building cache entry {key} failed: {source}")]
    Build {
        key: String,
        #[source]
        source: BoxError,
    },

    /// Not even a reduced key could be cached.
    #[error("no cache data available for {0}")]
    Unavailable(String),

    /// An empty key or another argument rejected before any locking.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CacheError {
    pub fn build(key: impl std::fmt::Debug, source: impl Into<BoxError>) -> Self {
        Self::Build {
            key: format!("{key:?}"),
            source: source.into(),
        }
    }
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
