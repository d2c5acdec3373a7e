use nas_archive::ArchiveError;
use nas_cache::CacheError;
use nas_types::TypeError;
use thiserror::Error;

/// Errors from the index caches.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Reading or writing an index, sort run or cache file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fetching metadata from the archive failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The underlying file cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Unknown replica, bad job id, or another validation failure.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// A CDX line with too few fields or a bad offset.
    #[error("invalid CDX line: {0}")]
    InvalidCdxLine(String),

    /// A crawl log line with too few fields.
    #[error("invalid crawl log line: {0}")]
    InvalidCrawlLogLine(String),

    /// A segment or manifest failed its integrity check.
    #[error("corrupt index data: {0}")]
    Corrupt(String),

    /// Encoding or decoding a segment or manifest failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A URL or mime pattern that is not a valid regex.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The cache does not offer this entry point.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Building the sub-index of one job failed.
    #[error("indexing job {job} failed: {reason}")]
    IndexingFailed { job: String, reason: String },
}

impl From<bincode::Error> for IndexError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
