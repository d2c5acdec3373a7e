use std::path::PathBuf;

use nas_types::TypeError;
use thiserror::Error;

/// Errors from batch execution and the archive transport.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Argument validation failed before any work was attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown replica, or another validation failure from `nas-types`.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// The archive could not be reached or the request could not be carried.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Reading or writing a replica file or spool file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The batch produced no result file to copy or append from.
    #[error("batch job on replica {0} produced no result file")]
    NoResultFile(String),

    /// The result file has already been copied or appended once.
    #[error("batch result file {0} has already been consumed")]
    AlreadyConsumed(PathBuf),

    /// Credentials or checksum did not authorize the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The file is not on the replica, or on no bitarchive at all.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The operation does not apply in the current state (e.g. fetching a
    /// file from a checksum-only replica).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A single file could not be processed by a batch job.
    #[error("processing {file} failed: {reason}")]
    ProcessingFailed { file: String, reason: String },

    /// A batch filter or metadata pattern that is not a valid regex.
    #[error("invalid file pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Admin data on disk could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;
