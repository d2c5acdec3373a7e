use nas_archive::ArchiveError;
use nas_types::TypeError;
use thiserror::Error;

/// Errors from reconciliation and repair.
#[derive(Debug, Error)]
pub enum PreservationError {
    /// An empty filename, checksum or credential.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown replica, or another validation failure from `nas-types`.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// The archive refused or failed a request.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Reading or writing a work file or a staged copy failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation needs state that does not exist yet, such as a work file
    /// from an update that never ran.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A repair was refused: no reference checksum, bad credentials or a
    /// checksum that does not match the file.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The same update is already in flight.
    #[error("already running: {0}")]
    AlreadyRunning(String),
}

/// Result alias for reconciliation operations.
pub type PreservationResult<T> = Result<T, PreservationError>;
