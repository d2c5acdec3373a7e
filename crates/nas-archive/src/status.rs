use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use nas_types::ReplicaId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};

/// A failure recorded while processing one file of a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionOccurrence {
    pub file: String,
    pub message: String,
}

/// Handle to a batch result file held by the archive.
///
/// The contents may be transferred exactly once, by either
/// [`RemoteFile::copy_to`] or [`RemoteFile::append_to`]. The backing file
/// is removed after the transfer.
#[derive(Debug)]
pub struct RemoteFile {
    path: PathBuf,
    consumed: AtomicBool,
}

impl RemoteFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            consumed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }

    fn take(&self) -> ArchiveResult<()> {
        if self.consumed.swap(true, Ordering::SeqCst) {
            return Err(ArchiveError::AlreadyConsumed(self.path.clone()));
        }
        Ok(())
    }

    fn cleanup(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "could not remove consumed result file");
        }
    }

    /// Copy the contents to `dest`, replacing any existing file.
    /// Claim the file for `f`. A failed transfer releases the claim so the
    /// caller may retry.
    fn transfer<T>(&self, f: impl FnOnce(&Path) -> ArchiveResult<T>) -> ArchiveResult<T> {
        self.take()?;
        match f(&self.path) {
            Ok(value) => {
                self.cleanup();
                Ok(value)
            }
            Err(e) => {
                self.consumed.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn copy_to(&self, dest: &Path) -> ArchiveResult<u64> {
        self.transfer(|src| Ok(fs::copy(src, dest)?))
    }

    /// Append the contents to `out`.
    pub fn append_to(&self, out: &mut dyn Write) -> ArchiveResult<u64> {
        self.transfer(|src| {
            let mut src = File::open(src)?;
            Ok(io::copy(&mut src, out)?)
        })
    }
}

/// The outcome of running one batch job on one replica.
#[derive(Debug)]
pub struct BatchStatus {
    pub replica: ReplicaId,
    pub files_failed: Vec<String>,
    pub no_of_files_processed: usize,
    pub result_file: Option<RemoteFile>,
    pub exceptions: Vec<ExceptionOccurrence>,
}

impl BatchStatus {
    pub fn has_result_file(&self) -> bool {
        self.result_file.is_some()
    }

    pub fn no_of_files_failed(&self) -> usize {
        self.files_failed.len()
    }

    /// Whether every processed file succeeded.
    pub fn is_successful(&self) -> bool {
        self.files_failed.is_empty()
    }

    fn remote(&self) -> ArchiveResult<&RemoteFile> {
        self.result_file
            .as_ref()
            .ok_or_else(|| ArchiveError::NoResultFile(self.replica.to_string()))
    }

    pub fn copy_results(&self, dest: &Path) -> ArchiveResult<u64> {
        self.remote()?.copy_to(dest)
    }

    pub fn append_results(&self, out: &mut dyn Write) -> ArchiveResult<u64> {
        self.remote()?.append_to(out)
    }
}
