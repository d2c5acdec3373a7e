use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use fs2::FileExt;
use tracing::warn;

use crate::error::{CacheError, CacheResult};

/// Process-wide map from lock-file path to an in-process mutex.
///
/// Entries are created on first use and never removed, so every caller
/// locking the same path shares one mutex for the life of the process.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

static GLOBAL: OnceLock<Arc<LockRegistry>> = OnceLock::new();

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every cache in this process.
    pub fn global() -> Arc<LockRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(LockRegistry::new())))
    }

    /// The mutex for `path`. Paths are used as given; callers canonicalize.
    pub fn mutex_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock registry mutex poisoned");
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    pub fn len(&self) -> usize {
        self.locks.lock().expect("lock registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive OS advisory lock on a file, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Create `path` if needed and block until the exclusive lock is held.
    pub fn acquire(path: &Path) -> CacheResult<Self> {
        let lock_failed = |source| CacheError::LockFailed {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(lock_failed)?;
        file.lock_exclusive().map_err(lock_failed)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release file lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_same_mutex() {
        let registry = LockRegistry::new();
        let a = registry.mutex_for(Path::new("/tmp/x.working"));
        let b = registry.mutex_for(Path::new("/tmp/x.working"));
        let c = registry.mutex_for(Path::new("/tmp/y.working"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn file_lock_creates_and_relocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.working");
        {
            let lock = FileLock::acquire(&path).unwrap();
            assert_eq!(lock.path(), path.as_path());
        }
        assert!(path.exists());
        FileLock::acquire(&path).unwrap();
    }

    #[test]
    fn lock_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileLock::acquire(&dir.path().join("no/such/dir.working")).unwrap_err();
        assert!(matches!(err, CacheError::LockFailed { .. }));
    }
}
