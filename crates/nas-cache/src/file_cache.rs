use std::fmt::Debug;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::CacheResult;
use crate::lock::{FileLock, LockRegistry};

/// A cache that maps keys to files on disk.
///
/// `cache` returns the key whose file now exists. That is `id` itself on
/// success, a smaller key when only part of the data could be cached, or
/// `None` when nothing could.
pub trait Cache<K>: Send + Sync {
    fn cache_file(&self, id: &K) -> PathBuf;

    fn cache(&self, id: &K) -> CacheResult<Option<K>>;
}

impl<K, T: Cache<K> + ?Sized> Cache<K> for Arc<T> {
    fn cache_file(&self, id: &K) -> PathBuf {
        (**self).cache_file(id)
    }

    fn cache(&self, id: &K) -> CacheResult<Option<K>> {
        (**self).cache(id)
    }
}

/// Produces the data behind a [`FileBasedCache`].
///
/// `build` runs with the key's locks held and only when `cache_file(id)`
/// does not exist yet. It must either write `cache_file(id)` completely and
/// return `Some(id)`, or return a different key (or `None`) and leave
/// `cache_file(id)` absent.
pub trait CacheBuilder<K>: Send + Sync {
    fn cache_file(&self, id: &K) -> PathBuf;

    fn build(&self, id: &K) -> CacheResult<Option<K>>;
}

/// A [`Cache`] that serializes builds of the same key.
///
/// Builds of one key are exclusive across threads (through the
/// [`LockRegistry`] mutex) and across processes (through an advisory lock on
/// `<cache_file>.working`). Once the cache file exists it is served as is.
pub struct FileBasedCache<K, B> {
    builder: B,
    registry: Arc<LockRegistry>,
    _key: PhantomData<fn(&K)>,
}

impl<K, B> FileBasedCache<K, B>
where
    K: Clone + PartialEq + Debug + Send + Sync,
    B: CacheBuilder<K>,
{
    pub fn new(builder: B) -> Self {
        Self::with_registry(builder, LockRegistry::global())
    }

    pub fn with_registry(builder: B, registry: Arc<LockRegistry>) -> Self {
        Self {
            builder,
            registry,
            _key: PhantomData,
        }
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    fn lock_path(cache_file: &Path) -> PathBuf {
        let mut name = cache_file.as_os_str().to_os_string();
        name.push(".working");
        PathBuf::from(name)
    }
}

impl<K, B> Cache<K> for FileBasedCache<K, B>
where
    K: Clone + PartialEq + Debug + Send + Sync,
    B: CacheBuilder<K>,
{
    fn cache_file(&self, id: &K) -> PathBuf {
        self.builder.cache_file(id)
    }

    fn cache(&self, id: &K) -> CacheResult<Option<K>> {
        let file = self.builder.cache_file(id);
        let dir = match file.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let lock_path = Self::lock_path(&file);
        let key = fs::canonicalize(dir)?.join(lock_path.file_name().unwrap_or_default());

        let mutex = self.registry.mutex_for(&key);
        let _in_process = mutex.lock().expect("cache key mutex poisoned");
        let _file_lock = FileLock::acquire(&lock_path)?;

        if file.exists() {
            debug!(id = ?id, file = %file.display(), "cache hit");
            return Ok(Some(id.clone()));
        }

        let built = self.builder.build(id)?;
        match &built {
            Some(got) if got == id => info!(id = ?id, file = %file.display(), "cache entry built"),
            Some(got) => info!(id = ?id, got = ?got, "cache entry only partially available"),
            None => info!(id = ?id, "no data for cache entry"),
        }
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Writes `value-<id>` files, counting builds and catching overlaps.
    struct Counting {
        dir: PathBuf,
        builds: AtomicUsize,
        in_build: AtomicBool,
        overlapped: AtomicBool,
        missing: Vec<u64>,
    }

    impl Counting {
        fn new(dir: &Path) -> Self {
            Self {
                dir: dir.join("nested"),
                builds: AtomicUsize::new(0),
                in_build: AtomicBool::new(false),
                overlapped: AtomicBool::new(false),
                missing: vec![],
            }
        }
    }

    impl CacheBuilder<u64> for Counting {
        fn cache_file(&self, id: &u64) -> PathBuf {
            self.dir.join(format!("value-{id}"))
        }

        fn build(&self, id: &u64) -> CacheResult<Option<u64>> {
            if self.in_build.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.builds.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            let result = if self.missing.contains(id) {
                None
            } else {
                fs::write(self.cache_file(id), id.to_string())?;
                Some(*id)
            };
            self.in_build.store(false, Ordering::SeqCst);
            Ok(result)
        }
    }

    #[test]
    fn second_call_is_served_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileBasedCache::with_registry(Counting::new(dir.path()), Arc::new(LockRegistry::new()));

        assert_eq!(cache.cache(&7).unwrap(), Some(7));
        let first = fs::read(cache.cache_file(&7)).unwrap();
        assert_eq!(cache.cache(&7).unwrap(), Some(7));
        assert_eq!(fs::read(cache.cache_file(&7)).unwrap(), first);
        assert_eq!(cache.builder().builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_callers_build_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FileBasedCache::with_registry(
            Counting::new(dir.path()),
            Arc::new(LockRegistry::new()),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.cache(&3).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Some(3));
        }

        assert_eq!(cache.builder().builds.load(Ordering::SeqCst), 1);
        assert!(!cache.builder().overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn distinct_caches_share_registry_lock() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(LockRegistry::new());
        let a = Arc::new(FileBasedCache::with_registry(Counting::new(dir.path()), Arc::clone(&registry)));
        let b = Arc::new(FileBasedCache::with_registry(Counting::new(dir.path()), Arc::clone(&registry)));

        let ta = {
            let a = Arc::clone(&a);
            thread::spawn(move || a.cache(&1).unwrap())
        };
        let tb = {
            let b = Arc::clone(&b);
            thread::spawn(move || b.cache(&1).unwrap())
        };
        assert_eq!(ta.join().unwrap(), Some(1));
        assert_eq!(tb.join().unwrap(), Some(1));

        let total = a.builder().builds.load(Ordering::SeqCst) + b.builder().builds.load(Ordering::SeqCst);
        assert_eq!(total, 1);
    }

    #[test]
    fn missing_data_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = Counting::new(dir.path());
        builder.missing = vec![9];
        let cache = FileBasedCache::with_registry(builder, Arc::new(LockRegistry::new()));

        assert_eq!(cache.cache(&9).unwrap(), None);
        assert!(!cache.cache_file(&9).exists());
        assert_eq!(cache.cache(&9).unwrap(), None);
        assert_eq!(cache.builder().builds.load(Ordering::SeqCst), 2);
    }
}
