use std::fmt::Debug;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::file_cache::Cache;

/// A cache file together with the key it was built for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Index<K> {
    pub file: PathBuf,
    pub ids: K,
}

/// The cache file for exactly `id`, or `None` if only a different key could
/// be cached.
pub fn get<K: PartialEq>(cache: &dyn Cache<K>, id: &K) -> CacheResult<Option<PathBuf>> {
    Ok(match cache.cache(id)? {
        Some(got) if &got == id => Some(cache.cache_file(id)),
        _ => None,
    })
}

/// Cache `id`, retrying with whatever smaller key the cache offers until a
/// key is fully cached.
///
/// Fails with [`CacheError::Unavailable`] when a retry yields nothing.
pub fn get_index<K: Clone + PartialEq + Debug>(cache: &dyn Cache<K>, id: &K) -> CacheResult<Index<K>> {
    let mut last = id.clone();
    let mut response = cache.cache(&last)?;
    loop {
        match response {
            None => return Err(CacheError::Unavailable(format!("{last:?}"))),
            Some(got) if got == last => {
                return Ok(Index {
                    file: cache.cache_file(&last),
                    ids: last,
                })
            }
            Some(got) => {
                debug!(requested = ?last, retry = ?got, "retrying with reduced key");
                last = got;
                response = cache.cache(&last)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_cache::{CacheBuilder, FileBasedCache};
    use crate::lock::LockRegistry;
    use crate::multi::{CombiningCache, Combiner};
    use std::collections::{BTreeMap, BTreeSet};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Per-id cache holding data only for `known` ids.
    struct PerId {
        dir: PathBuf,
        known: BTreeSet<u64>,
    }

    impl CacheBuilder<u64> for PerId {
        fn cache_file(&self, id: &u64) -> PathBuf {
            self.dir.join(format!("raw-{id}-cache"))
        }
        fn build(&self, id: &u64) -> CacheResult<Option<u64>> {
            if !self.known.contains(id) {
                return Ok(None);
            }
            fs::write(self.cache_file(id), format!("data {id}\n"))?;
            Ok(Some(*id))
        }
    }

    #[derive(Default)]
    struct Concat {
        calls: AtomicUsize,
    }

    impl Combiner<u64> for Concat {
        fn combine(&self, files: &BTreeMap<u64, PathBuf>, dest: &Path) -> CacheResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut all = Vec::new();
            for file in files.values() {
                all.extend(fs::read(file)?);
            }
            fs::write(dest, all)?;
            Ok(())
        }
    }

    type Multi = FileBasedCache<BTreeSet<u64>, CombiningCache<u64, FileBasedCache<u64, PerId>, Concat>>;

    fn multi(dir: &Path, known: &[u64]) -> Multi {
        let registry = Arc::new(LockRegistry::new());
        let per_id = FileBasedCache::with_registry(
            PerId {
                dir: dir.join("raw"),
                known: known.iter().copied().collect(),
            },
            Arc::clone(&registry),
        );
        FileBasedCache::with_registry(
            CombiningCache::new(dir.join("combined"), "combined", per_id, Concat::default()),
            registry,
        )
    }

    fn set(ids: &[u64]) -> BTreeSet<u64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn shrinks_to_available_subset() {
        let dir = tempfile::tempdir().unwrap();
        let cache = multi(dir.path(), &[1, 2]);

        let index = get_index(&cache, &set(&[1, 2, 4])).unwrap();
        assert_eq!(index.ids, set(&[1, 2]));
        assert_eq!(index.file, cache.cache_file(&set(&[1, 2])));
        assert_eq!(fs::read_to_string(&index.file).unwrap(), "data 1\ndata 2\n");
        assert!(!cache.cache_file(&set(&[1, 2, 4])).exists());
    }

    #[test]
    fn full_set_combined_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = multi(dir.path(), &[1, 2, 3]);
        let ids = set(&[3, 1, 2]);

        let first = get_index(&cache, &ids).unwrap();
        let second = get_index(&cache, &ids).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.builder().combiner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nothing_available_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = multi(dir.path(), &[]);
        let err = get_index(&cache, &set(&[5, 6])).unwrap_err();
        assert!(matches!(err, CacheError::Unavailable(_)));
    }

    #[test]
    fn get_requires_exact_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = multi(dir.path(), &[1]);
        assert_eq!(get(&cache, &set(&[1, 2])).unwrap(), None);
        assert_eq!(
            get(&cache, &set(&[1])).unwrap(),
            Some(cache.cache_file(&set(&[1])))
        );
    }
}
