//! Caches keyed by sets of ids, built by combining per-id cache files.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::digest::KeyHasher;
use crate::error::CacheResult;
use crate::file_cache::{Cache, CacheBuilder, FileBasedCache};

/// Ids spelled out in a set filename before the digest takes over.
pub const MAX_LISTED_IDS: usize = 4;

/// Filename for the cache entry of a set of ids.
///
/// Sets of up to [`MAX_LISTED_IDS`] ids are spelled out in order, as in
/// `prefix-1-2-3-cache`. Larger sets list their first ids and then a digest
/// of the whole set. Both forms depend only on the set's contents.
pub fn set_cache_file<K: Display>(dir: &Path, prefix: &str, ids: &BTreeSet<K>) -> PathBuf {
    let mut parts: Vec<String> = vec![prefix.to_string()];
    parts.extend(ids.iter().take(MAX_LISTED_IDS).map(ToString::to_string));
    if ids.len() > MAX_LISTED_IDS {
        let canonical = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        parts.push(KeyHasher::ID_SET.hex(canonical.as_bytes()));
    }
    parts.push("cache".to_string());
    dir.join(parts.join("-"))
}

/// Merges the cache files of several ids into one.
pub trait Combiner<K>: Send + Sync {
    /// Narrow the ids that have cache files before combining. Dropping an id
    /// here makes the whole request resolve to a smaller set.
    fn prepare(&self, found: BTreeMap<K, PathBuf>) -> CacheResult<BTreeMap<K, PathBuf>> {
        Ok(found)
    }

    /// Write the combination of `files` to `dest`. Must not leave a partial
    /// `dest` behind on failure.
    fn combine(&self, files: &BTreeMap<K, PathBuf>, dest: &Path) -> CacheResult<()>;
}

/// Builder for set-keyed caches over a per-id delegate cache.
///
/// When every requested id is available, the combined file is written under
/// the full set's name. Otherwise the available subset is returned without
/// writing anything, and the caller retries with that subset.
pub struct CombiningCache<K, D, C> {
    dir: PathBuf,
    prefix: String,
    delegate: D,
    combiner: C,
    _key: PhantomData<fn(&K)>,
}

impl<K, D, C> CombiningCache<K, D, C>
where
    K: Ord + Clone + Display + Debug + Send + Sync,
    D: Cache<K>,
    C: Combiner<K>,
{
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, delegate: D, combiner: C) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            delegate,
            combiner,
            _key: PhantomData,
        }
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn combiner(&self) -> &C {
        &self.combiner
    }

    /// Wrap in a [`FileBasedCache`] keyed by id sets.
    pub fn into_cache(self) -> FileBasedCache<BTreeSet<K>, Self> {
        FileBasedCache::new(self)
    }

    /// The ids that the delegate can supply, with their files.
    fn prepare_combine(&self, ids: &BTreeSet<K>) -> BTreeMap<K, PathBuf> {
        let mut found = BTreeMap::new();
        for id in ids {
            match self.delegate.cache(id) {
                Ok(Some(got)) if &got == id => {
                    found.insert(id.clone(), self.delegate.cache_file(id));
                }
                Ok(_) => debug!(id = %id, "no cached data for id"),
                Err(e) => warn!(id = %id, error = %e, "caching id failed"),
            }
        }
        found
    }
}

impl<K, D, C> CacheBuilder<BTreeSet<K>> for CombiningCache<K, D, C>
where
    K: Ord + Clone + Display + Debug + Send + Sync,
    D: Cache<K>,
    C: Combiner<K>,
{
    fn cache_file(&self, ids: &BTreeSet<K>) -> PathBuf {
        set_cache_file(&self.dir, &self.prefix, ids)
    }

    fn build(&self, ids: &BTreeSet<K>) -> CacheResult<Option<BTreeSet<K>>> {
        let found = self.combiner.prepare(self.prepare_combine(ids))?;
        if found.len() == ids.len() && found.keys().eq(ids.iter()) {
            self.combiner.combine(&found, &self.cache_file(ids))?;
            return Ok(Some(ids.clone()));
        }

        let subset: BTreeSet<K> = found.into_keys().collect();
        let missing: Vec<&K> = ids.difference(&subset).collect();
        warn!(prefix = %self.prefix, missing = ?missing, "not all ids available, not combining");
        Ok(if subset.is_empty() { None } else { Some(subset) })
    }
}
