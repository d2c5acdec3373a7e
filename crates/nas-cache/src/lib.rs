//! File-based caches for derived data.
//!
//! A [`FileBasedCache`] turns a [`CacheBuilder`] into a cache whose entries
//! are files, built at most once per key and guarded against concurrent
//! builders in this and other processes. [`CombiningCache`] builds entries
//! for sets of ids out of per-id entries, and [`get_index`] walks a request
//! down to the largest subset that can actually be served.
//!
//! # Key Types
//!
//! - [`Cache`] / [`CacheBuilder`] -- the cache and its data strategy
//! - [`FileBasedCache`] -- per-key locking and exists-means-valid lookup
//! - [`CombiningCache`] / [`Combiner`] -- set-keyed caches
//! - [`LockRegistry`] -- process-wide per-path mutexes
//! - [`Index`] -- a cache file and the ids it covers

pub mod digest;
pub mod error;
pub mod file_cache;
pub mod index;
pub mod lock;
pub mod multi;

pub use digest::KeyHasher;
pub use error::{CacheError, CacheResult};
pub use file_cache::{Cache, CacheBuilder, FileBasedCache};
pub use index::{get, get_index, Index};
pub use lock::{FileLock, LockRegistry};
pub use multi::{set_cache_file, CombiningCache, Combiner, MAX_LISTED_IDS};
