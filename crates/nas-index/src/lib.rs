//! Index caches derived from harvest metadata.
//!
//! Per-job raw caches pull CDX lines and crawl logs out of the archive's
//! metadata files. On top of them, the CDX index cache produces one sorted
//! CDX file for a set of jobs, and the crawl-log index cache produces a
//! compressed deduplication index keyed by content digest.
//!
//! # Key Types
//!
//! - [`RawMetadataCache`] -- per-job metadata fetched by batch job
//! - [`CdxIndexCache`] -- sorted CDX over a set of jobs
//! - [`CrawlLogIndexCache`] -- digest index over a set of jobs
//! - [`DigestIndex`] -- segmented, mergeable digest index on disk
//! - [`JobIndexCache`] -- the request surface shared by both set caches
//! - [`IndexCaches`] -- all of the above wired to one archive

use std::collections::BTreeSet;

use nas_cache::Index;
use nas_types::JobId;

pub mod caches;
pub mod cdx;
pub mod cdx_cache;
pub mod config;
pub mod crawl_log;
pub mod crawl_log_cache;
pub mod digest_index;
pub mod error;
pub mod migration;
pub mod pool;
pub mod raw;
pub mod sort;

pub use caches::IndexCaches;
pub use cdx::CdxRecord;
pub use cdx_cache::{CdxCombiner, CdxIndexCache, CDX_INDEX_PREFIX};
pub use config::IndexSettings;
pub use crawl_log::CrawlLogLine;
pub use crawl_log_cache::{
    CrawlLogCombiner, CrawlLogIndexCache, DigestJobIndexer, JobIndexer, CRAWL_LOG_INDEX_PREFIX,
};
pub use digest_index::{DigestIndex, IndexDocument};
pub use error::{IndexError, IndexResult};
pub use migration::{MigrationTable, Rewrite, RewriteStats};
pub use pool::WorkerPool;
pub use raw::RawMetadataCache;

/// An index over a set of jobs, served from a set-keyed cache.
pub trait JobIndexCache: Send + Sync {
    /// Return the index for the largest available subset of `jobs`.
    fn get_index(&self, jobs: &BTreeSet<JobId>) -> IndexResult<Index<BTreeSet<JobId>>>;

    /// Start building the index for `jobs` without waiting for it.
    fn request_index(&self, jobs: &BTreeSet<JobId>) -> IndexResult<()>;
}
