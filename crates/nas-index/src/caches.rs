use std::collections::BTreeSet;
use std::sync::Arc;

use nas_archive::ArchiveClient;
use nas_cache::{Cache, Index};
use nas_types::JobId;
use tracing::info;

use crate::cdx_cache::CdxIndexCache;
use crate::config::IndexSettings;
use crate::crawl_log_cache::CrawlLogIndexCache;
use crate::error::IndexResult;
use crate::raw::RawMetadataCache;
use crate::JobIndexCache;

/// The raw and combined index caches over one archive.
pub struct IndexCaches {
    pub cdx_raw: Arc<dyn Cache<JobId>>,
    pub crawl_log_raw: Arc<dyn Cache<JobId>>,
    pub cdx_index: CdxIndexCache,
    pub crawl_log_index: CrawlLogIndexCache,
}

impl IndexCaches {
    pub fn new(client: Arc<dyn ArchiveClient>, settings: &IndexSettings, metadata_suffix: &str) -> IndexResult<Self> {
        let cdx_raw: Arc<dyn Cache<JobId>> = Arc::new(
            RawMetadataCache::cdx(Arc::clone(&client), settings, metadata_suffix)?.into_cache(),
        );
        let crawl_log_raw: Arc<dyn Cache<JobId>> =
            Arc::new(RawMetadataCache::crawl_log(client, settings, metadata_suffix)?.into_cache());
        let cdx_index = CdxIndexCache::new(settings, Arc::clone(&cdx_raw));
        let crawl_log_index =
            CrawlLogIndexCache::new(settings, Arc::clone(&crawl_log_raw), Arc::clone(&cdx_raw))?;
        info!(cache_dir = %settings.cache_dir.display(), "index caches ready");
        Ok(Self {
            cdx_raw,
            crawl_log_raw,
            cdx_index,
            crawl_log_index,
        })
    }

    /// Fetch the raw CDX and crawl log of every job in `jobs`, returning the
    /// jobs for which both are available.
    pub fn prefetch(&self, jobs: &BTreeSet<JobId>) -> BTreeSet<JobId> {
        jobs.iter()
            .copied()
            .filter(|job| {
                let cdx = matches!(self.cdx_raw.cache(job), Ok(Some(got)) if got == *job);
                let log = matches!(self.crawl_log_raw.cache(job), Ok(Some(got)) if got == *job);
                cdx && log
            })
            .collect()
    }

    pub fn cdx_index(&self, jobs: &BTreeSet<JobId>) -> IndexResult<Index<BTreeSet<JobId>>> {
        self.cdx_index.get_index(jobs)
    }

    pub fn dedup_index(&self, jobs: &BTreeSet<JobId>) -> IndexResult<Index<BTreeSet<JobId>>> {
        self.crawl_log_index.get_index(jobs)
    }
}
