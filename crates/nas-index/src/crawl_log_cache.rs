//! Deduplication index over the crawl logs of a set of jobs.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError};
use nas_cache::{get_index, Cache, CacheError, CacheResult, CombiningCache, Combiner, FileBasedCache, Index};
use nas_types::JobId;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cdx::{self, CdxRecord};
use crate::cdx_cache::with_suffix;
use crate::config::IndexSettings;
use crate::crawl_log::{self, strip_digest_prefix, CrawlLogLine};
use crate::digest_index::{DigestIndex, IndexDocument};
use crate::error::IndexResult;
use crate::pool::WorkerPool;
use crate::sort::sort_file;
use crate::JobIndexCache;

pub const CRAWL_LOG_INDEX_PREFIX: &str = "crawllogindex";

/// Builds the sub-index of a single job.
pub trait JobIndexer: Send + Sync {
    /// Index `crawl_log` into a new [`DigestIndex`] at `out_dir`, using
    /// `cdx` to locate each capture. Returns the number of documents.
    fn index_job(&self, job: JobId, crawl_log: &Path, cdx: &Path, out_dir: &Path) -> IndexResult<u64>;
}

/// Default [`JobIndexer`]: joins the URL-sorted crawl log with the CDX
/// records sorted by original URL.
#[derive(Clone, Debug)]
pub struct DigestJobIndexer {
    mime_filter: Regex,
    use_blacklist: bool,
    tmp_dir: PathBuf,
    run_lines: usize,
}

impl DigestJobIndexer {
    pub fn new(settings: &IndexSettings) -> IndexResult<Self> {
        Ok(Self {
            mime_filter: Regex::new(&settings.mime_filter)?,
            use_blacklist: settings.use_blacklist,
            tmp_dir: settings.temp_dir.clone(),
            run_lines: settings.sort_run_lines,
        })
    }

    fn accepts_mime(&self, mime: &str) -> bool {
        self.mime_filter.is_match(mime) != self.use_blacklist
    }

    fn join(&self, job: JobId, sorted_log: &Path, sorted_cdx: &Path) -> IndexResult<Vec<IndexDocument>> {
        let mut cdx_lines = BufReader::new(File::open(sorted_cdx)?).lines();
        let mut cdx_next = next_cdx(&mut cdx_lines)?;
        let mut group_url: Option<String> = None;
        let mut group: Vec<CdxRecord> = Vec::new();
        let mut docs = Vec::new();
        let (mut malformed, mut unmatched) = (0usize, 0usize);

        for line in BufReader::new(File::open(sorted_log)?).lines() {
            let line = line?;
            let entry = match CrawlLogLine::parse(&line) {
                Ok(entry) => entry,
                Err(_) => {
                    malformed += 1;
                    continue;
                }
            };
            if entry.status <= 0 || !self.accepts_mime(&entry.mime) {
                continue;
            }

            let origin = match entry.duplicate_origin() {
                Some((file, offset)) => format!("{file},{offset}"),
                None => {
                    if group_url.as_deref() != Some(entry.url.as_str()) {
                        group.clear();
                        while let Some(record) = cdx_next.take() {
                            match record.original_url.as_bytes().cmp(entry.url.as_bytes()) {
                                Ordering::Less => cdx_next = next_cdx(&mut cdx_lines)?,
                                Ordering::Equal => {
                                    group.push(record);
                                    cdx_next = next_cdx(&mut cdx_lines)?;
                                }
                                Ordering::Greater => {
                                    cdx_next = Some(record);
                                    break;
                                }
                            }
                        }
                        group_url = Some(entry.url.clone());
                    }
                    match group
                        .iter()
                        .find(|r| strip_digest_prefix(&r.digest).eq_ignore_ascii_case(&entry.digest))
                    {
                        Some(record) => record.origin(),
                        None => {
                            unmatched += 1;
                            continue;
                        }
                    }
                }
            };

            docs.push(IndexDocument {
                digest: entry.digest,
                url: entry.url,
                timestamp: entry.timestamp,
                origin,
                mime: entry.mime,
                job,
            });
        }

        debug!(job = %job, docs = docs.len(), malformed, unmatched, "crawl log joined with CDX");
        Ok(docs)
    }
}

fn next_cdx(lines: &mut Lines<BufReader<File>>) -> IndexResult<Option<CdxRecord>> {
    for line in lines.by_ref() {
        let line = line?;
        if let Ok(record) = line.parse::<CdxRecord>() {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

impl JobIndexer for DigestJobIndexer {
    fn index_job(&self, job: JobId, crawl_log: &Path, cdx: &Path, out_dir: &Path) -> IndexResult<u64> {
        fs::create_dir_all(&self.tmp_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("job-{job}-"))
            .tempdir_in(&self.tmp_dir)?;

        let sorted_log = scratch.path().join("crawl.log.sorted");
        sort_file(crawl_log, &sorted_log, scratch.path(), self.run_lines, crawl_log::url_key)?;
        let sorted_cdx = scratch.path().join("cdx.sorted");
        sort_file(cdx, &sorted_cdx, scratch.path(), self.run_lines, cdx::original_url_key)?;

        let docs = self.join(job, &sorted_log, &sorted_cdx)?;
        let count = docs.len() as u64;
        let mut index = DigestIndex::create(out_dir)?;
        index.add_documents(docs)?;
        index.commit()?;
        Ok(count)
    }
}

/// Combines per-job crawl logs into one compressed [`DigestIndex`].
///
/// Jobs are indexed on a [`WorkerPool`]. Finished sub-indexes are merged in
/// batches of `merge_threshold`. Jobs still running when `combine_timeout`
/// expires are left out of the result.
pub struct CrawlLogCombiner {
    cdx: Arc<dyn Cache<JobId>>,
    indexer: Arc<dyn JobIndexer>,
    tmp_dir: PathBuf,
    max_threads: usize,
    check_interval: Duration,
    combine_timeout: Duration,
    max_segments: usize,
    merge_threshold: usize,
}

impl CrawlLogCombiner {
    pub fn new(settings: &IndexSettings, cdx: Arc<dyn Cache<JobId>>, indexer: Arc<dyn JobIndexer>) -> Self {
        Self {
            cdx,
            indexer,
            tmp_dir: settings.temp_dir.clone(),
            max_threads: settings.max_threads,
            check_interval: settings.check_interval,
            combine_timeout: settings.combine_timeout,
            max_segments: settings.max_segments,
            merge_threshold: settings.merge_threshold.max(1),
        }
    }

    fn merge(&self, total: &mut DigestIndex, pending: &mut Vec<PathBuf>) -> IndexResult<()> {
        if pending.is_empty() {
            return Ok(());
        }
        total.add_indexes(pending)?;
        total.force_merge(self.max_segments)?;
        total.commit()?;
        info!(subindexes = pending.len(), docs = total.num_docs(), "sub-indexes merged");
        for dir in pending.drain(..) {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %e, "could not remove sub-index");
            }
        }
        Ok(())
    }

    fn combine_jobs(&self, files: &BTreeMap<JobId, PathBuf>, dest: &Path) -> IndexResult<()> {
        fs::create_dir_all(&self.tmp_dir)?;
        let work = tempfile::Builder::new()
            .prefix("crawllog-combine-")
            .tempdir_in(&self.tmp_dir)?;
        let mut total = DigestIndex::create(&work.path().join("total"))?;
        let mut pool = WorkerPool::new("crawllog-indexer", self.max_threads)?;

        let (tx, rx) = unbounded();
        let mut outstanding = BTreeSet::new();
        for (&job, crawl_log) in files {
            let cdx = self.cdx.cache_file(&job);
            let crawl_log = crawl_log.clone();
            let sub_dir = work.path().join(Uuid::now_v7().to_string());
            let indexer = Arc::clone(&self.indexer);
            let tx = tx.clone();
            outstanding.insert(job);
            pool.execute(move || {
                let result = indexer.index_job(job, &crawl_log, &cdx, &sub_dir);
                let _ = tx.send((job, sub_dir, result));
            });
        }
        drop(tx);
        info!(jobs = files.len(), threads = pool.threads(), "crawl log indexing dispatched");

        let deadline = Instant::now() + self.combine_timeout;
        let mut pending = Vec::new();
        while !outstanding.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    timeout_ms = self.combine_timeout.as_millis() as u64,
                    abandoned = ?outstanding,
                    "combine deadline exceeded, index will lack these jobs"
                );
                break;
            }
            debug!(outstanding = outstanding.len(), "waiting for sub-indexes");
            match rx.recv_timeout(self.check_interval.min(deadline - now)) {
                Ok((job, dir, Ok(docs))) => {
                    outstanding.remove(&job);
                    debug!(job = %job, docs, "sub-index ready");
                    pending.push(dir);
                }
                Ok((job, _, Err(e))) => {
                    outstanding.remove(&job);
                    warn!(job = %job, error = %e, "indexing job failed, leaving it out");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(lost = ?outstanding, "indexing workers ended without reporting");
                    break;
                }
            }
            if pending.len() >= self.merge_threshold {
                self.merge(&mut total, &mut pending)?;
            }
        }
        pool.shutdown_now();

        self.merge(&mut total, &mut pending)?;
        total.force_merge(self.max_segments)?;
        total.commit()?;

        let staging = with_suffix(dest, "tmp");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        total.compress_into(&staging)?;
        fs::rename(&staging, dest)?;
        info!(dest = %dest.display(), docs = total.num_docs(), "crawl log index combined");
        Ok(())
    }
}

impl Combiner<JobId> for CrawlLogCombiner {
    fn prepare(&self, found: BTreeMap<JobId, PathBuf>) -> CacheResult<BTreeMap<JobId, PathBuf>> {
        let mut kept = BTreeMap::new();
        let mut missing = Vec::new();
        for (job, file) in found {
            match self.cdx.cache(&job) {
                Ok(Some(got)) if got == job => {
                    kept.insert(job, file);
                }
                Ok(_) => missing.push(job),
                Err(e) => {
                    warn!(job = %job, error = %e, "caching CDX failed");
                    missing.push(job);
                }
            }
        }
        if !missing.is_empty() {
            warn!(missing = ?missing, "skipping crawl logs of jobs without CDX data");
        }
        Ok(kept)
    }

    fn combine(&self, files: &BTreeMap<JobId, PathBuf>, dest: &Path) -> CacheResult<()> {
        self.combine_jobs(files, dest)
            .map_err(|e| CacheError::build(files.keys().collect::<Vec<_>>(), e))
    }
}

type CrawlLogInner = FileBasedCache<BTreeSet<JobId>, CombiningCache<JobId, Arc<dyn Cache<JobId>>, CrawlLogCombiner>>;

/// Compressed deduplication index over a set of jobs.
pub struct CrawlLogIndexCache {
    inner: Arc<CrawlLogInner>,
}

impl CrawlLogIndexCache {
    pub fn new(
        settings: &IndexSettings,
        crawl_log: Arc<dyn Cache<JobId>>,
        cdx: Arc<dyn Cache<JobId>>,
    ) -> IndexResult<Self> {
        let indexer = Arc::new(DigestJobIndexer::new(settings)?);
        Ok(Self::with_indexer(settings, crawl_log, cdx, indexer))
    }

    pub fn with_indexer(
        settings: &IndexSettings,
        crawl_log: Arc<dyn Cache<JobId>>,
        cdx: Arc<dyn Cache<JobId>>,
        indexer: Arc<dyn JobIndexer>,
    ) -> Self {
        let combiner = CrawlLogCombiner::new(settings, cdx, indexer);
        let cache = CombiningCache::new(
            settings.cache_dir.join(CRAWL_LOG_INDEX_PREFIX),
            CRAWL_LOG_INDEX_PREFIX,
            crawl_log,
            combiner,
        );
        Self {
            inner: Arc::new(cache.into_cache()),
        }
    }

    pub fn cache(&self) -> &dyn Cache<BTreeSet<JobId>> {
        self.inner.as_ref()
    }

    /// Unpack a cached index into `work_dir` for lookups.
    pub fn open(&self, index: &Index<BTreeSet<JobId>>, work_dir: &Path) -> IndexResult<DigestIndex> {
        DigestIndex::open_compressed(&index.file, work_dir)
    }
}

impl JobIndexCache for CrawlLogIndexCache {
    fn get_index(&self, jobs: &BTreeSet<JobId>) -> IndexResult<Index<BTreeSet<JobId>>> {
        Ok(get_index(self.inner.as_ref(), jobs)?)
    }

    /// Build the index on a background thread; the outcome is only logged.
    fn request_index(&self, jobs: &BTreeSet<JobId>) -> IndexResult<()> {
        let inner = Arc::clone(&self.inner);
        let jobs = jobs.clone();
        thread::Builder::new()
            .name("crawllog-index-request".into())
            .spawn(move || match get_index(inner.as_ref(), &jobs) {
                Ok(index) => info!(requested = ?jobs, got = ?index.ids, "requested index ready"),
                Err(e) => warn!(requested = ?jobs, error = %e, "requested index failed"),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::raw::tests::{archive, put_metadata, settings, SUFFIX};
    use crate::raw::RawMetadataCache;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    const CDX_URL: &str = "metadata://x/crawl/index/cdx";
    const CDX_MIME: &str = "application/x-cdx";
    const LOG_URL: &str = "metadata://x/crawl/logs/crawl.log";

    fn log_line(url: &str, mime: &str, digest: &str, annotations: &str) -> String {
        format!("2024-01-01T00:00:00.000Z 200 10 {url} L - {mime} #1 20240101000000000+5 sha1:{digest} - {annotations}\n")
    }

    fn cdx_line(url: &str, digest: &str, offset: u64, file: &str) -> String {
        format!("{url} 20240101000000 {url} image/png 200 {digest} - {offset} {file}\n")
    }

    fn put_job(root: &Path, job: u64) {
        let url = format!("http://example.org/{job}.png");
        let log = log_line(&url, "image/png", &format!("D{job}"), "-")
            + &log_line("http://example.org/page", "text/html", "T", "-")
            + &log_line("http://example.org/dup.png", "image/png", "OLD", "duplicate:\"early.arc,42\"");
        let cdx = cdx_line(&url, &format!("D{job}"), 100 * job, &format!("{job}-1.arc"));
        put_metadata(root, "ONE", job, &[(LOG_URL, "text/plain", log.as_str()), (CDX_URL, CDX_MIME, cdx.as_str())]);
    }

    fn raw_caches(root: &Path, settings: &IndexSettings) -> (Arc<dyn Cache<JobId>>, Arc<dyn Cache<JobId>>) {
        let archive = archive(root);
        let log = RawMetadataCache::crawl_log(archive.clone(), settings, SUFFIX).unwrap().into_cache();
        let cdx = RawMetadataCache::cdx(archive, settings, SUFFIX).unwrap().into_cache();
        (Arc::new(log), Arc::new(cdx))
    }

    fn jobs(ids: &[u64]) -> BTreeSet<JobId> {
        ids.iter().copied().map(JobId::new).collect()
    }

    #[test]
    fn indexes_captures_and_duplicates() {
        let root = tempfile::tempdir().unwrap();
        put_job(root.path(), 1);
        put_job(root.path(), 2);
        let settings = settings(root.path());
        let (log, cdx) = raw_caches(root.path(), &settings);
        let cache = CrawlLogIndexCache::new(&settings, log, cdx).unwrap();

        let index = cache.get_index(&jobs(&[1, 2])).unwrap();
        assert_eq!(index.ids, jobs(&[1, 2]));
        let opened = cache.open(&index, &root.path().join("open")).unwrap();

        let hit = opened.lookup_digest("D2").unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].origin, "2-1.arc,200");
        assert_eq!(hit[0].job, JobId::new(2));

        // text/html is blacklisted by default.
        assert!(opened.lookup_digest("T").unwrap().is_empty());
        assert_eq!(opened.lookup_digest("OLD").unwrap()[0].origin, "early.arc,42");
    }

    #[test]
    fn jobs_without_cdx_are_dropped() {
        let root = tempfile::tempdir().unwrap();
        put_job(root.path(), 1);
        let log = log_line("http://a/", "image/png", "X", "-");
        put_metadata(root.path(), "ONE", 3, &[(LOG_URL, "text/plain", log.as_str())]);

        let settings = settings(root.path());
        let (log, cdx) = raw_caches(root.path(), &settings);
        let cache = CrawlLogIndexCache::new(&settings, log, cdx).unwrap();
        let index = cache.get_index(&jobs(&[1, 3])).unwrap();
        assert_eq!(index.ids, jobs(&[1]));
    }

    /// Indexes nothing; job 5 never finishes in time and job 6 fails.
    struct Scripted {
        calls: AtomicUsize,
    }

    impl JobIndexer for Scripted {
        fn index_job(&self, job: JobId, _log: &Path, _cdx: &Path, out_dir: &Path) -> IndexResult<u64> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            match job.get() {
                5 => {
                    thread::sleep(Duration::from_secs(30));
                    Ok(0)
                }
                6 => Err(IndexError::IndexingFailed {
                    job: job.to_string(),
                    reason: "scripted".into(),
                }),
                _ => {
                    let mut index = DigestIndex::create(out_dir)?;
                    index.add_documents(vec![IndexDocument {
                        digest: format!("D{job}"),
                        url: format!("http://x/{job}"),
                        timestamp: "t".into(),
                        origin: format!("{job}.arc,0"),
                        mime: "image/png".into(),
                        job,
                    }])?;
                    index.commit()?;
                    Ok(1)
                }
            }
        }
    }

    #[test]
    fn deadline_abandons_hung_job() {
        let root = tempfile::tempdir().unwrap();
        for job in [1, 2, 5, 6] {
            put_job(root.path(), job);
        }
        let settings = IndexSettings {
            check_interval: Duration::from_millis(50),
            combine_timeout: Duration::from_millis(800),
            max_threads: 4,
            ..settings(root.path())
        };
        let (log, cdx) = raw_caches(root.path(), &settings);
        // Warm the raw caches so the timing below covers only the combine.
        for job in [1, 2, 5, 6] {
            log.cache(&JobId::new(job)).unwrap();
            cdx.cache(&JobId::new(job)).unwrap();
        }

        let indexer = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
        });
        let cache = CrawlLogIndexCache::with_indexer(&settings, log, cdx, indexer.clone());

        let started = Instant::now();
        let index = cache.get_index(&jobs(&[1, 2, 5, 6])).unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(800 + 50 + 2_000), "took {elapsed:?}");
        assert_eq!(indexer.calls.load(AtomicOrdering::SeqCst), 4);

        let opened = cache.open(&index, &root.path().join("open")).unwrap();
        let jobs_indexed: BTreeSet<JobId> = opened.documents().unwrap().into_iter().map(|d| d.job).collect();
        assert_eq!(jobs_indexed, jobs(&[1, 2]));
    }

    #[test]
    fn mime_whitelist_mode() {
        let settings = IndexSettings {
            use_blacklist: false,
            ..IndexSettings::default()
        };
        let indexer = DigestJobIndexer::new(&settings).unwrap();
        assert!(indexer.accepts_mime("text/html"));
        assert!(!indexer.accepts_mime("image/png"));
    }
}
