//! Per-job caches of raw metadata fetched from the archive.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nas_archive::{ArchiveClient, BatchJob, FileFilter, GetMetadataJob};
use nas_cache::{CacheBuilder, CacheError, CacheResult, FileBasedCache};
use nas_types::{JobId, ReplicaId};
use tracing::{debug, info, warn};

use crate::config::IndexSettings;
use crate::error::IndexResult;
use crate::migration::MigrationTable;

pub const CDX_URL_PATTERN: &str = "metadata://[^/]*/crawl/index/cdx.*";
pub const CDX_MIME_PATTERN: &str = "application/x-cdx";
pub const CRAWL_LOG_URL_PATTERN: &str = r"metadata://[^/]*/crawl/logs/crawl\.log.*";
pub const CRAWL_LOG_MIME_PATTERN: &str = "text/plain";
pub const MIGRATION_URL_PATTERN: &str = "metadata://[^/]*/crawl/index/deduplicationmigration.*";
pub const MIGRATION_MIME_PATTERN: &str = "text/plain";

/// Fetches one kind of metadata record for a job and caches it as
/// `<cache_dir>/<prefix>/<prefix>-<job>-cache`.
///
/// The primary replica is asked first. A replica only counts as having
/// answered when it returned a result file and processed more files than
/// failed. Otherwise, if enabled, the other bitarchives are tried in
/// registry order.
pub struct RawMetadataCache {
    client: Arc<dyn ArchiveClient>,
    dir: PathBuf,
    prefix: String,
    url_pattern: String,
    mime_pattern: String,
    file_suffix: String,
    replicas: Vec<ReplicaId>,
    migrate_duplicates: bool,
}

impl RawMetadataCache {
    pub fn new(
        client: Arc<dyn ArchiveClient>,
        settings: &IndexSettings,
        metadata_suffix: &str,
        prefix: &str,
        url_pattern: &str,
        mime_pattern: &str,
    ) -> IndexResult<Self> {
        // Fail on bad patterns before any build runs.
        GetMetadataJob::new(FileFilter::All, url_pattern, mime_pattern)?;
        FileFilter::pattern(&format!("0{metadata_suffix}"))?;

        let primary = client.replicas().resolve(&settings.primary_replica)?.id.clone();
        let mut replicas = vec![primary.clone()];
        if settings.try_other_replicas {
            replicas.extend(
                client
                    .replicas()
                    .bitarchives()
                    .map(|r| r.id.clone())
                    .filter(|id| *id != primary),
            );
        }

        Ok(Self {
            dir: settings.cache_dir.join(prefix),
            client,
            prefix: prefix.to_string(),
            url_pattern: url_pattern.to_string(),
            mime_pattern: mime_pattern.to_string(),
            file_suffix: metadata_suffix.to_string(),
            replicas,
            migrate_duplicates: false,
        })
    }

    /// Cache of each job's CDX records.
    pub fn cdx(client: Arc<dyn ArchiveClient>, settings: &IndexSettings, metadata_suffix: &str) -> IndexResult<Self> {
        Self::new(client, settings, metadata_suffix, "cdxdata", CDX_URL_PATTERN, CDX_MIME_PATTERN)
    }

    /// Cache of each job's crawl log, with duplicate migration as configured.
    pub fn crawl_log(
        client: Arc<dyn ArchiveClient>,
        settings: &IndexSettings,
        metadata_suffix: &str,
    ) -> IndexResult<Self> {
        let mut cache = Self::new(
            client,
            settings,
            metadata_suffix,
            "crawllog",
            CRAWL_LOG_URL_PATTERN,
            CRAWL_LOG_MIME_PATTERN,
        )?;
        cache.migrate_duplicates = settings.duplicate_migration;
        Ok(cache)
    }

    pub fn into_cache(self) -> FileBasedCache<JobId, Self> {
        FileBasedCache::new(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Replicas in the order they are asked.
    pub fn replicas(&self) -> &[ReplicaId] {
        &self.replicas
    }

    fn metadata_filter(&self, job: JobId) -> IndexResult<FileFilter> {
        Ok(FileFilter::pattern(&format!("{job}{}", self.file_suffix))?)
    }

    /// Run the metadata job until some replica answers; copy its results to
    /// `dest` and return which replica that was.
    fn fetch(&self, job: JobId, dest: &Path) -> IndexResult<Option<ReplicaId>> {
        let batch: Arc<dyn BatchJob> = Arc::new(GetMetadataJob::new(
            self.metadata_filter(job)?,
            &self.url_pattern,
            &self.mime_pattern,
        )?);

        for replica in &self.replicas {
            let status = match self.client.batch(Arc::clone(&batch), replica) {
                Ok(status) => status,
                Err(e) => {
                    warn!(job = %job, replica = %replica, error = %e, "metadata batch failed");
                    continue;
                }
            };
            if status.has_result_file() && status.no_of_files_processed > status.no_of_files_failed() {
                if !status.is_successful() {
                    warn!(job = %job, replica = %replica, failed = ?status.files_failed, "some metadata files failed");
                }
                status.copy_results(dest)?;
                return Ok(Some(replica.clone()));
            }
            info!(
                job = %job,
                replica = %replica,
                processed = status.no_of_files_processed,
                failed = status.no_of_files_failed(),
                "no usable metadata from replica"
            );
        }
        Ok(None)
    }

    /// Rewrite duplicate origins in `file` using the job's migration records,
    /// if the replica has any.
    fn migrate(&self, job: JobId, replica: &ReplicaId, file: &Path) -> IndexResult<()> {
        let batch = Arc::new(GetMetadataJob::new(
            self.metadata_filter(job)?,
            MIGRATION_URL_PATTERN,
            MIGRATION_MIME_PATTERN,
        )?);
        let status = match self.client.batch(batch, replica) {
            Ok(status) => status,
            Err(e) => {
                warn!(job = %job, replica = %replica, error = %e, "could not fetch migration records");
                return Ok(());
            }
        };
        if !status.has_result_file() {
            return Ok(());
        }

        let mut records = Vec::new();
        status.append_results(&mut records)?;
        let text = String::from_utf8_lossy(&records);
        if text.trim().is_empty() {
            debug!(job = %job, "no migration records");
            return Ok(());
        }

        let table = MigrationTable::parse(&text);
        let migrated = sibling(file, "migrated");
        let stats = table.rewrite(
            BufReader::new(File::open(file)?),
            BufWriter::new(File::create(&migrated)?),
        )?;
        fs::rename(&migrated, file)?;
        info!(
            job = %job,
            rewritten = stats.rewritten,
            unresolved = stats.unresolved,
            "duplicate origins migrated"
        );
        Ok(())
    }

    fn build_entry(&self, job: JobId) -> IndexResult<Option<JobId>> {
        let file = self.cache_file(&job);
        let tmp = sibling(&file, "tmp");
        let Some(replica) = self.fetch(job, &tmp)? else {
            warn!(job = %job, prefix = %self.prefix, "no replica could supply metadata");
            return Ok(None);
        };
        if self.migrate_duplicates {
            self.migrate(job, &replica, &tmp)?;
        }
        fs::rename(&tmp, &file)?;
        Ok(Some(job))
    }
}

fn sibling(file: &Path, suffix: &str) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl CacheBuilder<JobId> for RawMetadataCache {
    fn cache_file(&self, job: &JobId) -> PathBuf {
        self.dir.join(format!("{}-{}-cache", self.prefix, job))
    }

    fn build(&self, job: &JobId) -> CacheResult<Option<JobId>> {
        self.build_entry(*job).map_err(|e| CacheError::build(job, e))
    }
}
