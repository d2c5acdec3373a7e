use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the index caches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Root of all cache directories.
    pub cache_dir: PathBuf,
    /// Scratch space for sort runs and sub-indexes.
    pub temp_dir: PathBuf,
    /// Replica (id or name) asked first for metadata.
    pub primary_replica: String,
    /// Fall back to the other bitarchive replicas when the primary fails.
    pub try_other_replicas: bool,
    /// Rewrite stale duplicate origins in crawl logs.
    pub duplicate_migration: bool,
    pub max_threads: usize,
    /// How long the combine loop waits for a finished sub-index.
    #[serde(with = "millis")]
    pub check_interval: Duration,
    /// Deadline for one crawl-log combine; unfinished jobs are abandoned.
    #[serde(with = "millis")]
    pub combine_timeout: Duration,
    pub max_segments: usize,
    /// Sub-indexes accumulated before they are merged into the total index.
    pub merge_threshold: usize,
    pub mime_filter: String,
    /// Treat `mime_filter` as the mime types to leave out.
    pub use_blacklist: bool,
    /// Lines per in-memory run of the external sort.
    pub sort_run_lines: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            temp_dir: PathBuf::from("cache/tmp"),
            primary_replica: "ONE".into(),
            try_other_replicas: true,
            duplicate_migration: true,
            max_threads: 4,
            check_interval: Duration::from_secs(30),
            combine_timeout: Duration::from_secs(3 * 24 * 60 * 60),
            max_segments: 15,
            merge_threshold: 200,
            mime_filter: "^text/.*".into(),
            use_blacklist: true,
            sort_run_lines: 100_000,
        }
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
