use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nas_cache::{get_index, Cache, CacheError, CacheResult, CombiningCache, Combiner, FileBasedCache, Index};
use nas_types::JobId;
use tracing::info;

use crate::config::IndexSettings;
use crate::error::{IndexError, IndexResult};
use crate::sort::{self, sort_file};
use crate::JobIndexCache;

pub const CDX_INDEX_PREFIX: &str = "cdxindex";

/// Concatenates per-job CDX files and sorts the result.
///
/// Work happens in `<dest>.unsorted` and `<dest>.sorting`; `dest` appears
/// only once fully sorted.
#[derive(Clone, Debug)]
pub struct CdxCombiner {
    tmp_dir: PathBuf,
    run_lines: usize,
}

impl CdxCombiner {
    pub fn new(tmp_dir: impl Into<PathBuf>, run_lines: usize) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            run_lines,
        }
    }

    fn combine_files(&self, files: &BTreeMap<JobId, PathBuf>, dest: &Path) -> IndexResult<()> {
        let unsorted = with_suffix(dest, "unsorted");
        let sorting = with_suffix(dest, "sorting");

        let mut out = BufWriter::new(File::create(&unsorted)?);
        for file in files.values() {
            let data = fs::read(file)?;
            out.write_all(&data)?;
            if !data.is_empty() && !data.ends_with(b"\n") {
                out.write_all(b"\n")?;
            }
        }
        out.flush()?;
        drop(out);

        sort_file(&unsorted, &sorting, &self.tmp_dir, self.run_lines, sort::whole_line)?;
        fs::rename(&sorting, dest)?;
        fs::remove_file(&unsorted)?;
        info!(jobs = files.len(), dest = %dest.display(), "CDX index combined");
        Ok(())
    }
}

pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl Combiner<JobId> for CdxCombiner {
    fn combine(&self, files: &BTreeMap<JobId, PathBuf>, dest: &Path) -> CacheResult<()> {
        self.combine_files(files, dest).map_err(|e| {
            let _ = fs::remove_file(with_suffix(dest, "sorting"));
            CacheError::build(files.keys().collect::<Vec<_>>(), e)
        })
    }
}

type CdxInner = FileBasedCache<BTreeSet<JobId>, CombiningCache<JobId, Arc<dyn Cache<JobId>>, CdxCombiner>>;

/// Sorted CDX index over a set of jobs.
pub struct CdxIndexCache {
    inner: CdxInner,
}

impl CdxIndexCache {
    /// `raw` supplies each job's CDX records.
    pub fn new(settings: &IndexSettings, raw: Arc<dyn Cache<JobId>>) -> Self {
        let combiner = CdxCombiner::new(&settings.temp_dir, settings.sort_run_lines);
        Self {
            inner: CombiningCache::new(
                settings.cache_dir.join(CDX_INDEX_PREFIX),
                CDX_INDEX_PREFIX,
                raw,
                combiner,
            )
            .into_cache(),
        }
    }

    pub fn cache(&self) -> &dyn Cache<BTreeSet<JobId>> {
        &self.inner
    }
}

impl JobIndexCache for CdxIndexCache {
    fn get_index(&self, jobs: &BTreeSet<JobId>) -> IndexResult<Index<BTreeSet<JobId>>> {
        Ok(get_index(&self.inner, jobs)?)
    }

    fn request_index(&self, _jobs: &BTreeSet<JobId>) -> IndexResult<()> {
        Err(IndexError::NotSupported(
            "CDX indexes are only available through get_index".into(),
        ))
    }
}
