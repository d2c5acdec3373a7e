//! Batch jobs executed against every file of one replica.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use nas_types::checksum;
use regex::Regex;

use crate::error::{ArchiveError, ArchiveResult};
use crate::record::{RecordCodec, SimpleRecordCodec};

/// Selects which files of a replica a batch job visits.
#[derive(Clone, Debug)]
pub enum FileFilter {
    All,
    /// Filenames fully matching the regular expression.
    Pattern(Regex),
    /// Exactly these filenames.
    Named(BTreeSet<String>),
}

impl FileFilter {
    /// Build a filter from a pattern that must match the whole filename.
    pub fn pattern(pattern: &str) -> ArchiveResult<Self> {
        Ok(Self::Pattern(anchored(pattern)?))
    }

    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Named(names.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, filename: &str) -> bool {
        match self {
            Self::All => true,
            Self::Pattern(re) => re.is_match(filename),
            Self::Named(names) => names.contains(filename),
        }
    }
}

pub(crate) fn anchored(pattern: &str) -> ArchiveResult<Regex> {
    Ok(Regex::new(&format!("^(?:{pattern})$"))?)
}

/// A unit of work run over the files of a single replica.
///
/// The runner calls `initialize` once, `process_file` for each file the
/// filter accepts, then `finish`. Everything written to `out` becomes the
/// batch result file. An error from `process_file` marks only that file as
/// failed; errors from `initialize` or `finish` fail the whole batch.
pub trait BatchJob: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&self) -> &FileFilter;

    fn initialize(&self, _out: &mut dyn Write) -> ArchiveResult<()> {
        Ok(())
    }

    fn process_file(&self, file: &Path, out: &mut dyn Write) -> ArchiveResult<()>;

    fn finish(&self, _out: &mut dyn Write) -> ArchiveResult<()> {
        Ok(())
    }
}

fn file_name(file: &Path) -> ArchiveResult<&str> {
    file.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArchiveError::InvalidArgument(format!("bad filename {}", file.display())))
}

// ---------------------------------------------------------------------------
// FileListJob
// ---------------------------------------------------------------------------

/// Lists the filenames present on a replica, one per line.
#[derive(Clone, Debug)]
pub struct FileListJob {
    filter: FileFilter,
}

impl FileListJob {
    pub fn new() -> Self {
        Self {
            filter: FileFilter::All,
        }
    }

    pub fn with_filter(filter: FileFilter) -> Self {
        Self { filter }
    }
}

impl Default for FileListJob {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchJob for FileListJob {
    fn name(&self) -> &str {
        "filelist"
    }

    fn filter(&self) -> &FileFilter {
        &self.filter
    }

    fn process_file(&self, file: &Path, out: &mut dyn Write) -> ArchiveResult<()> {
        writeln!(out, "{}", file_name(file)?)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChecksumJob
// ---------------------------------------------------------------------------

/// Emits one `filename##checksum` line per file.
#[derive(Clone, Debug)]
pub struct ChecksumJob {
    filter: FileFilter,
}

impl ChecksumJob {
    pub fn new() -> Self {
        Self {
            filter: FileFilter::All,
        }
    }

    pub fn with_filter(filter: FileFilter) -> Self {
        Self { filter }
    }
}

impl Default for ChecksumJob {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchJob for ChecksumJob {
    fn name(&self) -> &str {
        "checksum"
    }

    fn filter(&self) -> &FileFilter {
        &self.filter
    }

    fn process_file(&self, file: &Path, out: &mut dyn Write) -> ArchiveResult<()> {
        let name = file_name(file)?;
        let sum = checksum::file_checksum(file)?;
        writeln!(out, "{}", checksum::make_line(name, &sum))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GetMetadataJob
// ---------------------------------------------------------------------------

/// Copies out the payload of every record whose URL and mime type fully
/// match the given patterns.
pub struct GetMetadataJob {
    filter: FileFilter,
    url_pattern: Regex,
    mime_pattern: Regex,
    codec: Arc<dyn RecordCodec>,
}

impl GetMetadataJob {
    pub fn new(filter: FileFilter, url_pattern: &str, mime_pattern: &str) -> ArchiveResult<Self> {
        Ok(Self {
            filter,
            url_pattern: anchored(url_pattern)?,
            mime_pattern: anchored(mime_pattern)?,
            codec: Arc::new(SimpleRecordCodec),
        })
    }

    pub fn with_codec(mut self, codec: Arc<dyn RecordCodec>) -> Self {
        self.codec = codec;
        self
    }
}

impl std::fmt::Debug for GetMetadataJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetMetadataJob")
            .field("filter", &self.filter)
            .field("url_pattern", &self.url_pattern.as_str())
            .field("mime_pattern", &self.mime_pattern.as_str())
            .finish()
    }
}

impl BatchJob for GetMetadataJob {
    fn name(&self) -> &str {
        "metadata"
    }

    fn filter(&self) -> &FileFilter {
        &self.filter
    }

    fn process_file(&self, file: &Path, out: &mut dyn Write) -> ArchiveResult<()> {
        let records = self.codec.read_all(file)?;
        for record in records
            .iter()
            .filter(|r| self.url_pattern.is_match(&r.url) && self.mime_pattern.is_match(&r.mime))
        {
            out.write_all(&record.payload)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn filters() {
        assert!(FileFilter::All.matches("anything"));

        let re = FileFilter::pattern(r"\d+-metadata-\d+\.arc").unwrap();
        assert!(re.matches("12-metadata-1.arc"));
        assert!(!re.matches("x12-metadata-1.arc"));
        assert!(!re.matches("12-metadata-1.arc.bak"));

        let named = FileFilter::named(["a.arc", "b.arc"]);
        assert!(named.matches("a.arc"));
        assert!(!named.matches("c.arc"));
    }

    #[test]
    fn checksum_job_emits_checksum_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f1.arc");
        fs::write(&file, b"payload").unwrap();

        let mut out = Vec::new();
        ChecksumJob::new().process_file(&file, &mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        let (name, sum) = checksum::parse_line(line.trim_end()).unwrap();
        assert_eq!(name, "f1.arc");
        assert_eq!(sum, checksum::bytes_checksum(b"payload"));
    }

    #[test]
    fn metadata_job_selects_matching_records() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("3-metadata-1.arc");
        let codec = SimpleRecordCodec;
        let mut buf = Vec::new();
        codec
            .write_record(&mut buf, "metadata://x/crawl/index/cdx?majorversion=1", "application/x-cdx", b"cdx-line\n")
            .unwrap();
        codec
            .write_record(&mut buf, "metadata://x/crawl/logs/crawl.log", "text/plain", b"log-line\n")
            .unwrap();
        fs::write(&file, buf).unwrap();

        let job = GetMetadataJob::new(FileFilter::All, "metadata://[^/]*/crawl/index/cdx.*", "application/x-cdx")
            .unwrap();
        let mut out = Vec::new();
        job.process_file(&file, &mut out).unwrap();
        assert_eq!(out, b"cdx-line\n");
    }
}
