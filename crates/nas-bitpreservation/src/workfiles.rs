//! Per-replica work files: one line per filename (or checksum line).
//!
//! Each update run rewrites its work files whole, through a private temp
//! file and a rename. Repairs edit them a line at a time. All edits go
//! through one mutex, so a line edit never interleaves with another edit or
//! a rewrite.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use nas_types::ReplicaId;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{PreservationError, PreservationResult};

/// What a work file records about one replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkFileKind {
    /// Filenames the replica reported in its last file listing.
    FilesOnReplica,
    /// Known to admin data but absent from the replica.
    MissingFilesReplica,
    /// `filename##checksum` lines from the last checksum run.
    ChecksumsOnReplica,
    /// Files whose checksum on the replica differs from admin data.
    WrongFiles,
    /// On the replica but unknown to admin data.
    MissingFilesAdminData,
    /// Correct checksum, but admin data does not record a completed upload.
    WrongStates,
}

impl WorkFileKind {
    pub const ALL: [WorkFileKind; 6] = [
        Self::FilesOnReplica,
        Self::MissingFilesReplica,
        Self::ChecksumsOnReplica,
        Self::WrongFiles,
        Self::MissingFilesAdminData,
        Self::WrongStates,
    ];

    /// Location below the replica's work directory.
    pub fn relative_path(&self) -> &'static str {
        match self {
            Self::FilesOnReplica => "filelistOutput/unsorted.txt",
            Self::MissingFilesReplica => "missingfiles.txt",
            Self::ChecksumsOnReplica => "checksums/unsorted.txt",
            Self::WrongFiles => "wrongfiles.txt",
            Self::MissingFilesAdminData => "missingadmindata.txt",
            Self::WrongStates => "wrongstates.txt",
        }
    }
}

impl fmt::Display for WorkFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FilesOnReplica => "files-on-replica",
            Self::MissingFilesReplica => "missing-files-replica",
            Self::ChecksumsOnReplica => "checksums-on-replica",
            Self::WrongFiles => "wrong-files",
            Self::MissingFilesAdminData => "missing-files-admin-data",
            Self::WrongStates => "wrong-states",
        };
        f.write_str(s)
    }
}

/// The work files of every replica, below one root directory.
#[derive(Debug)]
pub struct WorkFiles {
    root: PathBuf,
    edit: Mutex<()>,
}

impl WorkFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            edit: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<replica>/<kind path>`.
    pub fn path(&self, replica: &ReplicaId, kind: WorkFileKind) -> PathBuf {
        self.root.join(replica.as_str()).join(kind.relative_path())
    }

    pub fn exists(&self, replica: &ReplicaId, kind: WorkFileKind) -> bool {
        self.path(replica, kind).is_file()
    }

    /// A fresh temp file next to the work file for a producer to fill
    /// before [`WorkFiles::install`] moves it into place. Every call gets its
    /// own file.
    pub fn staging(&self, replica: &ReplicaId, kind: WorkFileKind) -> PreservationResult<NamedTempFile> {
        let path = self.path(replica, kind);
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new().prefix(".staging-").tempfile_in(parent)?;
        Ok(staging)
    }

    /// Replace the work file with a file produced through
    /// [`WorkFiles::staging`].
    pub fn install(&self, replica: &ReplicaId, kind: WorkFileKind, staging: NamedTempFile) -> PreservationResult<()> {
        let path = self.path(replica, kind);
        let _edit = self.edit.lock().expect("work file mutex poisoned");
        staging.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Replace the work file with `lines`.
    pub fn write<I, S>(&self, replica: &ReplicaId, kind: WorkFileKind, lines: I) -> PreservationResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut staging = self.staging(replica, kind)?;
        let count = write_lines(staging.as_file_mut(), lines)?;
        self.install(replica, kind, staging)?;
        debug!(replica = %replica, kind = %kind, lines = count, "work file written");
        Ok(())
    }

    /// All non-empty lines. Fails with `IllegalState` if the work file has
    /// never been produced.
    pub fn lines(&self, replica: &ReplicaId, kind: WorkFileKind) -> PreservationResult<Vec<String>> {
        let path = self.path(replica, kind);
        if !path.is_file() {
            return Err(PreservationError::IllegalState(format!(
                "work file {} has not been produced yet",
                path.display()
            )));
        }
        read_lines(&path)
    }

    /// Number of lines, or `None` if the work file does not exist.
    pub fn count(&self, replica: &ReplicaId, kind: WorkFileKind) -> PreservationResult<Option<u64>> {
        if !self.exists(replica, kind) {
            return Ok(None);
        }
        Ok(Some(self.lines(replica, kind)?.len() as u64))
    }

    /// When the work file was last written, or `None` if it does not exist.
    pub fn last_modified(&self, replica: &ReplicaId, kind: WorkFileKind) -> PreservationResult<Option<DateTime<Utc>>> {
        let path = self.path(replica, kind);
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Append `line`, creating the work file if needed.
    pub fn append_line(&self, replica: &ReplicaId, kind: WorkFileKind, line: &str) -> PreservationResult<()> {
        let path = self.path(replica, kind);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _edit = self.edit.lock().expect("work file mutex poisoned");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Remove every occurrence of `line`. Returns whether anything was removed.
    pub fn remove_line(&self, replica: &ReplicaId, kind: WorkFileKind, line: &str) -> PreservationResult<bool> {
        let path = self.path(replica, kind);
        let _edit = self.edit.lock().expect("work file mutex poisoned");
        if !path.is_file() {
            return Ok(false);
        }
        let lines = read_lines(&path)?;
        let kept: Vec<&String> = lines.iter().filter(|l| l.as_str() != line).collect();
        if kept.len() == lines.len() {
            return Ok(false);
        }

        let parent = path.parent().unwrap_or(&self.root);
        let mut staging = tempfile::Builder::new().prefix(".staging-").tempfile_in(parent)?;
        write_lines(staging.as_file_mut(), kept)?;
        staging.persist(&path).map_err(|e| e.error)?;
        Ok(true)
    }
}

fn write_lines<I, S>(file: &mut File, lines: I) -> PreservationResult<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BufWriter::new(file);
    let mut count = 0usize;
    for line in lines {
        writeln!(out, "{}", line.as_ref())?;
        count += 1;
    }
    out.flush()?;
    Ok(count)
}

fn read_lines(path: &Path) -> PreservationResult<Vec<String>> {
    let mut lines = Vec::new();
    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}
