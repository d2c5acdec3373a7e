use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use nas_types::ReplicaId;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::ArchiveResult;
use crate::job::BatchJob;
use crate::status::{BatchStatus, ExceptionOccurrence, RemoteFile};

/// Executes batch jobs over the files in a replica directory.
///
/// Files are visited in filename order. Hidden files (leading `.`) are
/// in-flight temp files and are skipped. Results are spooled to
/// `<spool_dir>/<job>-<run>.out`. A batch that processed no files has no
/// result file.
#[derive(Clone, Debug)]
pub struct BatchRunner {
    spool_dir: PathBuf,
}

impl BatchRunner {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    pub fn run(&self, job: &dyn BatchJob, replica: &ReplicaId, dir: &Path) -> ArchiveResult<BatchStatus> {
        fs::create_dir_all(&self.spool_dir)?;
        let out_path = self
            .spool_dir
            .join(format!("{}-{}.out", job.name(), Uuid::now_v7()));
        let mut out = BufWriter::new(File::create(&out_path)?);

        job.initialize(&mut out)?;

        let mut processed = 0usize;
        let mut files_failed = Vec::new();
        let mut exceptions = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if name.starts_with('.') || !job.filter().matches(name) {
                continue;
            }

            processed += 1;
            if let Err(e) = job.process_file(entry.path(), &mut out) {
                warn!(job = job.name(), replica = %replica, file = name, error = %e, "batch file failed");
                files_failed.push(name.to_string());
                exceptions.push(ExceptionOccurrence {
                    file: name.to_string(),
                    message: e.to_string(),
                });
            }
        }

        job.finish(&mut out)?;
        out.flush()?;
        drop(out);

        let result_file = if processed == 0 {
            fs::remove_file(&out_path)?;
            None
        } else {
            Some(RemoteFile::new(out_path))
        };

        if files_failed.is_empty() {
            debug!(job = job.name(), replica = %replica, processed, "batch finished");
        } else {
            info!(
                job = job.name(),
                replica = %replica,
                processed,
                failed = files_failed.len(),
                "batch finished with failures"
            );
        }

        Ok(BatchStatus {
            replica: replica.clone(),
            files_failed,
            no_of_files_processed: processed,
            result_file,
            exceptions,
        })
    }
}
