use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use nas_types::ReplicaId;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client::ArchiveClient;
use crate::error::ArchiveResult;
use crate::job::BatchJob;
use crate::status::BatchStatus;

/// Where a finished background batch left its output.
#[derive(Clone, Debug)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub job: String,
    pub replica: ReplicaId,
    /// `<dir>/<job>-<run>.out`, absent when the batch produced no results.
    pub result_path: Option<PathBuf>,
    /// `<dir>/<job>-<run>.err`: failed files and their exceptions.
    pub error_path: PathBuf,
    pub processed: usize,
    pub failed: usize,
}

/// Answer to [`BatchExecuter::spawn`].
#[derive(Debug)]
pub enum ExecuterTicket {
    Started {
        run_id: Uuid,
        outcome: Receiver<ArchiveResult<BatchReport>>,
    },
    /// A job with the same name is already running.
    AlreadyRunning { run_id: Uuid },
}

type RunningJobs = Arc<Mutex<HashMap<String, Uuid>>>;

/// Runs batch jobs in the background, one thread per job.
///
/// At most one job per job name is in flight.
pub struct BatchExecuter {
    client: Arc<dyn ArchiveClient>,
    output_dir: PathBuf,
    running: RunningJobs,
}

/// Removes the job from the running map however the thread ends.
struct RunningGuard {
    running: RunningJobs,
    job: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .expect("executer mutex poisoned")
            .remove(&self.job);
    }
}

impl BatchExecuter {
    pub fn new(client: Arc<dyn ArchiveClient>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Names and run ids of the jobs currently in flight.
    pub fn running_jobs(&self) -> Vec<(String, Uuid)> {
        let map = self.running.lock().expect("executer mutex poisoned");
        let mut jobs: Vec<_> = map.iter().map(|(k, v)| (k.clone(), *v)).collect();
        jobs.sort();
        jobs
    }

    pub fn spawn(&self, job: Arc<dyn BatchJob>, replica: ReplicaId) -> ArchiveResult<ExecuterTicket> {
        self.client.replicas().by_id(&replica)?;
        fs::create_dir_all(&self.output_dir)?;

        let name = job.name().to_string();
        let run_id = {
            let mut map = self.running.lock().expect("executer mutex poisoned");
            if let Some(existing) = map.get(&name) {
                info!(job = %name, run = %existing, "batch job already running");
                return Ok(ExecuterTicket::AlreadyRunning { run_id: *existing });
            }
            let run_id = Uuid::now_v7();
            map.insert(name.clone(), run_id);
            run_id
        };

        let guard = RunningGuard {
            running: Arc::clone(&self.running),
            job: name.clone(),
        };
        let client = Arc::clone(&self.client);
        let dir = self.output_dir.clone();
        let (tx, rx) = bounded(1);

        let spawned = thread::Builder::new()
            .name(format!("batch-{name}"))
            .spawn(move || {
                let outcome = execute(client.as_ref(), job, &replica, &dir, run_id);
                if let Err(e) = &outcome {
                    error!(job = %name, replica = %replica, run = %run_id, error = %e, "batch job failed");
                }
                drop(guard);
                let _ = tx.send(outcome);
            });
        // A failed spawn drops the closure, and with it the guard.
        spawned?;

        Ok(ExecuterTicket::Started {
            run_id,
            outcome: rx,
        })
    }
}

fn execute(
    client: &dyn ArchiveClient,
    job: Arc<dyn BatchJob>,
    replica: &ReplicaId,
    dir: &Path,
    run_id: Uuid,
) -> ArchiveResult<BatchReport> {
    let name = job.name().to_string();
    let status = client.batch(job, replica)?;

    let result_path = if status.has_result_file() {
        let path = dir.join(format!("{name}-{run_id}.out"));
        status.copy_results(&path)?;
        Some(path)
    } else {
        None
    };

    let error_path = dir.join(format!("{name}-{run_id}.err"));
    write_errors(&error_path, &status)?;

    if !status.is_successful() {
        warn!(
            job = %name,
            replica = %replica,
            failed = ?status.files_failed,
            "batch job finished with failed files"
        );
    }

    Ok(BatchReport {
        run_id,
        job: name,
        replica: replica.clone(),
        result_path,
        error_path,
        processed: status.no_of_files_processed,
        failed: status.no_of_files_failed(),
    })
}

fn write_errors(path: &Path, status: &BatchStatus) -> ArchiveResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for file in &status.files_failed {
        writeln!(out, "{file}")?;
    }
    for exception in &status.exceptions {
        writeln!(out, "{}: {}", exception.file, exception.message)?;
    }
    out.flush()?;
    Ok(())
}
