use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver};
use nas_types::ReplicaId;
use tracing::{error, info};

use crate::engine::ActiveBitPreservation;
use crate::error::{PreservationError, PreservationResult};

/// Which reconciliation an update runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateKind {
    /// File listing, then missing-file diffs.
    MissingFiles,
    /// Checksums, then wrong-file and wrong-state diffs.
    ChecksumErrors,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFiles => write!(f, "missing"),
            Self::ChecksumErrors => write!(f, "checksum"),
        }
    }
}

impl FromStr for UpdateKind {
    type Err = PreservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing" => Ok(Self::MissingFiles),
            "checksum" => Ok(Self::ChecksumErrors),
            other => Err(PreservationError::InvalidArgument(format!(
                "unknown update kind '{other}', expected 'missing' or 'checksum'"
            ))),
        }
    }
}

/// Where a (replica, kind) pair stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CategoryState {
    /// Never updated, or not since the requested time.
    Stale,
    Updating,
    Ready,
}

/// Answer to [`BitPreservationUpdater::submit`].
#[derive(Debug)]
pub enum UpdateTicket {
    Started(Receiver<PreservationResult<()>>),
    /// The same update is already in flight.
    AlreadyRunning,
}

type InFlight = Arc<Mutex<HashSet<(ReplicaId, UpdateKind)>>>;

/// Runs updates in the background, at most one per replica and kind.
pub struct BitPreservationUpdater {
    engine: Arc<dyn ActiveBitPreservation>,
    running: InFlight,
}

struct InFlightGuard {
    running: InFlight,
    key: (ReplicaId, UpdateKind),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .expect("updater mutex poisoned")
            .remove(&self.key);
    }
}

impl BitPreservationUpdater {
    pub fn new(engine: Arc<dyn ActiveBitPreservation>) -> Self {
        Self {
            engine,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn engine(&self) -> &Arc<dyn ActiveBitPreservation> {
        &self.engine
    }

    /// Run an update on the calling thread. Fails with `AlreadyRunning` if
    /// the same update is in flight.
    pub fn run(&self, replica: &ReplicaId, kind: UpdateKind) -> PreservationResult<()> {
        self.engine.replicas().by_id(replica)?;
        let Some(_guard) = self.claim(replica, kind) else {
            return Err(PreservationError::AlreadyRunning(format!("{kind} update of {replica}")));
        };
        run_update(self.engine.as_ref(), replica, kind)
    }

    /// Start an update on its own thread. Failures are logged there and
    /// delivered on the ticket's receiver.
    pub fn submit(&self, replica: ReplicaId, kind: UpdateKind) -> PreservationResult<UpdateTicket> {
        self.engine.replicas().by_id(&replica)?;
        let Some(guard) = self.claim(&replica, kind) else {
            return Ok(UpdateTicket::AlreadyRunning);
        };

        let engine = Arc::clone(&self.engine);
        let (tx, rx) = bounded(1);
        let spawned = thread::Builder::new()
            .name(format!("update-{replica}-{kind}"))
            .spawn(move || {
                let outcome = run_update(engine.as_ref(), &replica, kind);
                if let Err(e) = &outcome {
                    error!(replica = %replica, kind = %kind, error = %e, "update failed");
                }
                drop(guard);
                let _ = tx.send(outcome);
            });
        spawned?;
        Ok(UpdateTicket::Started(rx))
    }

    /// Mark the update as in flight until the guard drops, or `None` if it
    /// already is.
    fn claim(&self, replica: &ReplicaId, kind: UpdateKind) -> Option<InFlightGuard> {
        let key = (replica.clone(), kind);
        let mut running = self.running.lock().expect("updater mutex poisoned");
        if !running.insert(key.clone()) {
            info!(replica = %replica, kind = %kind, "update already running");
            return None;
        }
        Some(InFlightGuard {
            running: Arc::clone(&self.running),
            key,
        })
    }

    pub fn is_running(&self, replica: &ReplicaId, kind: UpdateKind) -> bool {
        self.running
            .lock()
            .expect("updater mutex poisoned")
            .contains(&(replica.clone(), kind))
    }

    /// `Stale` if the work files are missing or older than `not_before`.
    pub fn state(
        &self,
        replica: &ReplicaId,
        kind: UpdateKind,
        not_before: Option<DateTime<Utc>>,
    ) -> PreservationResult<CategoryState> {
        if self.is_running(replica, kind) {
            return Ok(CategoryState::Updating);
        }
        let updated = match kind {
            UpdateKind::MissingFiles => self.engine.get_date_for_missing_files(replica)?,
            UpdateKind::ChecksumErrors => self.engine.get_date_for_changed_files(replica)?,
        };
        Ok(match (updated, not_before) {
            (None, _) => CategoryState::Stale,
            (Some(at), Some(limit)) if at < limit => CategoryState::Stale,
            (Some(_), _) => CategoryState::Ready,
        })
    }
}

fn run_update(engine: &dyn ActiveBitPreservation, replica: &ReplicaId, kind: UpdateKind) -> PreservationResult<()> {
    info!(replica = %replica, kind = %kind, "update started");
    match kind {
        UpdateKind::MissingFiles => engine.find_missing_files(replica)?,
        UpdateKind::ChecksumErrors => engine.find_changed_files(replica)?,
    }
    info!(replica = %replica, kind = %kind, "update finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreservationConfig;
    use crate::engine::FileBasedActiveBitPreservation;
    use crate::repair::RepairReport;
    use crate::state::FilePreservationState;
    use crossbeam_channel::Sender;
    use nas_archive::LocalArchive;
    use nas_types::{Replica, ReplicaKind, ReplicaSet};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn replicas() -> ReplicaSet {
        ReplicaSet::new(vec![
            Replica::new("ONE", "ReplicaOne", ReplicaKind::Bitarchive),
            Replica::new("CS", "ChecksumReplica", ReplicaKind::Checksum),
        ])
        .unwrap()
    }

    /// Engine whose updates block until released.
    struct Gated {
        replicas: ReplicaSet,
        release: Receiver<()>,
        calls: AtomicUsize,
    }

    impl Gated {
        fn new() -> (Self, Sender<()>) {
            let (tx, rx) = bounded(0);
            let engine = Self {
                replicas: replicas(),
                release: rx,
                calls: AtomicUsize::new(0),
            };
            (engine, tx)
        }

        fn wait(&self) -> PreservationResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release
                .recv_timeout(Duration::from_secs(10))
                .map_err(|e| PreservationError::IllegalState(e.to_string()))
        }
    }

    impl ActiveBitPreservation for Gated {
        fn replicas(&self) -> &ReplicaSet {
            &self.replicas
        }
        fn find_missing_files(&self, _: &ReplicaId) -> PreservationResult<()> {
            self.wait()
        }
        fn find_changed_files(&self, _: &ReplicaId) -> PreservationResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PreservationError::IllegalState("checksum job exploded".into()))
        }
        fn get_missing_files(&self, _: &ReplicaId) -> PreservationResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn get_changed_files(&self, _: &ReplicaId) -> PreservationResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn get_number_of_files(&self, _: &ReplicaId) -> PreservationResult<Option<u64>> {
            Ok(None)
        }
        fn get_number_of_missing_files(&self, _: &ReplicaId) -> PreservationResult<Option<u64>> {
            Ok(None)
        }
        fn get_number_of_changed_files(&self, _: &ReplicaId) -> PreservationResult<Option<u64>> {
            Ok(None)
        }
        fn get_date_for_missing_files(&self, _: &ReplicaId) -> PreservationResult<Option<DateTime<Utc>>> {
            Ok(None)
        }
        fn get_date_for_changed_files(&self, _: &ReplicaId) -> PreservationResult<Option<DateTime<Utc>>> {
            Ok(None)
        }
        fn get_file_preservation_state(&self, _: &str) -> PreservationResult<Option<FilePreservationState>> {
            Ok(None)
        }
        fn get_file_preservation_states(
            &self,
            _: &[String],
        ) -> PreservationResult<BTreeMap<String, Option<FilePreservationState>>> {
            Ok(BTreeMap::new())
        }
        fn upload_missing_files(&self, replica: &ReplicaId, _: &[String]) -> PreservationResult<RepairReport> {
            Ok(RepairReport::new(crate::repair::RepairOp::UploadMissing, replica.clone()))
        }
        fn change_state_for_admin_data(&self, _: &str) -> PreservationResult<()> {
            Ok(())
        }
        fn replace_changed_file(&self, replica: &ReplicaId, _: &str, _: &str, _: &str) -> PreservationResult<RepairReport> {
            Ok(RepairReport::new(crate::repair::RepairOp::ReplaceChanged, replica.clone()))
        }
    }

    #[test]
    fn identical_requests_coalesce() {
        let (engine, release) = Gated::new();
        let engine = Arc::new(engine);
        let updater = BitPreservationUpdater::new(engine.clone());
        let one = ReplicaId::new("ONE");

        let UpdateTicket::Started(outcome) = updater.submit(one.clone(), UpdateKind::MissingFiles).unwrap() else {
            panic!("first request should start");
        };
        assert!(updater.is_running(&one, UpdateKind::MissingFiles));
        assert_eq!(updater.state(&one, UpdateKind::MissingFiles, None).unwrap(), CategoryState::Updating);
        assert!(matches!(
            updater.submit(one.clone(), UpdateKind::MissingFiles).unwrap(),
            UpdateTicket::AlreadyRunning
        ));
        // A different kind is not coalesced with it.
        let UpdateTicket::Started(other) = updater.submit(one.clone(), UpdateKind::ChecksumErrors).unwrap() else {
            panic!("other kind should start");
        };
        assert!(other.recv_timeout(Duration::from_secs(10)).unwrap().is_err());

        release.send(()).unwrap();
        outcome.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
        assert!(!updater.is_running(&one, UpdateKind::MissingFiles));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(updater.state(&one, UpdateKind::MissingFiles, None).unwrap(), CategoryState::Stale);
    }

    #[test]
    fn foreground_run_refused_while_update_in_flight() {
        let (engine, release) = Gated::new();
        let engine = Arc::new(engine);
        let updater = BitPreservationUpdater::new(engine.clone());
        let one = ReplicaId::new("ONE");

        let UpdateTicket::Started(outcome) = updater.submit(one.clone(), UpdateKind::MissingFiles).unwrap() else {
            panic!("first request should start");
        };
        assert!(matches!(
            updater.run(&one, UpdateKind::MissingFiles),
            Err(PreservationError::AlreadyRunning(_))
        ));

        release.send(()).unwrap();
        outcome.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);

        // Free again once the background update is done.
        let runner = thread::spawn({
            let release = release.clone();
            move || release.send(()).unwrap()
        });
        updater.run(&one, UpdateKind::MissingFiles).unwrap();
        runner.join().unwrap();
        assert!(!updater.is_running(&one, UpdateKind::MissingFiles));
    }

    #[test]
    fn unknown_replica_rejected_synchronously() {
        let (engine, _release) = Gated::new();
        let updater = BitPreservationUpdater::new(Arc::new(engine));
        assert!(updater.submit(ReplicaId::new("NOPE"), UpdateKind::MissingFiles).is_err());
    }

    #[test]
    fn background_update_makes_category_ready() {
        let root = tempfile::tempdir().unwrap();
        let archive = Arc::new(LocalArchive::new(replicas(), &root.path().join("archive"), "pw").unwrap());
        let config = PreservationConfig {
            work_dir: root.path().join("work"),
            temp_dir: root.path().join("tmp"),
        };
        let engine = Arc::new(FileBasedActiveBitPreservation::new(archive, &config));
        let updater = BitPreservationUpdater::new(engine);
        let one = ReplicaId::new("ONE");
        assert_eq!(updater.state(&one, UpdateKind::ChecksumErrors, None).unwrap(), CategoryState::Stale);

        let UpdateTicket::Started(outcome) = updater.submit(one.clone(), UpdateKind::ChecksumErrors).unwrap() else {
            panic!("update should start");
        };
        outcome.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();

        assert_eq!(updater.state(&one, UpdateKind::ChecksumErrors, None).unwrap(), CategoryState::Ready);
        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(
            updater.state(&one, UpdateKind::ChecksumErrors, Some(future)).unwrap(),
            CategoryState::Stale
        );
    }

    #[test]
    fn kind_parses() {
        assert_eq!("missing".parse::<UpdateKind>().unwrap(), UpdateKind::MissingFiles);
        assert_eq!(UpdateKind::ChecksumErrors.to_string(), "checksum");
        assert!("everything".parse::<UpdateKind>().is_err());
    }
}
