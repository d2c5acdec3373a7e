//! Reconciliation of replicas against admin data, and the repairs that
//! follow from it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nas_archive::{ArchiveClient, ArchiveError, BatchJob, ChecksumJob, FileFilter, FileListJob};
use nas_types::{checksum, ReplicaId, ReplicaSet, ReplicaStoreState};
use tracing::{debug, info, warn};

use crate::config::PreservationConfig;
use crate::error::{PreservationError, PreservationResult};
use crate::repair::{RepairOp, RepairReport};
use crate::state::FilePreservationState;
use crate::workfiles::{WorkFileKind, WorkFiles};

/// Filenames listed in a warning before the rest is summarized.
const LOGGED_NAMES: usize = 10;

/// Finding and repairing differences between replicas and admin data.
pub trait ActiveBitPreservation: Send + Sync {
    fn replicas(&self) -> &ReplicaSet;

    /// List the replica's files and record which admin-data files it lacks
    /// and which of its files admin data does not know.
    fn find_missing_files(&self, replica: &ReplicaId) -> PreservationResult<()>;

    /// Checksum the replica's files and record which differ from admin data
    /// and which have the right checksum but the wrong store state.
    fn find_changed_files(&self, replica: &ReplicaId) -> PreservationResult<()>;

    fn get_missing_files(&self, replica: &ReplicaId) -> PreservationResult<Vec<String>>;

    fn get_changed_files(&self, replica: &ReplicaId) -> PreservationResult<Vec<String>>;

    /// Files on the replica at the last listing; `None` before the first.
    fn get_number_of_files(&self, replica: &ReplicaId) -> PreservationResult<Option<u64>>;

    fn get_number_of_missing_files(&self, replica: &ReplicaId) -> PreservationResult<Option<u64>>;

    fn get_number_of_changed_files(&self, replica: &ReplicaId) -> PreservationResult<Option<u64>>;

    fn get_date_for_missing_files(&self, replica: &ReplicaId) -> PreservationResult<Option<DateTime<Utc>>>;

    fn get_date_for_changed_files(&self, replica: &ReplicaId) -> PreservationResult<Option<DateTime<Utc>>>;

    /// `None` when the file is unknown to admin data.
    fn get_file_preservation_state(&self, filename: &str) -> PreservationResult<Option<FilePreservationState>>;

    fn get_file_preservation_states(
        &self,
        filenames: &[String],
    ) -> PreservationResult<BTreeMap<String, Option<FilePreservationState>>>;

    /// Copy each file from a reference replica into `replica`.
    fn upload_missing_files(&self, replica: &ReplicaId, filenames: &[String]) -> PreservationResult<RepairReport>;

    /// Set the admin checksum to the reference checksum.
    fn change_state_for_admin_data(&self, filename: &str) -> PreservationResult<()>;

    /// Remove a corrupt copy from `replica` and upload a good one.
    fn replace_changed_file(
        &self,
        replica: &ReplicaId,
        filename: &str,
        credentials: &str,
        checksum: &str,
    ) -> PreservationResult<RepairReport>;
}

/// [`ActiveBitPreservation`] keeping its findings in [`WorkFiles`].
pub struct FileBasedActiveBitPreservation {
    client: Arc<dyn ArchiveClient>,
    work: WorkFiles,
    temp_dir: PathBuf,
}

impl FileBasedActiveBitPreservation {
    pub fn new(client: Arc<dyn ArchiveClient>, config: &PreservationConfig) -> Self {
        Self {
            client,
            work: WorkFiles::new(&config.work_dir),
            temp_dir: config.temp_dir.clone(),
        }
    }

    pub fn work_files(&self) -> &WorkFiles {
        &self.work
    }

    fn check_replica(&self, replica: &ReplicaId) -> PreservationResult<()> {
        self.client.replicas().by_id(replica)?;
        Ok(())
    }

    /// Run `job` on the replica and install its results as the `kind` work
    /// file. A batch without results leaves an empty work file.
    fn run_batch(&self, job: Arc<dyn BatchJob>, replica: &ReplicaId, kind: WorkFileKind) -> PreservationResult<()> {
        let name = job.name().to_string();
        let status = self.client.batch(job, replica)?;
        if status.has_result_file() {
            let staging = self.work.staging(replica, kind)?;
            status.copy_results(staging.path())?;
            self.work.install(replica, kind, staging)?;
        } else {
            self.work.write(replica, kind, std::iter::empty::<&str>())?;
        }

        let expected = status.no_of_files_processed.saturating_sub(status.no_of_files_failed()) as u64;
        let found = self.work.count(replica, kind)?.unwrap_or(0);
        if found != expected {
            warn!(
                replica = %replica,
                job = %name,
                found,
                expected,
                "result line count does not match files processed"
            );
        }
        if !status.files_failed.is_empty() {
            warn!(
                replica = %replica,
                job = %name,
                failed = ?status.files_failed,
                "batch job failed on some files"
            );
        }
        info!(replica = %replica, job = %name, processed = status.no_of_files_processed, "batch job finished");
        Ok(())
    }

    /// Checksums each replica reports for `filenames`. A replica that cannot
    /// be asked contributes nothing.
    fn checksums_on(&self, replica: &ReplicaId, filenames: &BTreeSet<String>) -> BTreeMap<String, Vec<String>> {
        let mut found: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if filenames.is_empty() {
            return found;
        }
        let job = Arc::new(ChecksumJob::with_filter(FileFilter::named(filenames.iter().cloned())));
        let mut results = Vec::new();
        let outcome = self.client.batch(job, replica).and_then(|status| {
            if status.has_result_file() {
                status.append_results(&mut results)?;
            }
            Ok(())
        });
        if let Err(e) = outcome {
            warn!(replica = %replica, error = %e, "could not get checksums from replica");
            return found;
        }

        for line in String::from_utf8_lossy(&results).lines().filter(|l| !l.is_empty()) {
            match checksum::parse_line(line) {
                Ok((name, sum)) if filenames.contains(&name) => found.entry(name).or_default().push(sum),
                Ok((name, _)) => debug!(replica = %replica, file = %name, "checksum for a file not asked about"),
                Err(e) => warn!(replica = %replica, line, error = %e, "malformed checksum line"),
            }
        }
        found
    }

    fn reestablish(
        &self,
        replica: &ReplicaId,
        filename: &str,
        state: Option<FilePreservationState>,
    ) -> PreservationResult<()> {
        let unknown = || PreservationError::IllegalState(format!("no state known about '{filename}'"));
        let mut state = state.ok_or_else(unknown)?;
        if !state.is_admin_data_ok() {
            self.client
                .update_admin_data(filename, replica, ReplicaStoreState::UploadFailed)?;
            state = self.get_file_preservation_state(filename)?.ok_or_else(unknown)?;
        }

        if !state.is_admin_data_ok() {
            return Err(PreservationError::IllegalState(format!(
                "admin data is not consistent for '{filename}'"
            )));
        }
        if !state.file_is_missing(replica) {
            return Err(PreservationError::IllegalState(format!(
                "'{filename}' is not missing on {replica}"
            )));
        }
        let reference = state
            .reference_replica()
            .map(|r| r.id.clone())
            .ok_or_else(|| {
                PreservationError::IllegalState(format!("no correct copy of '{filename}' exists on any bitarchive"))
            })?;

        fs::create_dir_all(&self.temp_dir)?;
        let staging = tempfile::Builder::new()
            .prefix("bitpreservation-")
            .tempdir_in(&self.temp_dir)?;
        let copy = staging.path().join(filename);
        self.client.get_file(filename, &reference, &copy)?;
        self.client.store(&copy)?;
        info!(file = filename, replica = %replica, reference = %reference, "reestablished missing file");

        self.work.remove_line(replica, WorkFileKind::MissingFilesReplica, filename)?;
        self.work.append_line(replica, WorkFileKind::FilesOnReplica, filename)?;
        Ok(())
    }
}

fn non_empty(value: &str, name: &str) -> PreservationResult<()> {
    if value.trim().is_empty() {
        return Err(PreservationError::InvalidArgument(format!("{name} must not be empty")));
    }
    Ok(())
}

fn first_names(names: &BTreeSet<String>) -> Vec<&str> {
    names.iter().take(LOGGED_NAMES).map(String::as_str).collect()
}

impl ActiveBitPreservation for FileBasedActiveBitPreservation {
    fn replicas(&self) -> &ReplicaSet {
        self.client.replicas()
    }

    fn find_missing_files(&self, replica: &ReplicaId) -> PreservationResult<()> {
        self.check_replica(replica)?;
        self.run_batch(Arc::new(FileListJob::new()), replica, WorkFileKind::FilesOnReplica)?;

        let on_replica: BTreeSet<String> = self
            .work
            .lines(replica, WorkFileKind::FilesOnReplica)?
            .into_iter()
            .collect();
        let known = self.client.admin_data()?.file_names();

        let missing: BTreeSet<String> = known.difference(&on_replica).cloned().collect();
        if !missing.is_empty() {
            warn!(replica = %replica, count = missing.len(), files = ?first_names(&missing), "files missing on replica");
        }
        self.work.write(replica, WorkFileKind::MissingFilesReplica, &missing)?;

        let unknown: BTreeSet<String> = on_replica.difference(&known).cloned().collect();
        if !unknown.is_empty() {
            warn!(replica = %replica, count = unknown.len(), files = ?first_names(&unknown), "files unknown to admin data");
        }
        self.work.write(replica, WorkFileKind::MissingFilesAdminData, &unknown)?;
        Ok(())
    }

    fn find_changed_files(&self, replica: &ReplicaId) -> PreservationResult<()> {
        self.check_replica(replica)?;
        info!(replica = %replica, "bit integrity check started");
        self.run_batch(Arc::new(ChecksumJob::new()), replica, WorkFileKind::ChecksumsOnReplica)?;

        let admin = self.client.admin_data()?;
        let mut wrong_files = BTreeSet::new();
        let mut wrong_states = BTreeSet::new();
        for line in self.work.lines(replica, WorkFileKind::ChecksumsOnReplica)? {
            let (name, sum) = match checksum::parse_line(&line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(replica = %replica, line = %line, error = %e, "malformed checksum line");
                    continue;
                }
            };
            // Files unknown to admin data are reported by find_missing_files.
            let Some(entry) = admin.entry(&name) else {
                continue;
            };
            if entry.checksum != sum {
                wrong_files.insert(name);
            } else if entry.store_state(replica) != Some(ReplicaStoreState::UploadCompleted) {
                wrong_states.insert(name);
            }
        }
        // A file listed twice can have one good and one bad copy.
        for name in &wrong_files {
            wrong_states.remove(name);
        }

        if !wrong_files.is_empty() {
            warn!(replica = %replica, count = wrong_files.len(), files = ?first_names(&wrong_files), "files with wrong checksum");
        }
        if !wrong_states.is_empty() {
            warn!(replica = %replica, count = wrong_states.len(), files = ?first_names(&wrong_states), "files with wrong store state");
        }
        self.work.write(replica, WorkFileKind::WrongFiles, &wrong_files)?;
        self.work.write(replica, WorkFileKind::WrongStates, &wrong_states)?;
        Ok(())
    }

    fn get_missing_files(&self, replica: &ReplicaId) -> PreservationResult<Vec<String>> {
        self.check_replica(replica)?;
        self.work.lines(replica, WorkFileKind::MissingFilesReplica)
    }

    fn get_changed_files(&self, replica: &ReplicaId) -> PreservationResult<Vec<String>> {
        self.check_replica(replica)?;
        self.work.lines(replica, WorkFileKind::WrongFiles)
    }

    fn get_number_of_files(&self, replica: &ReplicaId) -> PreservationResult<Option<u64>> {
        self.check_replica(replica)?;
        self.work.count(replica, WorkFileKind::FilesOnReplica)
    }

    fn get_number_of_missing_files(&self, replica: &ReplicaId) -> PreservationResult<Option<u64>> {
        self.check_replica(replica)?;
        self.work.count(replica, WorkFileKind::MissingFilesReplica)
    }

    fn get_number_of_changed_files(&self, replica: &ReplicaId) -> PreservationResult<Option<u64>> {
        self.check_replica(replica)?;
        self.work.count(replica, WorkFileKind::WrongFiles)
    }

    fn get_date_for_missing_files(&self, replica: &ReplicaId) -> PreservationResult<Option<DateTime<Utc>>> {
        self.check_replica(replica)?;
        self.work.last_modified(replica, WorkFileKind::FilesOnReplica)
    }

    fn get_date_for_changed_files(&self, replica: &ReplicaId) -> PreservationResult<Option<DateTime<Utc>>> {
        self.check_replica(replica)?;
        self.work.last_modified(replica, WorkFileKind::WrongFiles)
    }

    fn get_file_preservation_state(&self, filename: &str) -> PreservationResult<Option<FilePreservationState>> {
        non_empty(filename, "filename")?;
        let mut states = self.get_file_preservation_states(&[filename.to_string()])?;
        Ok(states.remove(filename).flatten())
    }

    fn get_file_preservation_states(
        &self,
        filenames: &[String],
    ) -> PreservationResult<BTreeMap<String, Option<FilePreservationState>>> {
        for name in filenames {
            non_empty(name, "filename")?;
        }
        let admin = self.client.admin_data()?;
        let (known, unknown): (BTreeSet<String>, BTreeSet<String>) =
            filenames.iter().cloned().partition(|name| admin.has_entry(name));
        if !unknown.is_empty() {
            warn!(count = unknown.len(), files = ?first_names(&unknown), "files unknown to admin data");
        }

        // One checksum job per replica covers every file asked about.
        let mut per_file: BTreeMap<String, BTreeMap<ReplicaId, Vec<String>>> = BTreeMap::new();
        for replica in self.client.replicas().iter() {
            for (name, sums) in self.checksums_on(&replica.id, &known) {
                per_file.entry(name).or_default().insert(replica.id.clone(), sums);
            }
        }

        let mut states: BTreeMap<String, Option<FilePreservationState>> =
            unknown.into_iter().map(|name| (name, None)).collect();
        for name in known {
            let Some(entry) = admin.entry(&name).cloned() else {
                continue;
            };
            let checksums = per_file.remove(&name).unwrap_or_default();
            let state = FilePreservationState::new(name.clone(), entry, self.client.replicas(), checksums);
            states.insert(name, Some(state));
        }
        Ok(states)
    }

    fn upload_missing_files(&self, replica: &ReplicaId, filenames: &[String]) -> PreservationResult<RepairReport> {
        self.check_replica(replica)?;
        let mut report = RepairReport::new(RepairOp::UploadMissing, replica.clone());
        for (filename, state) in self.get_file_preservation_states(filenames)? {
            match self.reestablish(replica, &filename, state) {
                Ok(()) => report.repaired(filename),
                Err(e) => {
                    warn!(
                        file = %filename,
                        replica = %replica,
                        op = %RepairOp::UploadMissing,
                        error = %e,
                        "repair failed"
                    );
                    report.failed(filename, e.to_string());
                }
            }
        }
        Ok(report)
    }

    fn change_state_for_admin_data(&self, filename: &str) -> PreservationResult<()> {
        non_empty(filename, "filename")?;
        let state = self.get_file_preservation_state(filename)?.ok_or_else(|| {
            PreservationError::IllegalState(format!("'{filename}' is unknown to admin data"))
        })?;

        let reference = state.reference_checksum();
        if reference.is_empty() {
            warn!(file = filename, op = %RepairOp::FixAdminChecksum, "no reference checksum");
            return Err(PreservationError::PermissionDenied(format!(
                "no correct checksum for '{filename}'"
            )));
        }
        if state.admin_checksum() != reference {
            self.client.update_admin_checksum(filename, &reference)?;
            info!(file = filename, old = state.admin_checksum(), new = %reference, "admin checksum corrected");
        }
        for replica in self.client.replicas().iter() {
            if state.unique_checksum(&replica.id) == reference {
                self.work.remove_line(&replica.id, WorkFileKind::WrongFiles, filename)?;
            }
        }
        Ok(())
    }

    fn replace_changed_file(
        &self,
        replica: &ReplicaId,
        filename: &str,
        credentials: &str,
        checksum: &str,
    ) -> PreservationResult<RepairReport> {
        non_empty(filename, "filename")?;
        non_empty(checksum, "checksum")?;
        non_empty(credentials, "credentials")?;
        self.check_replica(replica)?;

        let removed = self
            .client
            .remove_and_get_file(filename, replica, checksum, credentials)
            .map_err(|e| {
                warn!(file = filename, replica = %replica, op = %RepairOp::ReplaceChanged, error = %e, "removal refused");
                match e {
                    ArchiveError::PermissionDenied(msg) => PreservationError::PermissionDenied(msg),
                    other => PreservationError::Archive(other),
                }
            })?;
        info!(file = filename, replica = %replica, kept_at = %removed.display(), "corrupt copy removed");

        self.work.append_line(replica, WorkFileKind::MissingFilesReplica, filename)?;
        self.work.remove_line(replica, WorkFileKind::FilesOnReplica, filename)?;

        let uploaded = self.upload_missing_files(replica, &[filename.to_string()])?;
        let mut report = RepairReport::new(RepairOp::ReplaceChanged, replica.clone());
        report.merge(uploaded);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nas_archive::LocalArchive;
    use nas_types::{Replica, ReplicaKind};

    const SECRET: &str = "secret";

    struct Fixture {
        _root: tempfile::TempDir,
        root: PathBuf,
        archive: Arc<LocalArchive>,
        engine: FileBasedActiveBitPreservation,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let path = root.path().to_path_buf();
            let set = ReplicaSet::new(vec![
                Replica::new("ONE", "ReplicaOne", ReplicaKind::Bitarchive),
                Replica::new("TWO", "ReplicaTwo", ReplicaKind::Bitarchive),
                Replica::new("CS", "ChecksumReplica", ReplicaKind::Checksum),
            ])
            .unwrap();
            let archive = Arc::new(LocalArchive::new(set, &path.join("archive"), SECRET).unwrap());
            let config = PreservationConfig {
                work_dir: path.join("work"),
                temp_dir: path.join("tmp"),
            };
            let engine = FileBasedActiveBitPreservation::new(archive.clone(), &config);
            Self {
                _root: root,
                root: path,
                archive,
                engine,
            }
        }

        /// Store `name` with `content` on every replica.
        fn store(&self, name: &str, content: &[u8]) {
            let src_dir = self.root.join("incoming");
            fs::create_dir_all(&src_dir).unwrap();
            let src = src_dir.join(name);
            fs::write(&src, content).unwrap();
            self.archive.store(&src).unwrap();
        }

        fn on(&self, replica: &str, name: &str) -> PathBuf {
            self.root.join("archive").join(replica).join(name)
        }
    }

    fn one() -> ReplicaId {
        ReplicaId::new("ONE")
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reads_before_update_are_illegal_state() {
        let fx = Fixture::new();
        assert!(matches!(fx.engine.get_missing_files(&one()), Err(PreservationError::IllegalState(_))));
        assert!(matches!(fx.engine.get_changed_files(&one()), Err(PreservationError::IllegalState(_))));
        assert_eq!(fx.engine.get_number_of_missing_files(&one()).unwrap(), None);
        assert_eq!(fx.engine.get_date_for_changed_files(&one()).unwrap(), None);
    }

    #[test]
    fn unknown_replica_rejected() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.engine.find_missing_files(&ReplicaId::new("NOPE")),
            Err(PreservationError::Type(_))
        ));
    }

    #[test]
    fn find_missing_files_diffs_both_ways() {
        let fx = Fixture::new();
        fx.store("a.arc", b"a");
        fx.store("b.arc", b"b");
        fs::remove_file(fx.on("ONE", "b.arc")).unwrap();
        fs::write(fx.on("ONE", "stray.arc"), b"?").unwrap();

        fx.engine.find_missing_files(&one()).unwrap();

        assert_eq!(fx.engine.get_missing_files(&one()).unwrap(), names(&["b.arc"]));
        assert_eq!(
            fx.engine.work_files().lines(&one(), WorkFileKind::MissingFilesAdminData).unwrap(),
            names(&["stray.arc"])
        );
        assert_eq!(fx.engine.get_number_of_files(&one()).unwrap(), Some(2));
        assert!(fx.engine.get_date_for_missing_files(&one()).unwrap().is_some());
    }

    #[test]
    fn empty_replica_gets_empty_listing() {
        let fx = Fixture::new();
        fx.engine.find_missing_files(&one()).unwrap();
        assert_eq!(fx.engine.get_number_of_files(&one()).unwrap(), Some(0));
        assert!(fx.engine.get_missing_files(&one()).unwrap().is_empty());
    }

    #[test]
    fn find_changed_files_reports_checksums_and_states() {
        let fx = Fixture::new();
        fx.store("good.arc", b"good");
        fx.store("bad.arc", b"bad");
        fx.store("pending.arc", b"pending");
        fs::write(fx.on("ONE", "bad.arc"), b"flipped").unwrap();
        fx.archive
            .update_admin_data("pending.arc", &one(), ReplicaStoreState::DataUploaded)
            .unwrap();
        fs::write(fx.on("ONE", "stray.arc"), b"?").unwrap();

        fx.engine.find_changed_files(&one()).unwrap();

        assert_eq!(fx.engine.get_changed_files(&one()).unwrap(), names(&["bad.arc"]));
        assert_eq!(
            fx.engine.work_files().lines(&one(), WorkFileKind::WrongStates).unwrap(),
            names(&["pending.arc"])
        );
        assert_eq!(fx.engine.get_number_of_changed_files(&one()).unwrap(), Some(1));
    }

    #[test]
    fn preservation_state_per_file() {
        let fx = Fixture::new();
        fx.store("a.arc", b"a");
        let states = fx.engine.get_file_preservation_states(&names(&["a.arc", "ghost.arc"])).unwrap();
        assert!(states["ghost.arc"].is_none());

        let state = states["a.arc"].as_ref().unwrap();
        let sum = checksum::bytes_checksum(b"a");
        assert_eq!(state.reference_checksum(), sum);
        for id in ["ONE", "TWO", "CS"] {
            assert_eq!(state.replica_checksums(&ReplicaId::new(id)), &[sum.clone()]);
        }
        assert!(state.is_admin_data_ok());
    }

    #[test]
    fn upload_repairs_only_what_it_can() {
        let fx = Fixture::new();
        fx.store("a.arc", b"a");
        fx.store("b.arc", b"b");
        fs::remove_file(fx.on("ONE", "a.arc")).unwrap();
        fs::remove_file(fx.on("ONE", "b.arc")).unwrap();
        // a.arc has no good copy left on any bitarchive.
        fs::remove_file(fx.on("TWO", "a.arc")).unwrap();
        fx.engine.find_missing_files(&one()).unwrap();
        assert_eq!(fx.engine.get_missing_files(&one()).unwrap(), names(&["a.arc", "b.arc"]));

        let report = fx.engine.upload_missing_files(&one(), &names(&["b.arc"])).unwrap();
        assert!(report.is_success());
        assert_eq!(fx.engine.get_missing_files(&one()).unwrap(), names(&["a.arc"]));
        assert_eq!(fs::read(fx.on("ONE", "b.arc")).unwrap(), b"b");
        assert!(fx
            .engine
            .work_files()
            .lines(&one(), WorkFileKind::FilesOnReplica)
            .unwrap()
            .contains(&"b.arc".to_string()));

        let report = fx.engine.upload_missing_files(&one(), &names(&["a.arc"])).unwrap();
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(fx.engine.get_missing_files(&one()).unwrap(), names(&["a.arc"]));
        assert!(!fx.on("ONE", "a.arc").exists());
    }

    #[test]
    fn upload_marks_inconsistent_admin_data_failed() {
        let fx = Fixture::new();
        fx.store("c.arc", b"c");
        fs::remove_file(fx.on("ONE", "c.arc")).unwrap();

        let report = fx.engine.upload_missing_files(&one(), &names(&["c.arc"])).unwrap();
        assert!(report.is_success());
        let admin = fx.archive.admin_data().unwrap();
        assert_eq!(
            admin.entry("c.arc").unwrap().store_state(&one()),
            Some(ReplicaStoreState::UploadCompleted)
        );
    }

    #[test]
    fn fix_admin_checksum_follows_majority() {
        let fx = Fixture::new();
        fx.store("d.arc", b"d");
        fx.archive.update_admin_checksum("d.arc", "bogus").unwrap();
        for id in ["ONE", "TWO"] {
            fx.engine.find_changed_files(&ReplicaId::new(id)).unwrap();
            assert_eq!(fx.engine.get_changed_files(&ReplicaId::new(id)).unwrap(), names(&["d.arc"]));
        }

        fx.engine.change_state_for_admin_data("d.arc").unwrap();

        let sum = checksum::bytes_checksum(b"d");
        assert_eq!(fx.archive.admin_data().unwrap().checksum("d.arc"), Some(sum.as_str()));
        for id in ["ONE", "TWO"] {
            assert!(fx.engine.get_changed_files(&ReplicaId::new(id)).unwrap().is_empty());
        }
    }

    #[test]
    fn fix_admin_checksum_needs_reference() {
        let fx = Fixture::new();
        fx.store("e.arc", b"e");
        fs::write(fx.on("ONE", "e.arc"), b"x").unwrap();
        fs::write(fx.on("TWO", "e.arc"), b"y").unwrap();
        fx.archive.update_admin_checksum("e.arc", "z").unwrap();

        assert!(matches!(
            fx.engine.change_state_for_admin_data("e.arc"),
            Err(PreservationError::PermissionDenied(_))
        ));
        assert_eq!(fx.archive.admin_data().unwrap().checksum("e.arc"), Some("z"));
    }

    #[test]
    fn replace_changed_file_restores_good_copy() {
        let fx = Fixture::new();
        fx.store("f.arc", b"good");
        fs::write(fx.on("ONE", "f.arc"), b"rotten").unwrap();
        fx.engine.find_missing_files(&one()).unwrap();
        let bad = checksum::bytes_checksum(b"rotten");

        let report = fx.engine.replace_changed_file(&one(), "f.arc", SECRET, &bad).unwrap();

        assert!(report.is_success(), "{report}");
        assert_eq!(fs::read(fx.on("ONE", "f.arc")).unwrap(), b"good");
        assert!(fx.engine.get_missing_files(&one()).unwrap().is_empty());
    }

    #[test]
    fn replace_with_bad_credentials_changes_nothing() {
        let fx = Fixture::new();
        fx.store("g.arc", b"good");
        fs::write(fx.on("ONE", "g.arc"), b"rotten").unwrap();
        fx.engine.find_missing_files(&one()).unwrap();
        let bad = checksum::bytes_checksum(b"rotten");
        let before = fx.engine.work_files().lines(&one(), WorkFileKind::FilesOnReplica).unwrap();

        assert!(matches!(
            fx.engine.replace_changed_file(&one(), "g.arc", "guess", &bad),
            Err(PreservationError::PermissionDenied(_))
        ));
        assert!(matches!(
            fx.engine.replace_changed_file(&one(), "g.arc", SECRET, "not-the-checksum"),
            Err(PreservationError::PermissionDenied(_))
        ));
        assert!(matches!(
            fx.engine.replace_changed_file(&one(), "g.arc", "", &bad),
            Err(PreservationError::InvalidArgument(_))
        ));

        assert_eq!(fs::read(fx.on("ONE", "g.arc")).unwrap(), b"rotten");
        assert_eq!(fx.engine.work_files().lines(&one(), WorkFileKind::FilesOnReplica).unwrap(), before);
        assert!(fx.engine.get_missing_files(&one()).unwrap().is_empty());
    }
}
