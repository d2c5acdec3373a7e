use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nas_types::{checksum, ReplicaId, ReplicaSet, ReplicaStoreState};
use tracing::{debug, info, warn};

use crate::admin::{AdminData, AdminStore};
use crate::client::ArchiveClient;
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, ArchiveResult};
use crate::job::BatchJob;
use crate::record::{ArchiveRecord, RecordCodec, SimpleRecordCodec};
use crate::runner::BatchRunner;
use crate::status::BatchStatus;

/// An archive whose replicas are local directories.
///
/// Each replica keeps its files flat in its own directory. Admin data lives
/// in an [`AdminStore`]. Checksum replicas hold files too, but refuse to
/// hand them out.
pub struct LocalArchive {
    replicas: ReplicaSet,
    dirs: BTreeMap<ReplicaId, PathBuf>,
    runner: BatchRunner,
    admin: AdminStore,
    codec: Arc<dyn RecordCodec>,
    credentials: String,
}

impl LocalArchive {
    /// Lay out replicas as `<root>/<replica-id>` with a spool dir at
    /// `<root>/spool` and in-memory admin data.
    pub fn new(replicas: ReplicaSet, root: &Path, credentials: impl Into<String>) -> ArchiveResult<Self> {
        let dirs = replicas
            .iter()
            .map(|r| (r.id.clone(), root.join(r.id.as_str())))
            .collect();
        Self::assemble(replicas, dirs, root.join("spool"), AdminStore::in_memory(), credentials.into())
    }

    pub fn from_config(config: &ArchiveConfig) -> ArchiveResult<Self> {
        let replicas = config.replica_set()?;
        let dirs = config
            .replicas
            .iter()
            .map(|r| (ReplicaId::new(r.id.clone()), r.dir.clone()))
            .collect();
        let admin = match &config.admin_file {
            Some(path) => AdminStore::open(path)?,
            None => AdminStore::in_memory(),
        };
        Self::assemble(
            replicas,
            dirs,
            config.spool_dir.clone(),
            admin,
            config.credentials.clone(),
        )
    }

    fn assemble(
        replicas: ReplicaSet,
        dirs: BTreeMap<ReplicaId, PathBuf>,
        spool_dir: PathBuf,
        admin: AdminStore,
        credentials: String,
    ) -> ArchiveResult<Self> {
        for dir in dirs.values() {
            fs::create_dir_all(dir)?;
        }
        fs::create_dir_all(&spool_dir)?;
        Ok(Self {
            replicas,
            dirs,
            runner: BatchRunner::new(spool_dir),
            admin,
            codec: Arc::new(SimpleRecordCodec),
            credentials,
        })
    }

    pub fn with_codec(mut self, codec: Arc<dyn RecordCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn admin_store(&self) -> &AdminStore {
        &self.admin
    }

    pub fn replica_dir(&self, replica: &ReplicaId) -> ArchiveResult<&Path> {
        self.replicas.by_id(replica)?;
        self.dirs
            .get(replica)
            .map(PathBuf::as_path)
            .ok_or_else(|| ArchiveError::IllegalState(format!("no directory for replica {replica}")))
    }

    fn file_on(&self, replica: &ReplicaId, filename: &str) -> ArchiveResult<PathBuf> {
        if filename.is_empty() || filename.contains(['/', '\\']) || filename.starts_with('.') {
            return Err(ArchiveError::InvalidArgument(format!("bad filename '{filename}'")));
        }
        Ok(self.replica_dir(replica)?.join(filename))
    }

    fn copy_into(src: &Path, dest: &Path) -> ArchiveResult<()> {
        let name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::InvalidArgument(format!("bad path {}", dest.display())))?;
        let tmp = dest.with_file_name(format!(".{name}.tmp"));
        fs::copy(src, &tmp)?;
        fs::rename(&tmp, dest)?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalArchive")
            .field("replicas", &self.replicas.len())
            .field("dirs", &self.dirs)
            .field("admin", &self.admin)
            .finish()
    }
}

impl ArchiveClient for LocalArchive {
    fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    fn batch(&self, job: Arc<dyn BatchJob>, replica: &ReplicaId) -> ArchiveResult<BatchStatus> {
        let dir = self.replica_dir(replica)?;
        debug!(job = job.name(), replica = %replica, "running batch job");
        self.runner.run(job.as_ref(), replica, dir)
    }

    fn store(&self, file: &Path) -> ArchiveResult<()> {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::InvalidArgument(format!("bad path {}", file.display())))?;
        let sum = checksum::file_checksum(file)?;

        if let Some(existing) = self.admin.get(name) {
            if !existing.checksum.is_empty() && existing.checksum != sum {
                return Err(ArchiveError::PermissionDenied(format!(
                    "{name} is already archived with a different checksum"
                )));
            }
        }
        self.admin.ensure_entry(name, &sum)?;

        for replica in self.replicas.iter() {
            let target = self.file_on(&replica.id, name)?;
            if target.exists() {
                debug!(file = name, replica = %replica.id, "already present, not storing");
                continue;
            }
            self.admin.set_state(name, &replica.id, ReplicaStoreState::UploadStarted)?;
            if let Err(e) = Self::copy_into(file, &target) {
                warn!(file = name, replica = %replica.id, error = %e, "store failed");
                self.admin.set_state(name, &replica.id, ReplicaStoreState::UploadFailed)?;
                return Err(e);
            }
            self.admin.set_state(name, &replica.id, ReplicaStoreState::UploadCompleted)?;
            info!(file = name, replica = %replica.id, "stored");
        }
        Ok(())
    }

    fn get_file(&self, filename: &str, replica: &ReplicaId, dest: &Path) -> ArchiveResult<()> {
        if !self.replicas.by_id(replica)?.is_bitarchive() {
            return Err(ArchiveError::IllegalState(format!(
                "cannot fetch files from checksum replica {replica}"
            )));
        }
        let src = self.file_on(replica, filename)?;
        if !src.exists() {
            return Err(ArchiveError::NotFound(format!("{filename} on {replica}")));
        }
        fs::copy(&src, dest)?;
        Ok(())
    }

    fn get(&self, filename: &str, offset: u64) -> ArchiveResult<ArchiveRecord> {
        for replica in self.replicas.bitarchives() {
            let path = self.file_on(&replica.id, filename)?;
            if path.exists() {
                return self.codec.read_at(&path, offset);
            }
        }
        Err(ArchiveError::NotFound(filename.to_string()))
    }

    fn remove_and_get_file(
        &self,
        filename: &str,
        replica: &ReplicaId,
        checksum: &str,
        credentials: &str,
    ) -> ArchiveResult<PathBuf> {
        if credentials != self.credentials {
            return Err(ArchiveError::PermissionDenied("wrong credentials".into()));
        }
        let path = self.file_on(replica, filename)?;
        if !path.exists() {
            return Err(ArchiveError::NotFound(format!("{filename} on {replica}")));
        }
        let actual = checksum::file_checksum(&path)?;
        if actual != checksum {
            return Err(ArchiveError::PermissionDenied(format!(
                "checksum of {filename} on {replica} is {actual}, not {checksum}"
            )));
        }

        let removed_dir = self.runner.spool_dir().join("removed").join(replica.as_str());
        fs::create_dir_all(&removed_dir)?;
        let removed = removed_dir.join(filename);
        if fs::rename(&path, &removed).is_err() {
            fs::copy(&path, &removed)?;
            fs::remove_file(&path)?;
        }
        info!(file = filename, replica = %replica, "removed file from replica");
        Ok(removed)
    }

    fn update_admin_data(
        &self,
        filename: &str,
        replica: &ReplicaId,
        state: ReplicaStoreState,
    ) -> ArchiveResult<()> {
        self.replicas.by_id(replica)?;
        self.admin.set_state(filename, replica, state)
    }

    fn update_admin_checksum(&self, filename: &str, checksum: &str) -> ArchiveResult<()> {
        self.admin.set_checksum(filename, checksum)
    }

    fn admin_data(&self) -> ArchiveResult<AdminData> {
        Ok(self.admin.snapshot())
    }
}
