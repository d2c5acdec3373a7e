use std::path::{Path, PathBuf};
use std::sync::Arc;

use nas_types::{ReplicaId, ReplicaSet, ReplicaStoreState};

use crate::admin::AdminData;
use crate::error::ArchiveResult;
use crate::job::BatchJob;
use crate::record::ArchiveRecord;
use crate::status::BatchStatus;

/// Access to the replicated archive.
///
/// Implementations must satisfy these invariants:
/// - `batch` never fails because of a single bad file; per-file failures are
///   reported through the returned [`BatchStatus`].
/// - `remove_and_get_file` mutates nothing unless both the credentials and
///   the checksum match.
/// - `admin_data` returns a snapshot; later mutations do not affect it.
pub trait ArchiveClient: Send + Sync {
    /// The replicas this archive knows about.
    fn replicas(&self) -> &ReplicaSet;

    /// Run `job` over the files on `replica`.
    fn batch(&self, job: Arc<dyn BatchJob>, replica: &ReplicaId) -> ArchiveResult<BatchStatus>;

    /// Store `file` on every replica that lacks it and record it in admin data.
    fn store(&self, file: &Path) -> ArchiveResult<()>;

    /// Copy `filename` from `replica` to `dest`.
    fn get_file(&self, filename: &str, replica: &ReplicaId, dest: &Path) -> ArchiveResult<()>;

    /// Fetch the record at `offset` of `filename` from any replica holding it.
    fn get(&self, filename: &str, offset: u64) -> ArchiveResult<ArchiveRecord>;

    /// Remove `filename` from `replica` and hand back the removed copy.
    ///
    /// Fails with `PermissionDenied` if the credentials are wrong or the
    /// file's checksum differs from `checksum`.
    fn remove_and_get_file(
        &self,
        filename: &str,
        replica: &ReplicaId,
        checksum: &str,
        credentials: &str,
    ) -> ArchiveResult<PathBuf>;

    fn update_admin_data(
        &self,
        filename: &str,
        replica: &ReplicaId,
        state: ReplicaStoreState,
    ) -> ArchiveResult<()>;

    fn update_admin_checksum(&self, filename: &str, checksum: &str) -> ArchiveResult<()>;

    fn admin_data(&self) -> ArchiveResult<AdminData>;
}
