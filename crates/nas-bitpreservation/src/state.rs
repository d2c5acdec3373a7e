use std::collections::BTreeMap;
use std::fmt;

use nas_archive::AdminEntry;
use nas_types::{Replica, ReplicaId, ReplicaSet, ReplicaStoreState};
use tracing::trace;

/// What admin data and every replica say about one file.
///
/// Built fresh for each query and never persisted.
#[derive(Clone, Debug)]
pub struct FilePreservationState {
    filename: String,
    admin: AdminEntry,
    replicas: Vec<Replica>,
    checksums: BTreeMap<ReplicaId, Vec<String>>,
}

impl FilePreservationState {
    /// `checksums` holds what each replica reported; replicas absent from
    /// the map reported nothing.
    pub fn new(
        filename: impl Into<String>,
        admin: AdminEntry,
        replicas: &ReplicaSet,
        checksums: BTreeMap<ReplicaId, Vec<String>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            admin,
            replicas: replicas.iter().cloned().collect(),
            checksums,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn admin_checksum(&self) -> &str {
        &self.admin.checksum
    }

    pub fn admin_state(&self, replica: &ReplicaId) -> Option<ReplicaStoreState> {
        self.admin.store_state(replica)
    }

    pub fn replica_checksums(&self, replica: &ReplicaId) -> &[String] {
        self.checksums.get(replica).map_or(&[], Vec::as_slice)
    }

    /// The replica's checksum if it reported exactly one value (possibly
    /// repeated), otherwise the empty string.
    pub fn unique_checksum(&self, replica: &ReplicaId) -> &str {
        let mut found: Option<&str> = None;
        for sum in self.replica_checksums(replica) {
            match found {
                Some(prev) if prev != sum => return "",
                _ => found = Some(sum),
            }
        }
        found.unwrap_or("")
    }

    /// Votes needed for a checksum to count as the reference.
    pub fn majority(&self) -> usize {
        (self.replicas.len() + 1) / 2 + 1
    }

    /// The checksum a majority agrees on, or the empty string.
    ///
    /// Admin data casts one vote, and so does every replica with its
    /// unique checksum.
    pub fn reference_checksum(&self) -> String {
        let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
        *votes.entry(self.admin_checksum()).or_default() += 1;
        for replica in &self.replicas {
            *votes.entry(self.unique_checksum(&replica.id)).or_default() += 1;
        }
        let needed = self.majority();
        let winner = votes
            .iter()
            .find(|&(_, &count)| count >= needed)
            .map(|(sum, _)| sum.to_string())
            .unwrap_or_default();
        trace!(file = %self.filename, votes = ?votes, needed, reference = %winner, "checksum vote");
        winner
    }

    /// The first bitarchive holding exactly the reference checksum.
    pub fn reference_replica(&self) -> Option<&Replica> {
        let reference = self.reference_checksum();
        if reference.is_empty() {
            return None;
        }
        self.replicas
            .iter()
            .filter(|r| r.is_bitarchive())
            .find(|r| self.unique_checksum(&r.id) == reference)
    }

    /// True when admin data's checksum is the reference, or no reference
    /// exists.
    pub fn is_admin_checksum_ok(&self) -> bool {
        let reference = self.reference_checksum();
        reference.is_empty() || reference == self.admin_checksum()
    }

    /// Admin store states agree with what the replicas hold, and the admin
    /// checksum agrees with the majority.
    ///
    /// A replica without the file must be recorded as upload started or
    /// failed. A replica with the file must be recorded as completed, and
    /// then admin data needs a checksum.
    pub fn is_admin_data_ok(&self) -> bool {
        for replica in &self.replicas {
            let state = self.admin_state(&replica.id);
            if self.replica_checksums(&replica.id).is_empty() {
                if !state.is_some_and(|s| s.allows_absence()) {
                    return false;
                }
            } else {
                if state != Some(ReplicaStoreState::UploadCompleted) {
                    return false;
                }
                if self.admin_checksum().is_empty() {
                    return false;
                }
            }
        }
        self.is_admin_checksum_ok()
    }

    pub fn file_is_missing(&self, replica: &ReplicaId) -> bool {
        self.replica_checksums(replica).is_empty()
    }
}

impl fmt::Display for FilePreservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (admin checksum '{}')", self.filename, self.admin_checksum())?;
        for replica in &self.replicas {
            let state = self
                .admin_state(&replica.id)
                .map_or_else(|| "-".to_string(), |s| s.to_string());
            writeln!(
                f,
                "  {:<10} {:<18} {}",
                replica.id,
                state,
                self.replica_checksums(&replica.id).join(",")
            )?;
        }
        Ok(())
    }
}
