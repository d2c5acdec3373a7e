use std::path::PathBuf;

use nas_types::{Replica, ReplicaKind, ReplicaSet};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveResult;

/// One replica of a local archive and the directory holding its files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub id: String,
    pub name: String,
    pub kind: ReplicaKind,
    pub dir: PathBuf,
}

/// Configuration of the archive transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub replicas: Vec<ReplicaConfig>,
    /// Where batch result files are spooled.
    pub spool_dir: PathBuf,
    /// Admin data file; in-memory when unset.
    pub admin_file: Option<PathBuf>,
    /// Credentials required to remove a file from a replica.
    pub credentials: String,
    /// Suffix, after the job id, of metadata file names.
    pub metadata_suffix: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        let replica = |id: &str, name: &str, kind| ReplicaConfig {
            id: id.into(),
            name: name.into(),
            kind,
            dir: PathBuf::from("archive").join(id),
        };
        Self {
            replicas: vec![
                replica("ONE", "ReplicaOne", ReplicaKind::Bitarchive),
                replica("TWO", "ReplicaTwo", ReplicaKind::Bitarchive),
                replica("CS", "ChecksumReplica", ReplicaKind::Checksum),
            ],
            spool_dir: PathBuf::from("archive/spool"),
            admin_file: Some(PathBuf::from("archive/admin.json")),
            credentials: String::new(),
            metadata_suffix: r"-metadata-[0-9]+\.(w)?arc(\.gz)?".into(),
        }
    }
}

impl ArchiveConfig {
    pub fn replica_set(&self) -> ArchiveResult<ReplicaSet> {
        let replicas = self
            .replicas
            .iter()
            .map(|r| Replica::new(r.id.clone(), r.name.clone(), r.kind))
            .collect();
        Ok(ReplicaSet::new(replicas)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_two_bitarchives() {
        let config = ArchiveConfig::default();
        let set = config.replica_set().unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.bitarchives().count(), 2);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: ArchiveConfig = serde_json::from_str(r#"{"credentials":"secret"}"#).unwrap();
        assert_eq!(config.credentials, "secret");
        assert_eq!(config.replicas.len(), 3);
    }
}
