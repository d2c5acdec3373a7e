//! Admin data: the system of record for archived files.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use nas_types::{ReplicaId, ReplicaStoreState};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};

/// What admin data records about one file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminEntry {
    pub checksum: String,
    pub store_states: BTreeMap<ReplicaId, ReplicaStoreState>,
}

impl AdminEntry {
    pub fn new(checksum: impl Into<String>) -> Self {
        Self {
            checksum: checksum.into(),
            store_states: BTreeMap::new(),
        }
    }

    pub fn with_state(mut self, replica: impl Into<ReplicaId>, state: ReplicaStoreState) -> Self {
        self.store_states.insert(replica.into(), state);
        self
    }

    pub fn store_state(&self, replica: &ReplicaId) -> Option<ReplicaStoreState> {
        self.store_states.get(replica).copied()
    }
}

/// Read-only snapshot of admin data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminData {
    entries: BTreeMap<String, AdminEntry>,
}

impl AdminData {
    pub fn new(entries: BTreeMap<String, AdminEntry>) -> Self {
        Self { entries }
    }

    pub fn entry(&self, filename: &str) -> Option<&AdminEntry> {
        self.entries.get(filename)
    }

    pub fn has_entry(&self, filename: &str) -> bool {
        self.entries.contains_key(filename)
    }

    pub fn checksum(&self, filename: &str) -> Option<&str> {
        self.entries.get(filename).map(|e| e.checksum.as_str())
    }

    pub fn file_names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AdminEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutable admin data, optionally persisted as JSON.
///
/// Every mutation rewrites the backing file through a temp file and rename.
pub struct AdminStore {
    entries: RwLock<BTreeMap<String, AdminEntry>>,
    path: Option<PathBuf>,
}

impl AdminStore {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Load admin data from `path`, starting empty when the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text).map_err(|e| ArchiveError::Serialization(e.to_string()))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), "admin data loaded");
        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> AdminData {
        AdminData::new(self.entries.read().expect("admin lock poisoned").clone())
    }

    pub fn get(&self, filename: &str) -> Option<AdminEntry> {
        self.entries
            .read()
            .expect("admin lock poisoned")
            .get(filename)
            .cloned()
    }

    /// Insert or replace an entry.
    pub fn insert(&self, filename: impl Into<String>, entry: AdminEntry) -> ArchiveResult<()> {
        self.mutate(|map| {
            map.insert(filename.into(), entry);
            Ok(())
        })
    }

    /// Create the entry if absent; fill in the checksum if it is empty.
    pub fn ensure_entry(&self, filename: &str, checksum: &str) -> ArchiveResult<()> {
        self.mutate(|map| {
            let entry = map.entry(filename.to_string()).or_default();
            if entry.checksum.is_empty() {
                entry.checksum = checksum.to_string();
            }
            Ok(())
        })
    }

    pub fn set_state(
        &self,
        filename: &str,
        replica: &ReplicaId,
        state: ReplicaStoreState,
    ) -> ArchiveResult<()> {
        self.mutate(|map| {
            let entry = map
                .get_mut(filename)
                .ok_or_else(|| ArchiveError::NotFound(format!("no admin entry for {filename}")))?;
            entry.store_states.insert(replica.clone(), state);
            Ok(())
        })
    }

    pub fn set_checksum(&self, filename: &str, checksum: &str) -> ArchiveResult<()> {
        self.mutate(|map| {
            let entry = map
                .get_mut(filename)
                .ok_or_else(|| ArchiveError::NotFound(format!("no admin entry for {filename}")))?;
            entry.checksum = checksum.to_string();
            Ok(())
        })
    }

    fn mutate<F>(&self, f: F) -> ArchiveResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, AdminEntry>) -> ArchiveResult<()>,
    {
        let mut map = self.entries.write().expect("admin lock poisoned");
        f(&mut map)?;
        if let Some(path) = &self.path {
            persist(path, &map)?;
        }
        Ok(())
    }
}

impl Default for AdminStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for AdminStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.entries.read().expect("admin lock poisoned").len();
        f.debug_struct("AdminStore")
            .field("entries", &count)
            .field("path", &self.path)
            .finish()
    }
}

fn persist(path: &Path, map: &BTreeMap<String, AdminEntry>) -> ArchiveResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(map).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
