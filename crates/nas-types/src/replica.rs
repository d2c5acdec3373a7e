use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The kind of storage a replica provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaKind {
    /// Full copies of the archive files.
    Bitarchive,
    /// Checksums only; files cannot be fetched from here.
    Checksum,
}

impl fmt::Display for ReplicaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitarchive => write!(f, "BITARCHIVE"),
            Self::Checksum => write!(f, "CHECKSUM"),
        }
    }
}

/// Short, stable identifier of a replica (e.g. `"ONE"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One independently maintained copy of the archive.
///
/// Replicas are immutable and registered once, at startup, in a
/// [`ReplicaSet`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replica {
    pub id: ReplicaId,
    pub name: String,
    pub kind: ReplicaKind,
}

impl Replica {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ReplicaKind) -> Self {
        Self {
            id: ReplicaId::new(id),
            name: name.into(),
            kind,
        }
    }

    pub fn is_bitarchive(&self) -> bool {
        self.kind == ReplicaKind::Bitarchive
    }
}

impl fmt::Display for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.id, self.kind)
    }
}

/// The fixed, globally known set of replicas.
///
/// Iteration order is registration order. Lookups by id or name reject
/// unknown values with [`TypeError::UnknownReplica`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Replica>", into = "Vec<Replica>")]
pub struct ReplicaSet {
    replicas: Vec<Replica>,
}

impl ReplicaSet {
    /// Register the given replicas. Ids and names must be unique.
    pub fn new(replicas: Vec<Replica>) -> Result<Self, TypeError> {
        let mut ids = BTreeMap::new();
        let mut names = BTreeMap::new();
        for r in &replicas {
            if r.id.as_str().is_empty() {
                return Err(TypeError::InvalidArgument("replica id must not be empty".into()));
            }
            if ids.insert(r.id.clone(), ()).is_some() {
                return Err(TypeError::DuplicateReplica(r.id.to_string()));
            }
            if names.insert(r.name.clone(), ()).is_some() {
                return Err(TypeError::DuplicateReplica(r.name.clone()));
            }
        }
        Ok(Self { replicas })
    }

    pub fn by_id(&self, id: &ReplicaId) -> Result<&Replica, TypeError> {
        self.replicas
            .iter()
            .find(|r| &r.id == id)
            .ok_or_else(|| TypeError::UnknownReplica(id.to_string()))
    }

    pub fn by_name(&self, name: &str) -> Result<&Replica, TypeError> {
        self.replicas
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| TypeError::UnknownReplica(name.to_string()))
    }

    /// Resolve either an id or a name; ids win on ambiguity.
    pub fn resolve(&self, id_or_name: &str) -> Result<&Replica, TypeError> {
        self.by_id(&ReplicaId::from(id_or_name))
            .or_else(|_| self.by_name(id_or_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.iter()
    }

    /// All bitarchive replicas, in registration order.
    pub fn bitarchives(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.iter().filter(|r| r.is_bitarchive())
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }
}

impl TryFrom<Vec<Replica>> for ReplicaSet {
    type Error = TypeError;

    fn try_from(value: Vec<Replica>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ReplicaSet> for Vec<Replica> {
    fn from(value: ReplicaSet) -> Self {
        value.replicas
    }
}
