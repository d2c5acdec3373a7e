use std::collections::BTreeMap;
use std::fmt;

use nas_types::ReplicaId;
use serde::Serialize;

/// The repair operations, as named in logs and reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairOp {
    UploadMissing,
    ReplaceChanged,
    FixAdminChecksum,
}

impl fmt::Display for RepairOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UploadMissing => "upload-missing",
            Self::ReplaceChanged => "replace-changed",
            Self::FixAdminChecksum => "fix-admin-checksum",
        };
        f.write_str(s)
    }
}

/// How the repair of one file ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "lowercase")]
pub enum RepairOutcome {
    Repaired,
    Failed(String),
}

/// Per-file outcome of a repair request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub op: RepairOp,
    pub replica: ReplicaId,
    pub outcomes: BTreeMap<String, RepairOutcome>,
}

impl RepairReport {
    pub fn new(op: RepairOp, replica: ReplicaId) -> Self {
        Self {
            op,
            replica,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn repaired(&mut self, filename: impl Into<String>) {
        self.outcomes.insert(filename.into(), RepairOutcome::Repaired);
    }

    pub fn failed(&mut self, filename: impl Into<String>, message: impl Into<String>) {
        self.outcomes
            .insert(filename.into(), RepairOutcome::Failed(message.into()));
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(|o| *o == RepairOutcome::Repaired)
    }

    pub fn repaired_files(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| **o == RepairOutcome::Repaired)
            .map(|(f, _)| f.as_str())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|(f, o)| match o {
            RepairOutcome::Failed(msg) => Some((f.as_str(), msg.as_str())),
            RepairOutcome::Repaired => None,
        })
    }

    /// Fold in the outcomes of a follow-up repair.
    pub fn merge(&mut self, other: RepairReport) {
        self.outcomes.extend(other.outcomes);
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (file, outcome) in &self.outcomes {
            match outcome {
                RepairOutcome::Repaired => writeln!(f, "{file}: {} on {} done", self.op, self.replica)?,
                RepairOutcome::Failed(msg) => writeln!(f, "{file}: {} on {} failed: {msg}", self.op, self.replica)?,
            }
        }
        Ok(())
    }
}
