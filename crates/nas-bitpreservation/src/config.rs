use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where reconciliation keeps its work files and scratch copies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreservationConfig {
    pub work_dir: PathBuf,
    /// Files fetched from a reference replica are staged here before they
    /// are stored again.
    pub temp_dir: PathBuf,
}

impl Default for PreservationConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("bitpreservation"),
            temp_dir: PathBuf::from("bitpreservation/tmp"),
        }
    }
}
