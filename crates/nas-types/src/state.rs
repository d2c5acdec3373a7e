use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Admin-data store state of one file on one replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicaStoreState {
    UploadStarted,
    DataUploaded,
    UploadCompleted,
    UploadFailed,
}

impl ReplicaStoreState {
    /// States in which the replica is not expected to hold the file yet.
    pub fn allows_absence(&self) -> bool {
        matches!(self, Self::UploadStarted | Self::UploadFailed)
    }
}

impl fmt::Display for ReplicaStoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UploadStarted => "UPLOAD_STARTED",
            Self::DataUploaded => "DATA_UPLOADED",
            Self::UploadCompleted => "UPLOAD_COMPLETED",
            Self::UploadFailed => "UPLOAD_FAILED",
        };
        f.write_str(s)
    }
}

impl FromStr for ReplicaStoreState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPLOAD_STARTED" => Ok(Self::UploadStarted),
            "DATA_UPLOADED" => Ok(Self::DataUploaded),
            "UPLOAD_COMPLETED" => Ok(Self::UploadCompleted),
            "UPLOAD_FAILED" => Ok(Self::UploadFailed),
            other => Err(TypeError::UnknownStoreState(other.to_string())),
        }
    }
}
