//! Foundation types for the replicated web archive.
//!
//! Every other crate in the workspace depends on `nas-types`.
//!
//! # Key Types
//!
//! - [`Replica`] / [`ReplicaSet`] -- the fixed set of storage locations
//! - [`JobId`] -- harvest job identifier, used as the index cache key
//! - [`ReplicaStoreState`] -- admin-data upload state of a file on a replica
//! - [`checksum`] -- the `filename##checksum` line format

pub mod checksum;
pub mod error;
pub mod job;
pub mod replica;
pub mod state;

pub use error::{require_non_empty, TypeError};
pub use job::{parse_job_list, JobId};
pub use replica::{Replica, ReplicaId, ReplicaKind, ReplicaSet};
pub use state::ReplicaStoreState;
