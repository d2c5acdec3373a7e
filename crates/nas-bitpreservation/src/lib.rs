//! Bit preservation across replicas.
//!
//! Each replica is compared with admin data, the system of record. An
//! update lists or checksums a replica and writes what it found to work
//! files. Repairs act on those findings: a missing file is copied from a
//! replica holding the majority checksum, a corrupt copy is replaced, or
//! admin data is corrected when the replicas outvote it.
//!
//! # Key Types
//!
//! - [`ActiveBitPreservation`] -- updates, queries and repairs
//! - [`FileBasedActiveBitPreservation`] -- the implementation over an archive client
//! - [`FilePreservationState`] -- admin data plus every replica's checksums for one file
//! - [`WorkFiles`] / [`WorkFileKind`] -- per-replica findings on disk
//! - [`RepairReport`] -- per-file repair outcomes
//! - [`BitPreservationUpdater`] -- background updates, one per replica and kind

pub mod config;
pub mod engine;
pub mod error;
pub mod repair;
pub mod state;
pub mod updater;
pub mod workfiles;

pub use config::PreservationConfig;
pub use engine::{ActiveBitPreservation, FileBasedActiveBitPreservation};
pub use error::{PreservationError, PreservationResult};
pub use repair::{RepairOp, RepairOutcome, RepairReport};
pub use state::FilePreservationState;
pub use updater::{BitPreservationUpdater, CategoryState, UpdateKind, UpdateTicket};
pub use workfiles::{WorkFileKind, WorkFiles};
