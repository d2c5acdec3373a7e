//! Batch execution and the archive transport for replicated storage.
//!
//! Batch jobs run over every file of one replica and report a
//! [`BatchStatus`]. The [`ArchiveClient`] trait is the seam to the archive;
//! [`LocalArchive`] implements it over local directories and
//! [`ChannelClient`] carries the same calls as [`ArchiveMessage`]s to a
//! serving thread.
//!
//! # Key Types
//!
//! - [`BatchJob`] / [`FileFilter`] -- work run over a replica's files
//! - [`BatchStatus`] / [`RemoteFile`] -- results, consumable exactly once
//! - [`AdminData`] / [`AdminStore`] -- the system of record for files
//! - [`ArchiveClient`] -- the transport trait
//! - [`BatchExecuter`] -- background batch runs with per-name deduplication

pub mod admin;
pub mod client;
pub mod config;
pub mod error;
pub mod executer;
pub mod job;
pub mod local;
pub mod message;
pub mod record;
pub mod runner;
pub mod status;

pub use admin::{AdminData, AdminEntry, AdminStore};
pub use client::ArchiveClient;
pub use config::{ArchiveConfig, ReplicaConfig};
pub use error::{ArchiveError, ArchiveResult};
pub use executer::{BatchExecuter, BatchReport, ExecuterTicket};
pub use job::{BatchJob, ChecksumJob, FileFilter, FileListJob, GetMetadataJob};
pub use local::LocalArchive;
pub use message::{dispatch, serve, ArchiveMessage, ArchiveReply, ChannelClient};
pub use record::{ArchiveRecord, RecordCodec, SimpleRecordCodec};
pub use runner::BatchRunner;
pub use status::{BatchStatus, ExceptionOccurrence, RemoteFile};
