//! Archive requests as a message sum type, plus an in-process channel
//! transport that carries them to a serving thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use nas_types::{ReplicaId, ReplicaSet, ReplicaStoreState};
use tracing::{debug, warn};

use crate::admin::AdminData;
use crate::client::ArchiveClient;
use crate::error::{ArchiveError, ArchiveResult};
use crate::job::BatchJob;
use crate::record::ArchiveRecord;
use crate::status::BatchStatus;

/// One request to the archive.
pub enum ArchiveMessage {
    Batch {
        job: Arc<dyn BatchJob>,
        replica: ReplicaId,
    },
    Store {
        file: PathBuf,
    },
    GetFile {
        filename: String,
        replica: ReplicaId,
        dest: PathBuf,
    },
    Get {
        filename: String,
        offset: u64,
    },
    RemoveAndGetFile {
        filename: String,
        replica: ReplicaId,
        checksum: String,
        credentials: String,
    },
    UpdateAdminData {
        filename: String,
        replica: ReplicaId,
        state: ReplicaStoreState,
    },
    UpdateAdminChecksum {
        filename: String,
        checksum: String,
    },
    AdminData,
}

impl ArchiveMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Batch { .. } => "Batch",
            Self::Store { .. } => "Store",
            Self::GetFile { .. } => "GetFile",
            Self::Get { .. } => "Get",
            Self::RemoveAndGetFile { .. } => "RemoveAndGetFile",
            Self::UpdateAdminData { .. } => "UpdateAdminData",
            Self::UpdateAdminChecksum { .. } => "UpdateAdminChecksum",
            Self::AdminData => "AdminData",
        }
    }
}

/// The successful answer to an [`ArchiveMessage`].
#[derive(Debug)]
pub enum ArchiveReply {
    Batch(BatchStatus),
    Done,
    File(PathBuf),
    Record(ArchiveRecord),
    AdminData(AdminData),
}

/// Execute one message against `client`.
pub fn dispatch(client: &dyn ArchiveClient, msg: ArchiveMessage) -> ArchiveResult<ArchiveReply> {
    match msg {
        ArchiveMessage::Batch { job, replica } => client.batch(job, &replica).map(ArchiveReply::Batch),
        ArchiveMessage::Store { file } => client.store(&file).map(|()| ArchiveReply::Done),
        ArchiveMessage::GetFile {
            filename,
            replica,
            dest,
        } => client
            .get_file(&filename, &replica, &dest)
            .map(|()| ArchiveReply::File(dest)),
        ArchiveMessage::Get { filename, offset } => {
            client.get(&filename, offset).map(ArchiveReply::Record)
        }
        ArchiveMessage::RemoveAndGetFile {
            filename,
            replica,
            checksum,
            credentials,
        } => client
            .remove_and_get_file(&filename, &replica, &checksum, &credentials)
            .map(ArchiveReply::File),
        ArchiveMessage::UpdateAdminData {
            filename,
            replica,
            state,
        } => client
            .update_admin_data(&filename, &replica, state)
            .map(|()| ArchiveReply::Done),
        ArchiveMessage::UpdateAdminChecksum { filename, checksum } => client
            .update_admin_checksum(&filename, &checksum)
            .map(|()| ArchiveReply::Done),
        ArchiveMessage::AdminData => client.admin_data().map(ArchiveReply::AdminData),
    }
}

// ---------------------------------------------------------------------------
// Channel transport
// ---------------------------------------------------------------------------

type Envelope = (ArchiveMessage, Sender<ArchiveResult<ArchiveReply>>);

/// Client half of an in-process message transport.
///
/// Every call becomes an [`ArchiveMessage`] answered by the thread started
/// with [`serve`]. Dropping every `ChannelClient` stops that thread.
#[derive(Clone)]
pub struct ChannelClient {
    replicas: ReplicaSet,
    requests: Sender<Envelope>,
}

/// Serve `client` on a dedicated thread and return the connected handle.
pub fn serve(client: Arc<dyn ArchiveClient>) -> ArchiveResult<(ChannelClient, JoinHandle<()>)> {
    let (tx, rx): (Sender<Envelope>, Receiver<Envelope>) = unbounded();
    let replicas = client.replicas().clone();
    let handle = thread::Builder::new()
        .name("archive-server".into())
        .spawn(move || {
            for (msg, reply) in rx {
                let kind = msg.type_name();
                let result = dispatch(client.as_ref(), msg);
                if let Err(e) = &result {
                    debug!(message = kind, error = %e, "request failed");
                }
                if reply.send(result).is_err() {
                    warn!(message = kind, "requester went away before reply");
                }
            }
        })?;
    Ok((
        ChannelClient {
            replicas,
            requests: tx,
        },
        handle,
    ))
}

impl ChannelClient {
    pub fn request(&self, msg: ArchiveMessage) -> ArchiveResult<ArchiveReply> {
        let kind = msg.type_name();
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.requests
            .send((msg, tx))
            .map_err(|_| ArchiveError::Transport(format!("archive server stopped before {kind}")))?;
        rx.recv()
            .map_err(|_| ArchiveError::Transport(format!("no reply to {kind}")))?
    }

    fn expect_done(&self, msg: ArchiveMessage) -> ArchiveResult<()> {
        match self.request(msg)? {
            ArchiveReply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(reply: &ArchiveReply) -> ArchiveError {
    ArchiveError::Transport(format!("unexpected reply {reply:?}"))
}

impl ArchiveClient for ChannelClient {
    fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    fn batch(&self, job: Arc<dyn BatchJob>, replica: &ReplicaId) -> ArchiveResult<BatchStatus> {
        match self.request(ArchiveMessage::Batch {
            job,
            replica: replica.clone(),
        })? {
            ArchiveReply::Batch(status) => Ok(status),
            other => Err(unexpected(&other)),
        }
    }

    fn store(&self, file: &Path) -> ArchiveResult<()> {
        self.expect_done(ArchiveMessage::Store {
            file: file.to_path_buf(),
        })
    }

    fn get_file(&self, filename: &str, replica: &ReplicaId, dest: &Path) -> ArchiveResult<()> {
        match self.request(ArchiveMessage::GetFile {
            filename: filename.to_string(),
            replica: replica.clone(),
            dest: dest.to_path_buf(),
        })? {
            ArchiveReply::File(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn get(&self, filename: &str, offset: u64) -> ArchiveResult<ArchiveRecord> {
        match self.request(ArchiveMessage::Get {
            filename: filename.to_string(),
            offset,
        })? {
            ArchiveReply::Record(record) => Ok(record),
            other => Err(unexpected(&other)),
        }
    }

    fn remove_and_get_file(
        &self,
        filename: &str,
        replica: &ReplicaId,
        checksum: &str,
        credentials: &str,
    ) -> ArchiveResult<PathBuf> {
        match self.request(ArchiveMessage::RemoveAndGetFile {
            filename: filename.to_string(),
            replica: replica.clone(),
            checksum: checksum.to_string(),
            credentials: credentials.to_string(),
        })? {
            ArchiveReply::File(path) => Ok(path),
            other => Err(unexpected(&other)),
        }
    }

    fn update_admin_data(
        &self,
        filename: &str,
        replica: &ReplicaId,
        state: ReplicaStoreState,
    ) -> ArchiveResult<()> {
        self.expect_done(ArchiveMessage::UpdateAdminData {
            filename: filename.to_string(),
            replica: replica.clone(),
            state,
        })
    }

    fn update_admin_checksum(&self, filename: &str, checksum: &str) -> ArchiveResult<()> {
        self.expect_done(ArchiveMessage::UpdateAdminChecksum {
            filename: filename.to_string(),
            checksum: checksum.to_string(),
        })
    }

    fn admin_data(&self) -> ArchiveResult<AdminData> {
        match self.request(ArchiveMessage::AdminData)? {
            ArchiveReply::AdminData(data) => Ok(data),
            other => Err(unexpected(&other)),
        }
    }
}
