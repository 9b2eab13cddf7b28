//! One meta partition: an inode-ID range, its two trees, and the
//! leader-serialized mutation path.
//!
//! Client-facing handlers marshal the entity, propose it through the
//! raft sequencer, and translate the applied response into a
//! `(ResultCode, JSON body)` pair for the reply packet. Reads that
//! tolerate slight staleness (`inode_get`, `lookup`, `read_dir`,
//! `extents_list`) bypass the sequencer; inode allocation does not.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use baudfs_proto::message::{
    BatchInodeGetRequest, BatchInodeGetResponse, CreateDentryRequest, CreateInodeRequest,
    CreateInodeResponse, DeleteDentryRequest, DeleteDentryResponse, DeleteInodeRequest,
    DeleteInodeResponse, ExtentsAddRequest, ExtentsListRequest, ExtentsListResponse,
    InodeGetRequest, InodeGetResponse, LookupRequest, LookupResponse, MetaPartitionReport,
    OpenRequest, Peer, ReadDirRequest, ReadDirResponse, UpdateMetaPartitionRequest,
    UpdateMetaPartitionResponse,
};
use baudfs_proto::{ExtentKey, PartitionStatus, ResultCode};

use crate::dentry::Dentry;
use crate::error::MetaError;
use crate::inode::Inode;
use crate::manifest::{self, Manifest};
use crate::raftlog::{LocalSequencer, LogEntry, RaftOp, RaftSequencer, StateMachine};
use crate::tree::{DentryTree, InodeTree};
use crate::unix_now;

/// Everything needed to construct or reload a partition.
#[derive(Clone, Debug)]
pub struct MetaPartitionConfig {
    pub partition_id: u64,
    pub vol_name: String,
    pub start: u64,
    pub end: u64,
    /// Highest allocated inode ID; equals `start` for a fresh partition.
    pub cursor: u64,
    pub peers: Vec<Peer>,
    pub root_dir: PathBuf,
}

/// Typed response returned by the state machine for one applied entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ApplyResponse {
    Status(ResultCode),
    DeletedInode {
        status: ResultCode,
        extents: Vec<ExtentKey>,
    },
    DeletedDentry {
        status: ResultCode,
        inode: u64,
    },
}

impl ApplyResponse {
    pub fn status(&self) -> ResultCode {
        match self {
            ApplyResponse::Status(s) => *s,
            ApplyResponse::DeletedInode { status, .. } => *status,
            ApplyResponse::DeletedDentry { status, .. } => *status,
        }
    }
}

/// Range-end change carried by an `UpdatePartition` log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct UpdateRange {
    end: u64,
}

pub struct MetaPartition {
    partition_id: u64,
    vol_name: String,
    start: u64,
    end: AtomicU64,
    /// Highest allocated inode ID.
    cursor: AtomicU64,
    peers: RwLock<Vec<Peer>>,
    root_dir: PathBuf,
    inodes: InodeTree,
    dentries: DentryTree,
    sequencer: Arc<dyn RaftSequencer>,
    stopped: AtomicBool,
    after_stop: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MetaPartition {
    pub fn new(config: MetaPartitionConfig, sequencer: Arc<dyn RaftSequencer>) -> Arc<Self> {
        Arc::new(Self {
            partition_id: config.partition_id,
            vol_name: config.vol_name.clone(),
            start: config.start,
            end: AtomicU64::new(config.end),
            cursor: AtomicU64::new(config.cursor),
            peers: RwLock::new(config.peers.clone()),
            root_dir: config.root_dir.clone(),
            inodes: InodeTree::new(),
            dentries: DentryTree::new(),
            sequencer,
            stopped: AtomicBool::new(false),
            after_stop: Mutex::new(None),
        })
    }

    /// Constructs the partition bound to a loopback sequencer.
    pub fn with_local_sequencer(config: MetaPartitionConfig) -> Arc<Self> {
        let seq = LocalSequencer::new();
        let partition = Self::new(config, seq.clone());
        let sm: Arc<dyn StateMachine> = partition.clone();
        seq.attach(&sm);
        partition
    }

    pub fn partition_id(&self) -> u64 {
        self.partition_id
    }

    pub fn vol_name(&self) -> &str {
        &self.vol_name
    }

    pub fn range_start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end.load(Ordering::Acquire)
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Hook the manager uses to detach the partition after it stops.
    pub fn set_after_stop(&self, f: impl FnOnce() + Send + 'static) {
        *self.after_stop.lock().unwrap() = Some(Box::new(f));
    }

    /// Persists the manifest and marks the partition live.
    pub fn start(&self) -> Result<(), MetaError> {
        self.store_meta()?;
        info!(
            partition_id = self.partition_id,
            vol = %self.vol_name,
            start = self.start,
            end = self.end(),
            "meta partition started"
        );
        Ok(())
    }

    /// Quiesces the partition and fires the after-stop hook.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hook) = self.after_stop.lock().unwrap().take() {
            hook();
        }
        info!(partition_id = self.partition_id, "meta partition stopped");
    }

    /// Writes the manifest with the current cursor.
    pub fn store_meta(&self) -> Result<(), MetaError> {
        let m = Manifest {
            partition_id: self.partition_id,
            vol_name: self.vol_name.clone(),
            start: self.start,
            end: self.end(),
            cursor: self.cursor(),
            peers: self.peers.read().unwrap().clone(),
        };
        manifest::store(&self.root_dir, &m)
    }

    /// Reserves the next inode ID. Fails with `InodeFull` at the range
    /// end without bumping the cursor.
    pub fn next_inode_id(&self) -> Result<u64, MetaError> {
        loop {
            let cur = self.cursor.load(Ordering::Acquire);
            if cur >= self.end() {
                return Err(MetaError::InodeFull);
            }
            if self
                .cursor
                .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(cur + 1);
            }
        }
    }

    /// Current heartbeat view of this replica.
    pub fn report(&self) -> MetaPartitionReport {
        let status = if self.is_stopped() {
            PartitionStatus::Unavailable
        } else if self.cursor() >= self.end() {
            PartitionStatus::ReadOnly
        } else {
            PartitionStatus::ReadWrite
        };
        MetaPartitionReport {
            partition_id: self.partition_id,
            start: self.start,
            end: self.end(),
            max_inode_id: self.cursor(),
            status,
            is_leader: self.sequencer.is_leader(),
        }
    }

    /// Proposes one operation and returns the applied response.
    fn put(&self, op: RaftOp, body: Vec<u8>) -> Result<ApplyResponse, MetaError> {
        if self.is_stopped() {
            return Err(MetaError::PartitionStopped);
        }
        if !self.sequencer.is_leader() {
            return Err(MetaError::NotLeader);
        }
        let entry = LogEntry { op, body }.encode()?;
        let raw = self.sequencer.propose(entry)?;
        Ok(bincode::deserialize(&raw)?)
    }

    fn json_body<T: Serialize>(v: &T) -> (ResultCode, Vec<u8>) {
        match serde_json::to_vec(v) {
            Ok(body) => (ResultCode::OpOk, body),
            Err(e) => (ResultCode::OpErr, e.to_string().into_bytes()),
        }
    }

    fn err_reply(e: MetaError) -> (ResultCode, Vec<u8>) {
        (e.result_code(), e.to_string().into_bytes())
    }

    // ---- client-facing operations ----

    pub fn create_inode(&self, req: &CreateInodeRequest) -> (ResultCode, Vec<u8>) {
        let id = match self.next_inode_id() {
            Ok(id) => id,
            Err(e) => return Self::err_reply(e),
        };
        let ino = Inode::new(id, req.mode);
        match self.put(RaftOp::CreateInode, ino.marshal()) {
            Err(e) => Self::err_reply(e),
            Ok(resp) => match resp.status() {
                ResultCode::OpOk => Self::json_body(&CreateInodeResponse {
                    info: Some(ino.to_info()),
                }),
                status => (status, Vec::new()),
            },
        }
    }

    pub fn delete_inode(&self, req: &DeleteInodeRequest) -> (ResultCode, Vec<u8>) {
        let ino = Inode::new(req.inode, 0);
        match self.put(RaftOp::DeleteInode, ino.marshal()) {
            Err(e) => Self::err_reply(e),
            Ok(ApplyResponse::DeletedInode {
                status: ResultCode::OpOk,
                extents,
            }) => Self::json_body(&DeleteInodeResponse { extents }),
            Ok(resp) => (resp.status(), Vec::new()),
        }
    }

    pub fn open(&self, req: &OpenRequest) -> (ResultCode, Vec<u8>) {
        let ino = Inode::new(req.inode, 0);
        match self.put(RaftOp::Open, ino.marshal()) {
            Err(e) => Self::err_reply(e),
            Ok(resp) => (resp.status(), Vec::new()),
        }
    }

    pub fn inode_get(&self, req: &InodeGetRequest) -> (ResultCode, Vec<u8>) {
        match self.inodes.get(req.inode) {
            Some(ino) => Self::json_body(&InodeGetResponse {
                info: Some(ino.to_info()),
            }),
            None => (ResultCode::OpNotExist, Vec::new()),
        }
    }

    pub fn batch_inode_get(&self, req: &BatchInodeGetRequest) -> (ResultCode, Vec<u8>) {
        let infos = req
            .inodes
            .iter()
            .filter_map(|id| self.inodes.get(*id))
            .map(|ino| ino.to_info())
            .collect();
        Self::json_body(&BatchInodeGetResponse { infos })
    }

    pub fn create_dentry(&self, req: &CreateDentryRequest) -> (ResultCode, Vec<u8>) {
        let d = Dentry::new(req.parent_inode, &req.name, req.inode, req.mode);
        match self.put(RaftOp::CreateDentry, d.marshal()) {
            Err(e) => Self::err_reply(e),
            Ok(resp) => (resp.status(), Vec::new()),
        }
    }

    pub fn delete_dentry(&self, req: &DeleteDentryRequest) -> (ResultCode, Vec<u8>) {
        let d = Dentry::new(req.parent_inode, &req.name, 0, 0);
        match self.put(RaftOp::DeleteDentry, d.marshal()) {
            Err(e) => Self::err_reply(e),
            Ok(ApplyResponse::DeletedDentry {
                status: ResultCode::OpOk,
                inode,
            }) => Self::json_body(&DeleteDentryResponse { inode }),
            Ok(resp) => (resp.status(), Vec::new()),
        }
    }

    pub fn lookup(&self, req: &LookupRequest) -> (ResultCode, Vec<u8>) {
        match self.dentries.get(req.parent_inode, &req.name) {
            Some(d) => Self::json_body(&LookupResponse {
                inode: d.inode,
                mode: d.mode,
            }),
            None => (ResultCode::OpNotExist, Vec::new()),
        }
    }

    pub fn read_dir(&self, req: &ReadDirRequest) -> (ResultCode, Vec<u8>) {
        let children = self
            .dentries
            .read_dir(req.parent_inode)
            .into_iter()
            .map(|d| d.to_info())
            .collect();
        Self::json_body(&ReadDirResponse { children })
    }

    pub fn extents_add(&self, req: &ExtentsAddRequest) -> (ResultCode, Vec<u8>) {
        let mut ino = Inode::new(req.inode, 0);
        ino.extents.put(req.extent);
        match self.put(RaftOp::ExtentsAdd, ino.marshal()) {
            Err(e) => Self::err_reply(e),
            Ok(resp) => (resp.status(), Vec::new()),
        }
    }

    pub fn extents_list(&self, req: &ExtentsListRequest) -> (ResultCode, Vec<u8>) {
        match self.inodes.get(req.inode) {
            Some(ino) => Self::json_body(&ExtentsListResponse {
                extents: ino.extents.extents.clone(),
            }),
            None => (ResultCode::OpNotExist, Vec::new()),
        }
    }

    // ---- master-facing operations ----

    pub fn update_partition(&self, req: &UpdateMetaPartitionRequest) -> (ResultCode, Vec<u8>) {
        let body = match bincode::serialize(&UpdateRange { end: req.end }) {
            Ok(b) => b,
            Err(e) => return (ResultCode::OpErr, e.to_string().into_bytes()),
        };
        match self.put(RaftOp::UpdatePartition, body) {
            Err(e) => Self::err_reply(e),
            Ok(resp) => {
                let status = resp.status();
                let reply = UpdateMetaPartitionResponse {
                    partition_id: self.partition_id,
                    end: self.end(),
                    status: status.as_u8(),
                };
                match serde_json::to_vec(&reply) {
                    Ok(body) => (status, body),
                    Err(e) => (ResultCode::OpErr, e.to_string().into_bytes()),
                }
            }
        }
    }

    pub fn delete_partition(&self) -> (ResultCode, Vec<u8>) {
        match self.put(RaftOp::DeletePartition, Vec::new()) {
            Err(e) => Self::err_reply(e),
            Ok(resp) => {
                if resp.status() == ResultCode::OpOk {
                    self.stop();
                }
                (resp.status(), Vec::new())
            }
        }
    }

    pub fn offline_partition(&self) -> (ResultCode, Vec<u8>) {
        match self.put(RaftOp::OfflinePartition, Vec::new()) {
            Err(e) => Self::err_reply(e),
            Ok(resp) => (resp.status(), Vec::new()),
        }
    }

    /// Periodic snapshot marker: persists the manifest through the log
    /// so every replica snapshots at the same point.
    pub fn store_tick(&self) -> Result<(), MetaError> {
        self.put(RaftOp::StoreTick, Vec::new()).map(|_| ())
    }

    // ---- state machine ----

    fn apply_entry(&self, entry: LogEntry) -> Result<ApplyResponse, MetaError> {
        match entry.op {
            RaftOp::CreateInode => {
                let ino = Inode::unmarshal(&entry.body)?;
                self.cursor.fetch_max(ino.inode, Ordering::AcqRel);
                match self.inodes.create(ino) {
                    Ok(()) => Ok(ApplyResponse::Status(ResultCode::OpOk)),
                    Err(_) => Ok(ApplyResponse::Status(ResultCode::OpExist)),
                }
            }
            RaftOp::DeleteInode => {
                let ino = Inode::unmarshal(&entry.body)?;
                match self.inodes.remove(ino.inode) {
                    Some(removed) => Ok(ApplyResponse::DeletedInode {
                        status: ResultCode::OpOk,
                        extents: removed.extents.extents,
                    }),
                    None => Ok(ApplyResponse::DeletedInode {
                        status: ResultCode::OpNotExist,
                        extents: Vec::new(),
                    }),
                }
            }
            RaftOp::Open => {
                let ino = Inode::unmarshal(&entry.body)?;
                match self.inodes.with_mut(ino.inode, |i| {
                    i.access_time = unix_now();
                }) {
                    Some(()) => Ok(ApplyResponse::Status(ResultCode::OpOk)),
                    None => Ok(ApplyResponse::Status(ResultCode::OpNotExist)),
                }
            }
            RaftOp::CreateDentry => {
                let d = Dentry::unmarshal(&entry.body)?;
                match self.dentries.create(d) {
                    Ok(()) => Ok(ApplyResponse::Status(ResultCode::OpOk)),
                    Err(_) => Ok(ApplyResponse::Status(ResultCode::OpExist)),
                }
            }
            RaftOp::DeleteDentry => {
                let d = Dentry::unmarshal(&entry.body)?;
                match self.dentries.remove(d.parent_id, &d.name) {
                    Some(removed) => Ok(ApplyResponse::DeletedDentry {
                        status: ResultCode::OpOk,
                        inode: removed.inode,
                    }),
                    None => Ok(ApplyResponse::DeletedDentry {
                        status: ResultCode::OpNotExist,
                        inode: 0,
                    }),
                }
            }
            RaftOp::ExtentsAdd => {
                let carrier = Inode::unmarshal(&entry.body)?;
                let applied = self.inodes.with_mut(carrier.inode, |existing| {
                    for ek in &carrier.extents.extents {
                        existing.append_extent(*ek);
                    }
                });
                match applied {
                    Some(()) => Ok(ApplyResponse::Status(ResultCode::OpOk)),
                    None => Ok(ApplyResponse::Status(ResultCode::OpNotExist)),
                }
            }
            RaftOp::UpdatePartition => {
                let update: UpdateRange = bincode::deserialize(&entry.body)?;
                self.end.store(update.end, Ordering::Release);
                if let Err(e) = self.store_meta() {
                    // Disk failure during apply is fatal for the actor.
                    error!(
                        partition_id = self.partition_id,
                        error = %e,
                        "manifest persist failed in apply; stopping partition"
                    );
                    self.stop();
                    return Err(e);
                }
                Ok(ApplyResponse::Status(ResultCode::OpOk))
            }
            RaftOp::DeletePartition => {
                // Quiesce through stop() so the after-stop hook fires
                // and the manager detaches the actor.
                self.stop();
                Ok(ApplyResponse::Status(ResultCode::OpOk))
            }
            RaftOp::OfflinePartition => Ok(ApplyResponse::Status(ResultCode::OpOk)),
            RaftOp::StoreTick => {
                if let Err(e) = self.store_meta() {
                    error!(
                        partition_id = self.partition_id,
                        error = %e,
                        "manifest persist failed in apply; stopping partition"
                    );
                    self.stop();
                    return Err(e);
                }
                Ok(ApplyResponse::Status(ResultCode::OpOk))
            }
        }
    }
}

impl StateMachine for MetaPartition {
    fn apply(&self, entry: &[u8]) -> Result<Vec<u8>, MetaError> {
        let entry = LogEntry::decode(entry)?;
        let resp = self.apply_entry(entry)?;
        Ok(bincode::serialize(&resp)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path, start: u64, end: u64) -> MetaPartitionConfig {
        MetaPartitionConfig {
            partition_id: 1,
            vol_name: "vol".to_string(),
            start,
            end,
            cursor: start,
            peers: Vec::new(),
            root_dir: dir.to_path_buf(),
        }
    }

    fn partition(end: u64) -> (tempfile::TempDir, Arc<MetaPartition>) {
        let dir = tempfile::tempdir().unwrap();
        let mp = MetaPartition::with_local_sequencer(config(dir.path(), 0, end));
        (dir, mp)
    }

    fn create_req(mode: u32) -> CreateInodeRequest {
        CreateInodeRequest {
            vol_name: "vol".to_string(),
            partition_id: 1,
            mode,
        }
    }

    #[test]
    fn test_create_inode_allocates_increasing_ids() {
        let (_dir, mp) = partition(1000);
        let mut last = 0;
        for _ in 0..5 {
            let (code, body) = mp.create_inode(&create_req(0o644));
            assert_eq!(code, ResultCode::OpOk);
            let resp: CreateInodeResponse = serde_json::from_slice(&body).unwrap();
            let id = resp.info.unwrap().inode;
            assert!(id > last);
            last = id;
        }
        assert_eq!(mp.cursor(), 5);
    }

    #[test]
    fn test_next_inode_id_at_end_fails_without_bump() {
        let dir = tempfile::tempdir().unwrap();
        let mp = MetaPartition::with_local_sequencer(MetaPartitionConfig {
            cursor: 10,
            ..config(dir.path(), 0, 10)
        });
        assert!(matches!(mp.next_inode_id(), Err(MetaError::InodeFull)));
        assert_eq!(mp.cursor(), 10);
        let (code, _) = mp.create_inode(&create_req(0));
        assert_eq!(code, ResultCode::OpInodeFull);
    }

    #[test]
    fn test_inode_get_and_delete_roundtrip() {
        let (_dir, mp) = partition(1000);
        let (_, body) = mp.create_inode(&create_req(0o644));
        let resp: CreateInodeResponse = serde_json::from_slice(&body).unwrap();
        let id = resp.info.unwrap().inode;

        let (code, body) = mp.inode_get(&InodeGetRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            inode: id,
        });
        assert_eq!(code, ResultCode::OpOk);
        let got: InodeGetResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(got.info.unwrap().inode, id);

        let (code, _) = mp.delete_inode(&DeleteInodeRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            inode: id,
        });
        assert_eq!(code, ResultCode::OpOk);

        let (code, _) = mp.inode_get(&InodeGetRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            inode: id,
        });
        assert_eq!(code, ResultCode::OpNotExist);
    }

    #[test]
    fn test_delete_inode_returns_freed_extents() {
        let (_dir, mp) = partition(1000);
        let (_, body) = mp.create_inode(&create_req(0o644));
        let resp: CreateInodeResponse = serde_json::from_slice(&body).unwrap();
        let id = resp.info.unwrap().inode;

        let ek = ExtentKey {
            partition_id: 2,
            extent_id: 7,
            offset: 0,
            size: 100,
            crc: 0,
        };
        let (code, _) = mp.extents_add(&ExtentsAddRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            inode: id,
            extent: ek,
        });
        assert_eq!(code, ResultCode::OpOk);

        let (code, body) = mp.delete_inode(&DeleteInodeRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            inode: id,
        });
        assert_eq!(code, ResultCode::OpOk);
        let freed: DeleteInodeResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(freed.extents, vec![ek]);
    }

    #[test]
    fn test_extents_add_monotone_and_idempotent() {
        let (_dir, mp) = partition(1000);
        let (_, body) = mp.create_inode(&create_req(0o644));
        let resp: CreateInodeResponse = serde_json::from_slice(&body).unwrap();
        let id = resp.info.unwrap().inode;

        let add = |size: u32| {
            let (code, _) = mp.extents_add(&ExtentsAddRequest {
                vol_name: "vol".into(),
                partition_id: 1,
                inode: id,
                extent: ExtentKey {
                    partition_id: 1,
                    extent_id: 7,
                    offset: 0,
                    size,
                    crc: 0,
                },
            });
            assert_eq!(code, ResultCode::OpOk);
        };
        add(100);
        // Shrinking replay: no-op.
        add(80);
        let ino = mp.inodes.get(id).unwrap();
        assert_eq!(ino.size, 100);
        assert_eq!(ino.extents.extent_count(), 1);
        // Growth applies; replay of the same growth is idempotent.
        add(200);
        add(200);
        let ino = mp.inodes.get(id).unwrap();
        assert_eq!(ino.size, 200);
        assert_eq!(ino.extents.extent_count(), 1);
    }

    #[test]
    fn test_extents_add_unknown_inode() {
        let (_dir, mp) = partition(1000);
        let (code, _) = mp.extents_add(&ExtentsAddRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            inode: 999,
            extent: ExtentKey::new(1, 1),
        });
        assert_eq!(code, ResultCode::OpNotExist);
    }

    #[test]
    fn test_dentry_lifecycle_and_read_dir() {
        let (_dir, mp) = partition(1000);
        for name in ["b", "a", "c"] {
            let (code, _) = mp.create_dentry(&CreateDentryRequest {
                vol_name: "vol".into(),
                partition_id: 1,
                parent_inode: 1,
                name: name.to_string(),
                inode: 10,
                mode: 0o644,
            });
            assert_eq!(code, ResultCode::OpOk);
        }
        // Duplicate name is rejected.
        let (code, _) = mp.create_dentry(&CreateDentryRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            parent_inode: 1,
            name: "a".to_string(),
            inode: 11,
            mode: 0,
        });
        assert_eq!(code, ResultCode::OpExist);

        let (code, body) = mp.read_dir(&ReadDirRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            parent_inode: 1,
        });
        assert_eq!(code, ResultCode::OpOk);
        let listing: ReadDirResponse = serde_json::from_slice(&body).unwrap();
        let names: Vec<String> = listing.children.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let (code, body) = mp.delete_dentry(&DeleteDentryRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            parent_inode: 1,
            name: "b".to_string(),
        });
        assert_eq!(code, ResultCode::OpOk);
        let resp: DeleteDentryResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.inode, 10);

        let (code, _) = mp.lookup(&LookupRequest {
            vol_name: "vol".into(),
            partition_id: 1,
            parent_inode: 1,
            name: "b".to_string(),
        });
        assert_eq!(code, ResultCode::OpNotExist);
    }

    #[test]
    fn test_update_partition_changes_end_and_persists() {
        let (dir, mp) = partition(1000);
        let (code, body) = mp.update_partition(&UpdateMetaPartitionRequest {
            partition_id: 1,
            end: 500,
            vol_name: "vol".into(),
        });
        assert_eq!(code, ResultCode::OpOk);
        let resp: UpdateMetaPartitionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.end, 500);
        assert_eq!(mp.end(), 500);
        let m = manifest::load(dir.path()).unwrap();
        assert_eq!(m.end, 500);
    }

    #[test]
    fn test_report_reflects_cursor_and_range() {
        let (_dir, mp) = partition(2);
        let r = mp.report();
        assert_eq!(r.status, PartitionStatus::ReadWrite);
        assert!(r.is_leader);

        mp.create_inode(&create_req(0));
        mp.create_inode(&create_req(0));
        let r = mp.report();
        assert_eq!(r.max_inode_id, 2);
        assert_eq!(r.status, PartitionStatus::ReadOnly);
        assert!(r.start <= r.max_inode_id && r.max_inode_id <= r.end);
    }

    #[test]
    fn test_stopped_partition_rejects_mutations() {
        let (_dir, mp) = partition(1000);
        mp.stop();
        let (code, _) = mp.create_inode(&create_req(0));
        // Allocation succeeded before the put; the put refuses.
        assert_ne!(code, ResultCode::OpOk);
    }

    #[test]
    fn test_after_stop_hook_fires_once() {
        let (_dir, mp) = partition(1000);
        let fired = Arc::new(AtomicU64::new(0));
        let f = fired.clone();
        mp.set_after_stop(move || {
            f.fetch_add(1, Ordering::Relaxed);
        });
        mp.stop();
        mp.stop();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_store_tick_persists_cursor() {
        let (dir, mp) = partition(1000);
        mp.create_inode(&create_req(0));
        mp.create_inode(&create_req(0));
        mp.store_tick().unwrap();
        let m = manifest::load(dir.path()).unwrap();
        assert_eq!(m.cursor, 2);
    }
}
