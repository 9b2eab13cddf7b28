//! The partition manager: disk scan on startup, attach/detach, and the
//! opcode dispatch table for everything a meta node serves.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::{error, info, warn};

use baudfs_proto::message::{
    BatchInodeGetRequest, CreateDentryRequest, CreateInodeRequest, CreateMetaPartitionRequest,
    DeleteDentryRequest, DeleteInodeRequest, DeleteMetaPartitionRequest, ExtentsAddRequest,
    ExtentsListRequest, InodeGetRequest, LoadMetaPartitionRequest, LookupRequest,
    MetaPartitionOfflineRequest, MetaPartitionReport, OpenRequest, Peer, ReadDirRequest,
    UpdateMetaPartitionRequest,
};
use baudfs_proto::{Opcode, Packet, ResultCode};

use crate::error::MetaError;
use crate::manifest;
use crate::partition::{MetaPartition, MetaPartitionConfig};

const PARTITION_PREFIX: &str = "partition_";

const STATE_STANDBY: u32 = 0;
const STATE_START: u32 = 1;
const STATE_RUNNING: u32 = 2;
const STATE_SHUTDOWN: u32 = 3;
const STATE_STOPPED: u32 = 4;

#[derive(Clone, Debug)]
pub struct MetaManagerConfig {
    pub node_id: u64,
    pub root_dir: PathBuf,
}

/// Owns every partition actor on this node and routes packets to them.
pub struct MetaManager {
    node_id: u64,
    root_dir: PathBuf,
    state: AtomicU32,
    partitions: RwLock<HashMap<u64, Arc<MetaPartition>>>,
    /// Handed to partition after-stop hooks so they can detach.
    self_ref: Weak<MetaManager>,
}

impl MetaManager {
    pub fn new(config: MetaManagerConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            node_id: config.node_id,
            root_dir: config.root_dir,
            state: AtomicU32::new(STATE_STANDBY),
            partitions: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        })
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Scans the root directory and starts every valid partition.
    pub fn start(&self) -> Result<(), MetaError> {
        if self
            .state
            .compare_exchange(
                STATE_STANDBY,
                STATE_START,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }
        let result = self.load_partitions();
        let next = if result.is_ok() {
            STATE_RUNNING
        } else {
            STATE_STANDBY
        };
        self.state.store(next, Ordering::Release);
        result
    }

    /// Quiesces every partition, in arbitrary order.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_SHUTDOWN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        let partitions: Vec<Arc<MetaPartition>> =
            self.partitions.read().unwrap().values().cloned().collect();
        for p in partitions {
            p.stop();
        }
        self.state.store(STATE_STOPPED, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// Restores partitions from `<root>/partition_<id>/` directories.
    /// Invalid names and torn manifests are skipped, never fatal.
    fn load_partitions(&self) -> Result<(), MetaError> {
        if !self.root_dir.exists() {
            std::fs::create_dir_all(&self.root_dir)?;
            return Ok(());
        }
        if !self.root_dir.is_dir() {
            return Err(MetaError::InvalidManifest(format!(
                "{} is not a directory",
                self.root_dir.display()
            )));
        }
        for entry in std::fs::read_dir(&self.root_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id_part) = name.strip_prefix(PARTITION_PREFIX) else {
                warn!(dir = %name, "ignore unknown dir under meta root");
                continue;
            };
            let id: u64 = match id_part.parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(dir = %name, "ignore dir with unparseable partition id");
                    continue;
                }
            };
            let m = match manifest::load(&entry.path()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(dir = %name, error = %e, "skip partition with unreadable manifest");
                    continue;
                }
            };
            if m.partition_id != id {
                warn!(
                    dir = %name,
                    manifest_id = m.partition_id,
                    "skip partition whose manifest disagrees with its directory"
                );
                continue;
            }
            let partition = MetaPartition::with_local_sequencer(MetaPartitionConfig {
                partition_id: m.partition_id,
                vol_name: m.vol_name,
                start: m.start,
                end: m.end,
                cursor: m.cursor,
                peers: m.peers,
                root_dir: entry.path(),
            });
            if let Err(e) = self.attach(partition) {
                error!(partition_id = id, error = %e, "load partition failed");
            }
        }
        Ok(())
    }

    fn attach(&self, partition: Arc<MetaPartition>) -> Result<(), MetaError> {
        partition.start()?;
        let id = partition.partition_id();
        let weak = self.self_ref.clone();
        partition.set_after_stop(move || {
            if let Some(mgr) = weak.upgrade() {
                mgr.detach(id);
            }
        });
        self.partitions.write().unwrap().insert(id, partition);
        info!(partition_id = id, "partition attached");
        Ok(())
    }

    fn detach(&self, id: u64) {
        if self.partitions.write().unwrap().remove(&id).is_some() {
            info!(partition_id = id, "partition detached");
        }
    }

    pub fn get_partition(&self, id: u64) -> Result<Arc<MetaPartition>, MetaError> {
        self.partitions
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(MetaError::PartitionNotFound(id))
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.read().unwrap().len()
    }

    /// Creates a partition directory and actor for a master task.
    pub fn create_partition(
        &self,
        partition_id: u64,
        vol_name: &str,
        start: u64,
        end: u64,
        peers: Vec<Peer>,
    ) -> Result<(), MetaError> {
        if self.get_partition(partition_id).is_ok() {
            return Err(MetaError::PartitionExists(partition_id));
        }
        let root_dir = self
            .root_dir
            .join(format!("{}{}", PARTITION_PREFIX, partition_id));
        let partition = MetaPartition::with_local_sequencer(MetaPartitionConfig {
            partition_id,
            vol_name: vol_name.to_string(),
            start,
            end,
            cursor: start,
            peers,
            root_dir,
        });
        self.attach(partition)
    }

    /// Heartbeat view over every partition.
    pub fn reports(&self) -> Vec<MetaPartitionReport> {
        let mut reports: Vec<MetaPartitionReport> = self
            .partitions
            .read()
            .unwrap()
            .values()
            .map(|p| p.report())
            .collect();
        reports.sort_by_key(|r| r.partition_id);
        reports
    }

    /// Routes one request packet to its handler and turns the packet
    /// into the reply in place.
    pub fn handle_packet(&self, p: &mut Packet) -> Result<(), MetaError> {
        let op = p.op().ok_or(MetaError::UnknownOpcode(p.opcode))?;
        match op {
            Opcode::Ping => {
                p.pack_ok_with_body(Vec::new());
                Ok(())
            }
            Opcode::MetaCreateInode => self.route(p, |mp, req: CreateInodeRequest| {
                mp.create_inode(&req)
            }),
            Opcode::MetaDeleteInode => self.route(p, |mp, req: DeleteInodeRequest| {
                mp.delete_inode(&req)
            }),
            Opcode::MetaOpen => self.route(p, |mp, req: OpenRequest| mp.open(&req)),
            Opcode::MetaInodeGet => self.route(p, |mp, req: InodeGetRequest| mp.inode_get(&req)),
            Opcode::MetaBatchInodeGet => self.route(p, |mp, req: BatchInodeGetRequest| {
                mp.batch_inode_get(&req)
            }),
            Opcode::MetaCreateDentry => self.route(p, |mp, req: CreateDentryRequest| {
                mp.create_dentry(&req)
            }),
            Opcode::MetaDeleteDentry => self.route(p, |mp, req: DeleteDentryRequest| {
                mp.delete_dentry(&req)
            }),
            Opcode::MetaLookup => self.route(p, |mp, req: LookupRequest| mp.lookup(&req)),
            Opcode::MetaReadDir => self.route(p, |mp, req: ReadDirRequest| mp.read_dir(&req)),
            Opcode::MetaExtentsAdd => self.route(p, |mp, req: ExtentsAddRequest| {
                mp.extents_add(&req)
            }),
            Opcode::MetaExtentsList => self.route(p, |mp, req: ExtentsListRequest| {
                mp.extents_list(&req)
            }),
            Opcode::MetaExtentsDel => {
                // Accepted on the wire but not yet wired into the apply
                // path; callers fall back to whole-inode deletion.
                p.pack_error_with_body(ResultCode::OpErr, b"extents del unsupported".to_vec());
                Ok(())
            }
            Opcode::UpdateMetaPartition => self.route(p, |mp, req: UpdateMetaPartitionRequest| {
                mp.update_partition(&req)
            }),
            Opcode::OfflineMetaPartition => {
                self.route(p, |mp, _req: MetaPartitionOfflineRequest| {
                    mp.offline_partition()
                })
            }
            Opcode::LoadMetaPartition => {
                match serde_json::from_slice::<LoadMetaPartitionRequest>(&p.data) {
                    Err(e) => {
                        p.pack_error_with_body(ResultCode::OpErr, e.to_string().into_bytes());
                        Ok(())
                    }
                    Ok(req) => match self.get_partition(req.partition_id) {
                        Err(e) => {
                            p.pack_error_with_body(e.result_code(), e.to_string().into_bytes());
                            Ok(())
                        }
                        Ok(mp) => {
                            let (code, body) = match serde_json::to_vec(&mp.report()) {
                                Ok(b) => (ResultCode::OpOk, b),
                                Err(e) => (ResultCode::OpErr, e.to_string().into_bytes()),
                            };
                            p.pack_error_with_body(code, body);
                            Ok(())
                        }
                    },
                }
            }
            Opcode::CreateMetaPartition => {
                match serde_json::from_slice::<CreateMetaPartitionRequest>(&p.data) {
                    Err(e) => {
                        p.pack_error_with_body(ResultCode::OpErr, e.to_string().into_bytes());
                        Ok(())
                    }
                    Ok(req) => {
                        let result = self.create_partition(
                            req.partition_id,
                            &req.vol_name,
                            req.start,
                            req.end,
                            req.members,
                        );
                        match result {
                            Ok(()) => p.pack_ok_with_body(Vec::new()),
                            Err(e) => {
                                p.pack_error_with_body(e.result_code(), e.to_string().into_bytes())
                            }
                        }
                        Ok(())
                    }
                }
            }
            Opcode::DeleteMetaPartition => {
                self.route(p, |mp, _req: DeleteMetaPartitionRequest| {
                    mp.delete_partition()
                })
            }
            Opcode::MetaNodeHeartbeat => {
                let (code, body) = match serde_json::to_vec(&self.reports()) {
                    Ok(b) => (ResultCode::OpOk, b),
                    Err(e) => (ResultCode::OpErr, e.to_string().into_bytes()),
                };
                p.pack_error_with_body(code, body);
                Ok(())
            }
            _ => Err(MetaError::UnknownOpcode(p.opcode)),
        }
    }

    fn route<R, F>(&self, p: &mut Packet, handler: F) -> Result<(), MetaError>
    where
        R: serde::de::DeserializeOwned + PartitionScoped,
        F: FnOnce(Arc<MetaPartition>, R) -> (ResultCode, Vec<u8>),
    {
        let req: R = match serde_json::from_slice(&p.data) {
            Ok(req) => req,
            Err(e) => {
                p.pack_error_with_body(ResultCode::OpErr, e.to_string().into_bytes());
                return Ok(());
            }
        };
        match self.get_partition(req.partition_id()) {
            Err(e) => {
                p.pack_error_with_body(e.result_code(), e.to_string().into_bytes());
                Ok(())
            }
            Ok(mp) => {
                let (code, body) = handler(mp, req);
                p.pack_error_with_body(code, body);
                Ok(())
            }
        }
    }
}

/// Requests that carry the partition they address.
trait PartitionScoped {
    fn partition_id(&self) -> u64;
}

macro_rules! partition_scoped {
    ($($ty:ty),* $(,)?) => {
        $(impl PartitionScoped for $ty {
            fn partition_id(&self) -> u64 {
                self.partition_id
            }
        })*
    };
}

partition_scoped!(
    CreateInodeRequest,
    DeleteInodeRequest,
    OpenRequest,
    InodeGetRequest,
    BatchInodeGetRequest,
    CreateDentryRequest,
    DeleteDentryRequest,
    LookupRequest,
    ReadDirRequest,
    ExtentsAddRequest,
    ExtentsListRequest,
    UpdateMetaPartitionRequest,
    MetaPartitionOfflineRequest,
    DeleteMetaPartitionRequest,
);
