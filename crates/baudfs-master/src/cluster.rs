//! Cluster state held by the master: partition maps, the node registry,
//! the outbound admin-task queue, and the raft-replicated persistence
//! seam for partition metadata.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use baudfs_proto::message::{DataPartitionReport, MetaPartitionReport, Peer};
use baudfs_proto::AdminTask;

use crate::data_partition::DataPartition;
use crate::error::MasterError;
use crate::meta_partition::{
    MetaPartition, MAX_META_PARTITION_INODE_ID, META_PARTITION_INODE_ID_STEP,
};
use crate::node::NodeRegistry;

/// Durable image of a meta partition, written through the master's
/// replicated store on every mutation of range, hosts, or peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPartitionValue {
    pub partition_id: u64,
    pub start: u64,
    pub end: u64,
    pub hosts: Vec<String>,
    pub peers: Vec<Peer>,
}

impl MetaPartitionValue {
    fn from_partition(mp: &MetaPartition) -> Self {
        Self {
            partition_id: mp.partition_id,
            start: mp.start,
            end: mp.end,
            hosts: mp.persistence_hosts.clone(),
            peers: mp.peers.clone(),
        }
    }
}

/// The master's raft-replicated persistence for partition metadata.
///
/// Implementations must not return success before the write is durable
/// on a quorum of masters; callers roll their in-memory mutation back
/// when this fails.
pub trait MetaStore: Send + Sync {
    fn sync_update_meta_partition(
        &self,
        vol: &str,
        value: &MetaPartitionValue,
    ) -> Result<(), MasterError>;
}

/// In-memory store used by tests and single-master deployments.
#[derive(Default)]
pub struct MemStore {
    values: Mutex<HashMap<(String, u64), MetaPartitionValue>>,
    fail_next: std::sync::atomic::AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next write fail, for rollback tests.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }

    pub fn get(&self, vol: &str, partition_id: u64) -> Option<MetaPartitionValue> {
        self.values
            .lock()
            .unwrap()
            .get(&(vol.to_string(), partition_id))
            .cloned()
    }
}

impl MetaStore for MemStore {
    fn sync_update_meta_partition(
        &self,
        vol: &str,
        value: &MetaPartitionValue,
    ) -> Result<(), MasterError> {
        if self.fail_next.swap(false, Ordering::Relaxed) {
            return Err(MasterError::PersistFailed("injected".to_string()));
        }
        self.values
            .lock()
            .unwrap()
            .insert((vol.to_string(), value.partition_id), value.clone());
        Ok(())
    }
}

pub struct Cluster {
    pub name: String,
    registry: NodeRegistry,
    data_partitions: RwLock<HashMap<u64, Arc<RwLock<DataPartition>>>>,
    meta_partitions: RwLock<HashMap<u64, Arc<RwLock<MetaPartition>>>>,
    store: Arc<dyn MetaStore>,
    tasks: Mutex<VecDeque<AdminTask>>,
    next_partition_id: AtomicU64,
}

impl Cluster {
    pub fn new(name: &str, store: Arc<dyn MetaStore>) -> Self {
        Self {
            name: name.to_string(),
            registry: NodeRegistry::new(),
            data_partitions: RwLock::new(HashMap::new()),
            meta_partitions: RwLock::new(HashMap::new()),
            store,
            tasks: Mutex::new(VecDeque::new()),
            next_partition_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    fn alloc_partition_id(&self) -> u64 {
        self.next_partition_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_data_partition(&self, dp: DataPartition) -> Arc<RwLock<DataPartition>> {
        let id = dp.partition_id;
        self.bump_partition_id(id);
        let arc = Arc::new(RwLock::new(dp));
        self.data_partitions
            .write()
            .unwrap()
            .insert(id, arc.clone());
        arc
    }

    pub fn add_meta_partition(&self, mp: MetaPartition) -> Arc<RwLock<MetaPartition>> {
        let id = mp.partition_id;
        self.bump_partition_id(id);
        let arc = Arc::new(RwLock::new(mp));
        self.meta_partitions
            .write()
            .unwrap()
            .insert(id, arc.clone());
        arc
    }

    fn bump_partition_id(&self, seen: u64) {
        let mut cur = self.next_partition_id.load(Ordering::Relaxed);
        while cur <= seen {
            match self.next_partition_id.compare_exchange(
                cur,
                seen + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn data_partition(&self, id: u64) -> Result<Arc<RwLock<DataPartition>>, MasterError> {
        self.data_partitions
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(MasterError::DataPartitionNotFound(id))
    }

    pub fn meta_partition(&self, id: u64) -> Result<Arc<RwLock<MetaPartition>>, MasterError> {
        self.meta_partitions
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(MasterError::MetaPartitionNotFound(id))
    }

    pub fn data_partition_snapshot(&self) -> Vec<Arc<RwLock<DataPartition>>> {
        self.data_partitions
            .read()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    pub fn meta_partition_snapshot(&self) -> Vec<Arc<RwLock<MetaPartition>>> {
        self.meta_partitions
            .read()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    pub fn max_meta_partition_id(&self) -> Option<u64> {
        self.meta_partitions.read().unwrap().keys().max().copied()
    }

    pub fn put_tasks(&self, tasks: Vec<AdminTask>) {
        if tasks.is_empty() {
            return;
        }
        self.tasks.lock().unwrap().extend(tasks);
    }

    /// Takes every queued task; the caller dispatches them
    /// fire-and-forget.
    pub fn drain_tasks(&self) -> Vec<AdminTask> {
        self.tasks.lock().unwrap().drain(..).collect()
    }

    pub fn pending_task_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Creates a fresh meta partition covering `[start, end]`, placing
    /// replicas on the first `replica_num` active meta nodes.
    pub fn create_meta_partition(
        &self,
        vol: &str,
        start: u64,
        end: u64,
        replica_num: u8,
    ) -> Result<u64, MasterError> {
        let nodes = self.registry.active_meta_nodes();
        if nodes.len() < replica_num as usize {
            return Err(MasterError::NotEnoughMetaNodes {
                need: replica_num as usize,
                have: nodes.len(),
            });
        }
        let chosen = &nodes[..replica_num as usize];
        let id = self.alloc_partition_id();
        let mut mp = MetaPartition::new(id, start, end, replica_num, vol);
        mp.set_persistence_hosts(chosen.iter().map(|n| n.addr.clone()).collect());
        mp.set_peers(
            chosen
                .iter()
                .map(|n| Peer {
                    id: n.id,
                    addr: n.addr.clone(),
                })
                .collect(),
        );
        self.store
            .sync_update_meta_partition(vol, &MetaPartitionValue::from_partition(&mp))?;
        let tasks: Vec<AdminTask> = mp
            .persistence_hosts
            .iter()
            .map(|h| mp.generate_create_task(h))
            .collect();
        self.add_meta_partition(mp);
        self.put_tasks(tasks);
        Ok(id)
    }

    /// The end-range split protocol. Persists the shrunken range, pushes
    /// the update task to the leader, and creates the successor
    /// partition `[new_end + 1, MAX]`. Setting the end to MAX itself
    /// closes the range to the open upper bound and creates no
    /// successor.
    pub fn update_end(&self, partition_id: u64, new_end: u64) -> Result<(), MasterError> {
        const MAX: u64 = MAX_META_PARTITION_INODE_ID;
        let mp_arc = self.meta_partition(partition_id)?;
        let vol;
        let replica_num;
        {
            let mut mp = mp_arc.write().unwrap();
            if new_end != MAX && new_end > MAX - META_PARTITION_INODE_ID_STEP {
                warn!(
                    cluster = %self.name,
                    partition_id,
                    new_end,
                    "updateEnd rejected to prevent inode-id overflow"
                );
                return Err(MasterError::RangeOverflow { end: new_end });
            }
            // No leader: abort before any state changes.
            let task = mp.generate_update_task(new_end)?;
            let old_end = mp.end;
            mp.end = new_end;
            if let Err(e) =
                self.store
                    .sync_update_meta_partition(&mp.vol_name, &MetaPartitionValue::from_partition(&mp))
            {
                mp.end = old_end;
                error!(cluster = %self.name, partition_id, error = %e, "updateEnd persist failed");
                return Err(e);
            }
            mp.update_all_replica_ends();
            vol = mp.vol_name.clone();
            replica_num = mp.replica_num;
            self.put_tasks(vec![task]);
        }
        if new_end != MAX {
            self.create_meta_partition(&vol, new_end + 1, MAX, replica_num)?;
        }
        warn!(cluster = %self.name, partition_id, new_end, "updateEnd success");
        Ok(())
    }

    /// Moves one meta replica off `addr`: verifies the replica exists
    /// and quorum survives, swaps the host for a spare meta node,
    /// persists the new membership, and routes the offline task to the
    /// leader. The replica record is dropped; the node re-reports from
    /// its new home.
    pub fn offline_meta_replica(
        &self,
        partition_id: u64,
        addr: &str,
        timeout_sec: i64,
    ) -> Result<(), MasterError> {
        let now = crate::unix_now();
        let mp_arc = self.meta_partition(partition_id)?;
        let mut mp = mp_arc.write().unwrap();
        if mp.replica(addr).is_none() {
            return Err(MasterError::MetaReplicaNotFound(addr.to_string()));
        }
        mp.can_offline(addr, &self.registry, timeout_sec, now)?;
        let dest = self
            .registry
            .active_meta_nodes()
            .into_iter()
            .find(|n| !mp.is_persistence_host(&n.addr))
            .ok_or(MasterError::NotEnoughMetaNodes {
                need: mp.replica_num as usize + 1,
                have: self.registry.active_meta_nodes().len(),
            })?;
        let remove_peer = match mp.peers.iter().find(|p| p.addr == addr) {
            Some(p) => p.clone(),
            None => Peer {
                id: mp.replica(addr).map(|r| r.node_id).unwrap_or(0),
                addr: addr.to_string(),
            },
        };
        let add_peer = Peer {
            id: dest.id,
            addr: dest.addr.clone(),
        };
        // No leader: abort before any state changes.
        let task = mp.generate_offline_task(remove_peer.clone(), add_peer.clone())?;

        let old_hosts = mp.persistence_hosts.clone();
        let old_peers = mp.peers.clone();
        mp.persistence_hosts = old_hosts
            .iter()
            .map(|h| {
                if h == addr {
                    dest.addr.clone()
                } else {
                    h.clone()
                }
            })
            .collect();
        mp.peers = old_peers
            .iter()
            .filter(|p| p.addr != addr)
            .cloned()
            .chain(std::iter::once(add_peer))
            .collect();
        if let Err(e) = self
            .store
            .sync_update_meta_partition(&mp.vol_name, &MetaPartitionValue::from_partition(&mp))
        {
            mp.persistence_hosts = old_hosts;
            mp.peers = old_peers;
            error!(cluster = %self.name, partition_id, %addr, error = %e, "offline persist failed");
            return Err(e);
        }
        mp.remove_replica_by_addr(addr);
        self.put_tasks(vec![task]);
        warn!(
            cluster = %self.name,
            partition_id,
            %addr,
            dest = %dest.addr,
            "meta replica offline dispatched"
        );
        Ok(())
    }

    /// Replaces a meta partition's host set and peers, persisting first
    /// and rolling the in-memory view back on failure.
    pub fn update_meta_partition_info(
        &self,
        partition_id: u64,
        new_hosts: Vec<String>,
        new_peers: Vec<Peer>,
    ) -> Result<(), MasterError> {
        let mp_arc = self.meta_partition(partition_id)?;
        let mut mp = mp_arc.write().unwrap();
        let old_hosts = std::mem::replace(&mut mp.persistence_hosts, new_hosts);
        let old_peers = std::mem::replace(&mut mp.peers, new_peers);
        if let Err(e) = self
            .store
            .sync_update_meta_partition(&mp.vol_name, &MetaPartitionValue::from_partition(&mp))
        {
            mp.persistence_hosts = old_hosts;
            mp.peers = old_peers;
            warn!(cluster = %self.name, partition_id, error = %e, "update partition info failed");
            return Err(e);
        }
        warn!(
            cluster = %self.name,
            partition_id,
            old_hosts = ?old_hosts,
            new_hosts = ?mp.persistence_hosts,
            "update partition info success"
        );
        Ok(())
    }

    /// Asserts that the partition with the largest ID owns the open
    /// upper bound, repairing and re-persisting after a raced split.
    pub fn check_end(&self) {
        let Some(max_id) = self.max_meta_partition_id() else {
            return;
        };
        let Ok(mp_arc) = self.meta_partition(max_id) else {
            return;
        };
        let mut mp = mp_arc.write().unwrap();
        if mp.end != MAX_META_PARTITION_INODE_ID {
            let old_end = mp.end;
            mp.end = MAX_META_PARTITION_INODE_ID;
            if let Err(e) =
                self.store
                    .sync_update_meta_partition(&mp.vol_name, &MetaPartitionValue::from_partition(&mp))
            {
                mp.end = old_end;
                error!(cluster = %self.name, partition_id = max_id, error = %e, "checkEnd persist failed");
                return;
            }
            warn!(cluster = %self.name, partition_id = max_id, old_end, "checkEnd fixed range end");
        }
    }

    /// Folds a meta node heartbeat into the cluster.
    pub fn handle_meta_node_report(&self, addr: &str, reports: &[MetaPartitionReport]) {
        let node_id = self.registry.register_meta_node(addr);
        self.registry.meta_node_reported(addr);
        for report in reports {
            match self.meta_partition(report.partition_id) {
                Ok(mp_arc) => {
                    let mut mp = mp_arc.write().unwrap();
                    mp.on_replica_report(addr, node_id, report);
                }
                Err(_) => warn!(
                    cluster = %self.name,
                    %addr,
                    partition_id = report.partition_id,
                    "heartbeat for unknown meta partition"
                ),
            }
        }
    }

    /// Folds a data node heartbeat into the cluster.
    pub fn handle_data_node_report(&self, addr: &str, reports: &[DataPartitionReport]) {
        self.registry.register_data_node(addr);
        self.registry.data_node_reported(addr);
        for report in reports {
            match self.data_partition(report.partition_id) {
                Ok(dp_arc) => {
                    let mut dp = dp_arc.write().unwrap();
                    dp.on_replica_report(addr, report.status);
                }
                Err(_) => warn!(
                    cluster = %self.name,
                    %addr,
                    partition_id = report.partition_id,
                    "heartbeat for unknown data partition"
                ),
            }
        }
    }
}
