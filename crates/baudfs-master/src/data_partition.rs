//! Data partition model and its per-tick reconciliation steps.
//!
//! Each step takes the partition's write lock at the caller and is pure
//! with respect to the partition except for `check_replication_task`,
//! which emits admin tasks. Warnings are debounced per address through
//! `miss_nodes`.

use std::collections::HashMap;

use tracing::{error, info, warn};

use baudfs_proto::message::{CreateDataPartitionRequest, DeleteDataPartitionRequest};
use baudfs_proto::{AdminTask, PartitionStatus, TaskPayload};

use crate::data_replica::DataReplica;
use crate::error::MasterError;
use crate::node::NodeRegistry;
use crate::unix_now;

#[derive(Debug)]
pub struct DataPartition {
    pub partition_id: u64,
    pub replica_num: u8,
    pub partition_type: String,
    pub status: PartitionStatus,
    /// Master-decreed desired host set; the reconciler drives toward it.
    pub persistence_hosts: Vec<String>,
    pub replicas: Vec<DataReplica>,
    /// Last-warned unix second per address, for warn debounce.
    pub miss_nodes: HashMap<String, i64>,
    pub is_recovering: bool,
}

impl DataPartition {
    pub fn new(partition_id: u64, replica_num: u8, partition_type: &str) -> Self {
        Self {
            partition_id,
            replica_num,
            partition_type: partition_type.to_string(),
            status: PartitionStatus::Unavailable,
            persistence_hosts: Vec::new(),
            replicas: Vec::new(),
            miss_nodes: HashMap::new(),
            is_recovering: false,
        }
    }

    pub fn replica(&self, addr: &str) -> Option<&DataReplica> {
        self.replicas.iter().find(|r| r.addr == addr)
    }

    pub fn is_persistence_host(&self, addr: &str) -> bool {
        self.persistence_hosts.iter().any(|h| h == addr)
    }

    /// Folds a heartbeat report from `addr` into the partition,
    /// creating the replica record on first contact.
    pub fn on_replica_report(&mut self, addr: &str, status: PartitionStatus) {
        match self.replicas.iter().position(|r| r.addr == addr) {
            Some(i) => self.replicas[i].update_metric(status),
            None => {
                let mut r = DataReplica::new(addr);
                r.update_metric(status);
                self.replicas.push(r);
            }
        }
        self.miss_nodes.remove(addr);
    }

    fn live_replicas_on_hosts(
        &self,
        registry: &NodeRegistry,
        timeout_sec: i64,
        now: i64,
    ) -> Vec<&DataReplica> {
        self.replicas
            .iter()
            .filter(|r| self.is_persistence_host(&r.addr) && r.is_live(registry, timeout_sec, now))
            .collect()
    }

    /// Derives partition status from the live replicas on the
    /// persistence hosts.
    pub fn check_status(&mut self, registry: &NodeRegistry, timeout_sec: i64, now: i64) {
        let (live_count, all_read_write) = {
            let live = self.live_replicas_on_hosts(registry, timeout_sec, now);
            let all_rw = live.iter().all(|r| r.status == PartitionStatus::ReadWrite);
            (live.len(), all_rw)
        };
        self.status = if live_count == self.replica_num as usize && all_read_write {
            PartitionStatus::ReadWrite
        } else {
            PartitionStatus::ReadOnly
        };
        info!(
            partition_id = self.partition_id,
            replica_num = self.replica_num,
            live = live_count,
            status = %self.status,
            hosts = ?self.persistence_hosts,
            "checkStatus"
        );
    }

    /// Downgrades every stale replica record to Unavailable.
    pub fn check_replica_liveness(&mut self, registry: &NodeRegistry, timeout_sec: i64, now: i64) {
        for r in self.replicas.iter_mut() {
            r.check_liveness(registry, timeout_sec, now);
        }
    }

    /// Returns true when a warning for `addr` is due, recording the warn
    /// time. A first miss warns immediately.
    fn need_warn_miss(&mut self, addr: &str, warn_interval: i64, now: i64) -> bool {
        use std::collections::hash_map::Entry;
        match self.miss_nodes.entry(addr.to_string()) {
            Entry::Vacant(e) => {
                e.insert(now);
                true
            }
            Entry::Occupied(mut e) => {
                if now - *e.get() > warn_interval {
                    e.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Warns for replicas that stopped reporting and for hosts that
    /// never reported at all.
    pub fn check_miss(&mut self, cluster: &str, miss_sec: i64, warn_interval: i64, now: i64) {
        let stale: Vec<String> = self
            .replicas
            .iter()
            .filter(|r| self.is_persistence_host(&r.addr) && r.is_missed(miss_sec, now))
            .map(|r| r.addr.clone())
            .collect();
        for addr in stale {
            if self.need_warn_miss(&addr, warn_interval, now) {
                warn!(
                    cluster,
                    partition_id = self.partition_id,
                    %addr,
                    miss_sec,
                    "data replica miss, migrate by hand"
                );
            }
        }

        let never: Vec<String> = self
            .persistence_hosts
            .iter()
            .filter(|h| self.replica(h).is_none())
            .cloned()
            .collect();
        for addr in never {
            if self.need_warn_miss(&addr, warn_interval, now) {
                warn!(
                    cluster,
                    partition_id = self.partition_id,
                    %addr,
                    "data replica host never reported"
                );
            }
        }
    }

    /// Collects hosts whose replica reports Unavailable. A partial disk
    /// failure drops the partition to ReadOnly; total loss is left to a
    /// separate escalation path.
    pub fn check_disk_error(&mut self, cluster: &str) -> Vec<String> {
        let disk_error_addrs: Vec<String> = self
            .persistence_hosts
            .iter()
            .filter(|h| {
                self.replica(h)
                    .map(|r| r.status == PartitionStatus::Unavailable)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        if !disk_error_addrs.is_empty() && disk_error_addrs.len() != self.replica_num as usize {
            self.status = PartitionStatus::ReadOnly;
        }

        for addr in &disk_error_addrs {
            warn!(
                cluster,
                partition_id = self.partition_id,
                %addr,
                "disk error on data replica, remove it from hosts"
            );
        }
        disk_error_addrs
    }

    /// Emits replication tasks. Excess is removed before lack is added
    /// so the replica count cannot momentarily exceed `replica_num`;
    /// lack is not reported while the partition is ReadWrite.
    pub fn check_replication_task(&mut self) -> Vec<AdminTask> {
        let mut tasks = Vec::new();
        if let Some((addr, task)) = self.delete_excess_replication() {
            warn!(
                partition_id = self.partition_id,
                %addr,
                error = %MasterError::DataReplicaExcess,
                hosts = ?self.persistence_hosts,
                "excess replication"
            );
            tasks.push(task);
        }
        if self.status == PartitionStatus::ReadWrite {
            return tasks;
        }
        if let Some((addr, task)) = self.add_lack_replication() {
            warn!(
                partition_id = self.partition_id,
                %addr,
                error = %MasterError::DataReplicaLack,
                hosts = ?self.persistence_hosts,
                "lack replication, creating data replica"
            );
            tasks.push(task);
        } else {
            self.set_to_normal();
        }
        tasks
    }

    /// First replica living outside the persistence hosts, if any.
    fn delete_excess_replication(&self) -> Option<(String, AdminTask)> {
        let replica = self
            .replicas
            .iter()
            .find(|r| !self.is_persistence_host(&r.addr))?;
        error!(
            partition_id = self.partition_id,
            addr = %replica.addr,
            "deleteExcessReplication"
        );
        let task = AdminTask::new(
            &replica.addr,
            self.partition_id,
            TaskPayload::DeleteDataPartition(DeleteDataPartitionRequest {
                partition_id: self.partition_id,
            }),
        );
        Some((replica.addr.clone(), task))
    }

    /// First persistence host with no replica record, if any. Marks the
    /// partition recovering.
    fn add_lack_replication(&mut self) -> Option<(String, AdminTask)> {
        let addr = self
            .persistence_hosts
            .iter()
            .find(|h| self.replica(h).is_none())?
            .clone();
        error!(partition_id = self.partition_id, %addr, "addLackReplication");
        let task = AdminTask::new(
            &addr,
            self.partition_id,
            TaskPayload::CreateDataPartition(CreateDataPartitionRequest {
                partition_id: self.partition_id,
                partition_type: self.partition_type.clone(),
            }),
        );
        self.is_recovering = true;
        Some((addr, task))
    }

    pub fn set_to_normal(&mut self) {
        self.is_recovering = false;
    }
}
