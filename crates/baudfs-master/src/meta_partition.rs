//! Meta partition model: replicas, majority-based status, offline
//! pre-checks, and replica task generation.
//!
//! The end-range split protocol (`update_end`/`check_end`) lives on
//! [`crate::cluster::Cluster`] because it persists through the master's
//! replicated store and creates the successor partition.

use std::collections::HashMap;

use tracing::warn;

use baudfs_proto::message::{
    CreateMetaPartitionRequest, DeleteMetaPartitionRequest, MetaPartitionOfflineRequest,
    MetaPartitionReport, Peer, UpdateMetaPartitionRequest,
};
use baudfs_proto::{AdminTask, PartitionStatus, TaskPayload};

use crate::error::MasterError;
use crate::node::NodeRegistry;
use crate::unix_now;

/// Open upper bound of the inode-ID space; only the max-ID partition
/// may own it.
pub const MAX_META_PARTITION_INODE_ID: u64 = 1 << 63;

/// Minimum width reserved for a successor partition when a range is
/// split; `update_end` rejects ends that leave less than this.
pub const META_PARTITION_INODE_ID_STEP: u64 = 1 << 24;

#[derive(Clone, Debug)]
pub struct MetaReplica {
    pub addr: String,
    pub start: u64,
    pub end: u64,
    pub node_id: u64,
    pub report_time: i64,
    pub status: PartitionStatus,
    pub is_leader: bool,
}

impl MetaReplica {
    pub fn new(start: u64, end: u64, node_id: u64, addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            start,
            end,
            node_id,
            report_time: unix_now(),
            status: PartitionStatus::Unavailable,
            is_leader: false,
        }
    }

    pub fn is_active(&self, registry: &NodeRegistry, timeout_sec: i64, now: i64) -> bool {
        registry.meta_node_active(&self.addr)
            && self.status != PartitionStatus::Unavailable
            && now - self.report_time < timeout_sec
    }

    pub fn is_missed(&self, miss_sec: i64, now: i64) -> bool {
        now - self.report_time > miss_sec
    }

    pub fn update_metric(&mut self, report: &MetaPartitionReport) {
        self.status = report.status;
        self.is_leader = report.is_leader;
        self.report_time = unix_now();
    }
}

#[derive(Debug)]
pub struct MetaPartition {
    pub partition_id: u64,
    pub start: u64,
    pub end: u64,
    /// Highest inode ID any replica has reported allocated.
    pub max_node_id: u64,
    pub replica_num: u8,
    pub status: PartitionStatus,
    pub vol_name: String,
    pub persistence_hosts: Vec<String>,
    pub peers: Vec<Peer>,
    pub replicas: Vec<MetaReplica>,
    pub miss_nodes: HashMap<String, i64>,
}

impl MetaPartition {
    pub fn new(partition_id: u64, start: u64, end: u64, replica_num: u8, vol_name: &str) -> Self {
        Self {
            partition_id,
            start,
            end,
            max_node_id: start,
            replica_num,
            status: PartitionStatus::Unavailable,
            vol_name: vol_name.to_string(),
            persistence_hosts: Vec::new(),
            peers: Vec::new(),
            replicas: Vec::new(),
            miss_nodes: HashMap::new(),
        }
    }

    pub fn set_persistence_hosts(&mut self, hosts: Vec<String>) {
        self.persistence_hosts = hosts;
    }

    pub fn set_peers(&mut self, peers: Vec<Peer>) {
        self.peers = peers;
    }

    pub fn is_persistence_host(&self, addr: &str) -> bool {
        self.persistence_hosts.iter().any(|h| h == addr)
    }

    pub fn replica(&self, addr: &str) -> Option<&MetaReplica> {
        self.replicas.iter().find(|r| r.addr == addr)
    }

    fn replica_mut(&mut self, addr: &str) -> Option<&mut MetaReplica> {
        self.replicas.iter_mut().find(|r| r.addr == addr)
    }

    /// Adds a replica record unless one exists for the same address.
    pub fn add_replica(&mut self, r: MetaReplica) {
        if self.replica(&r.addr).is_none() {
            self.replicas.push(r);
        }
    }

    pub fn remove_replica_by_addr(&mut self, addr: &str) {
        self.replicas.retain(|r| r.addr != addr);
    }

    pub fn update_all_replica_ends(&mut self) {
        let end = self.end;
        for r in self.replicas.iter_mut() {
            r.end = end;
        }
    }

    pub fn check_and_remove_miss_replica(&mut self, addr: &str) {
        self.miss_nodes.remove(addr);
    }

    /// Folds a heartbeat report from a node into the partition. Reports
    /// from hosts outside the persistence set are ignored.
    pub fn on_replica_report(&mut self, addr: &str, node_id: u64, report: &MetaPartitionReport) {
        if !self.is_persistence_host(addr) {
            return;
        }
        if self.replica(addr).is_none() {
            let r = MetaReplica::new(self.start, self.end, node_id, addr);
            self.add_replica(r);
        }
        self.max_node_id = self.max_node_id.max(report.max_inode_id);
        if let Some(r) = self.replica_mut(addr) {
            r.update_metric(report);
        }
        self.check_and_remove_miss_replica(addr);
    }

    pub fn live_replicas(
        &self,
        registry: &NodeRegistry,
        timeout_sec: i64,
        now: i64,
    ) -> Vec<&MetaReplica> {
        self.replicas
            .iter()
            .filter(|r| r.is_active(registry, timeout_sec, now))
            .collect()
    }

    pub fn leader_replica(&self) -> Result<&MetaReplica, MasterError> {
        self.replicas
            .iter()
            .find(|r| r.is_leader)
            .ok_or(MasterError::NoLeader)
    }

    /// Majority-based status derivation: losing quorum makes the
    /// partition Unavailable, otherwise the leader's status rules; no
    /// known leader also means Unavailable.
    pub fn check_status(&mut self, registry: &NodeRegistry, timeout_sec: i64, now: i64) {
        let live = self.live_replicas(registry, timeout_sec, now).len();
        self.status = if live <= (self.replica_num / 2) as usize {
            PartitionStatus::Unavailable
        } else {
            match self.leader_replica() {
                Ok(leader) => leader.status,
                Err(_) => PartitionStatus::Unavailable,
            }
        };
    }

    pub fn check_replica_num(&self, cluster: &str, expected: u8) {
        if self.replica_num != expected {
            warn!(
                cluster,
                vol = %self.vol_name,
                partition_id = self.partition_id,
                expected,
                current = self.replica_num,
                "meta partition replica num diverges"
            );
        }
    }

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

    /// Warns for stale replicas on persistence hosts and for hosts with
    /// no replica record, debounced per address.
    pub fn check_replica_miss(&mut self, cluster: &str, miss_sec: i64, warn_interval: i64, now: i64) {
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
                    vol = %self.vol_name,
                    partition_id = self.partition_id,
                    %addr,
                    miss_sec,
                    "meta replica miss"
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
                    vol = %self.vol_name,
                    partition_id = self.partition_id,
                    %addr,
                    "meta replica host never reported"
                );
            }
        }
    }

    /// Emits excess/lack replica tasks; excess first.
    pub fn generate_replica_tasks(&self, cluster: &str) -> Vec<AdminTask> {
        let mut tasks = Vec::new();
        if let Some((addr, task)) = self.delete_excess_replication() {
            warn!(
                cluster,
                partition_id = self.partition_id,
                %addr,
                error = %MasterError::MetaReplicaExcess,
                hosts = ?self.persistence_hosts,
                "excess meta replication"
            );
            tasks.push(task);
        }
        let lack = self.lack_replication();
        if !lack.is_empty() {
            warn!(
                cluster,
                partition_id = self.partition_id,
                addrs = ?lack,
                hosts = ?self.persistence_hosts,
                "lack meta replication"
            );
            for addr in lack {
                tasks.push(self.generate_create_task(&addr));
            }
        }
        tasks
    }

    fn delete_excess_replication(&self) -> Option<(String, AdminTask)> {
        let replica = self
            .replicas
            .iter()
            .find(|r| !self.is_persistence_host(&r.addr))?;
        let task = AdminTask::new(
            &replica.addr,
            self.partition_id,
            TaskPayload::DeleteMetaPartition(DeleteMetaPartitionRequest {
                partition_id: self.partition_id,
            }),
        );
        Some((replica.addr.clone(), task))
    }

    /// First persistence host with no replica record, as a single-entry
    /// list; replicas are added one per tick.
    fn lack_replication(&self) -> Vec<String> {
        self.persistence_hosts
            .iter()
            .find(|h| self.replica(h).is_none())
            .cloned()
            .into_iter()
            .collect()
    }

    /// A create task carrying the partition's current range and peers.
    pub fn generate_create_task(&self, addr: &str) -> AdminTask {
        AdminTask::new(
            addr,
            self.partition_id,
            TaskPayload::CreateMetaPartition(CreateMetaPartitionRequest {
                partition_id: self.partition_id,
                start: self.start,
                end: self.end,
                members: self.peers.clone(),
                vol_name: self.vol_name.clone(),
            }),
        )
    }

    /// An end-range update task addressed to the leader replica, or
    /// `NoLeader` when none is known.
    pub fn generate_update_task(&self, end: u64) -> Result<AdminTask, MasterError> {
        let leader = self.leader_replica()?;
        Ok(AdminTask::new(
            &leader.addr,
            self.partition_id,
            TaskPayload::UpdateMetaPartition(UpdateMetaPartitionRequest {
                partition_id: self.partition_id,
                end,
                vol_name: self.vol_name.clone(),
            }),
        ))
    }

    /// An offline task addressed to the leader, swapping one peer for
    /// another.
    pub fn generate_offline_task(
        &self,
        remove_peer: Peer,
        add_peer: Peer,
    ) -> Result<AdminTask, MasterError> {
        let leader = self.leader_replica()?;
        Ok(AdminTask::new(
            &leader.addr,
            self.partition_id,
            TaskPayload::OfflineMetaPartition(MetaPartitionOfflineRequest {
                partition_id: self.partition_id,
                vol_name: self.vol_name.clone(),
                remove_peer,
                add_peer,
            }),
        ))
    }

    /// Refuses an offline that would lose quorum: either quorum is
    /// already lost, or the live set is exactly a majority and contains
    /// the candidate.
    pub fn can_offline(
        &self,
        addr: &str,
        registry: &NodeRegistry,
        timeout_sec: i64,
        now: i64,
    ) -> Result<(), MasterError> {
        let live = self.live_replicas(registry, timeout_sec, now);
        let majority = (self.replica_num / 2 + 1) as usize;
        if live.len() < majority {
            return Err(MasterError::NoMajorityReplica);
        }
        if live.len() == majority && live.iter().any(|r| r.addr == addr) {
            return Err(MasterError::OfflineBreaksMajority(addr.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(addrs: &[&str]) -> NodeRegistry {
        let reg = NodeRegistry::new();
        for a in addrs {
            reg.register_meta_node(a);
        }
        reg
    }

    fn report(partition_id: u64, status: PartitionStatus, is_leader: bool) -> MetaPartitionReport {
        MetaPartitionReport {
            partition_id,
            start: 0,
            end: 1000,
            max_inode_id: 0,
            status,
            is_leader,
        }
    }

    fn partition_with_reports(
        hosts: &[&str],
        leader: Option<&str>,
        reported: &[&str],
    ) -> MetaPartition {
        let mut mp = MetaPartition::new(1, 0, 1000, 3, "vol");
        mp.set_persistence_hosts(hosts.iter().map(|s| s.to_string()).collect());
        for (i, addr) in reported.iter().enumerate() {
            let r = report(1, PartitionStatus::ReadWrite, leader == Some(*addr));
            mp.on_replica_report(addr, i as u64 + 1, &r);
        }
        mp
    }

    #[test]
    fn test_at_most_one_leader() {
        let mp = partition_with_reports(&["a", "b", "c"], Some("a"), &["a", "b", "c"]);
        assert_eq!(mp.replicas.iter().filter(|r| r.is_leader).count(), 1);
    }

    #[test]
    fn test_check_status_majority_leader() {
        let reg = registry_with(&["a", "b", "c"]);
        let mut mp = partition_with_reports(&["a", "b", "c"], Some("a"), &["a", "b", "c"]);
        mp.check_status(&reg, 60, unix_now());
        assert_eq!(mp.status, PartitionStatus::ReadWrite);
    }

    #[test]
    fn test_check_status_no_majority_unavailable() {
        let reg = registry_with(&["a", "b", "c"]);
        let mut mp = partition_with_reports(&["a", "b", "c"], Some("a"), &["a"]);
        mp.check_status(&reg, 60, unix_now());
        assert_eq!(mp.status, PartitionStatus::Unavailable);
    }

    #[test]
    fn test_check_status_no_leader_unavailable() {
        let reg = registry_with(&["a", "b", "c"]);
        let mut mp = partition_with_reports(&["a", "b", "c"], None, &["a", "b", "c"]);
        mp.check_status(&reg, 60, unix_now());
        assert_eq!(mp.status, PartitionStatus::Unavailable);
    }

    #[test]
    fn test_report_from_foreign_host_ignored() {
        let mut mp = partition_with_reports(&["a", "b", "c"], None, &["a"]);
        let r = report(1, PartitionStatus::ReadWrite, false);
        mp.on_replica_report("z", 9, &r);
        assert!(mp.replica("z").is_none());
    }

    #[test]
    fn test_max_node_id_tracks_reports() {
        let mut mp = partition_with_reports(&["a", "b", "c"], None, &[]);
        let mut r = report(1, PartitionStatus::ReadWrite, false);
        r.max_inode_id = 42;
        mp.on_replica_report("a", 1, &r);
        assert_eq!(mp.max_node_id, 42);
        // A lagging replica cannot move the watermark backward.
        r.max_inode_id = 17;
        mp.on_replica_report("b", 2, &r);
        assert_eq!(mp.max_node_id, 42);
        assert!(mp.start <= mp.max_node_id && mp.max_node_id <= mp.end);
    }

    #[test]
    fn test_can_offline_quorum_rules() {
        let reg = registry_with(&["a", "b", "c"]);
        let now = unix_now();

        // All three live: any host may go.
        let mp = partition_with_reports(&["a", "b", "c"], Some("a"), &["a", "b", "c"]);
        assert!(mp.can_offline("a", &reg, 60, now).is_ok());

        // Exactly a majority live and the candidate is in it: refuse.
        let mp = partition_with_reports(&["a", "b", "c"], Some("a"), &["a", "b"]);
        assert!(matches!(
            mp.can_offline("a", &reg, 60, now),
            Err(MasterError::OfflineBreaksMajority(_))
        ));
        // Candidate outside the live set: allowed.
        assert!(mp.can_offline("c", &reg, 60, now).is_ok());

        // Quorum already lost: refuse with the majority error.
        let mp = partition_with_reports(&["a", "b", "c"], Some("a"), &["a"]);
        assert!(matches!(
            mp.can_offline("a", &reg, 60, now),
            Err(MasterError::NoMajorityReplica)
        ));
    }

    #[test]
    fn test_can_offline_monotonic_in_live_set() {
        let reg = registry_with(&["a", "b", "c"]);
        let now = unix_now();
        // ok with live {a, b} for candidate c implies ok with {a, b, c}.
        let smaller = partition_with_reports(&["a", "b", "c"], Some("a"), &["a", "b"]);
        assert!(smaller.can_offline("c", &reg, 60, now).is_ok());
        let larger = partition_with_reports(&["a", "b", "c"], Some("a"), &["a", "b", "c"]);
        assert!(larger.can_offline("c", &reg, 60, now).is_ok());
    }

    #[test]
    fn test_generate_update_task_requires_leader() {
        let mp = partition_with_reports(&["a", "b", "c"], None, &["a", "b", "c"]);
        assert!(matches!(
            mp.generate_update_task(500),
            Err(MasterError::NoLeader)
        ));

        let mp = partition_with_reports(&["a", "b", "c"], Some("b"), &["a", "b", "c"]);
        let task = mp.generate_update_task(500).unwrap();
        assert_eq!(task.target, "b");
        assert_eq!(task.id, "UpdateMetaPartition_pid[1]");
    }

    #[test]
    fn test_replica_tasks_excess_then_lack() {
        let mut mp = partition_with_reports(&["a", "b", "c"], Some("a"), &["a", "b"]);
        // d reports although it is not a persistence host: force a record.
        mp.replicas.push(MetaReplica::new(0, 1000, 9, "d"));
        let tasks = mp.generate_replica_tasks("test");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].target, "d");
        assert_eq!(tasks[0].opcode, baudfs_proto::Opcode::DeleteMetaPartition);
        assert_eq!(tasks[1].target, "c");
        assert_eq!(tasks[1].opcode, baudfs_proto::Opcode::CreateMetaPartition);
    }

    #[test]
    fn test_meta_miss_debounce_fresh_path_warns() {
        let mut mp = partition_with_reports(&["a", "b", "c"], None, &["a", "b"]);
        let now = unix_now();
        assert!(mp.need_warn_miss("c", 300, now));
        assert!(!mp.need_warn_miss("c", 300, now + 1));
    }
}
