//! One replica of a data partition as seen by the master.

use baudfs_proto::PartitionStatus;

use crate::node::NodeRegistry;
use crate::unix_now;

#[derive(Clone, Debug)]
pub struct DataReplica {
    pub addr: String,
    pub status: PartitionStatus,
    pub report_time: i64,
}

impl DataReplica {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            status: PartitionStatus::Unavailable,
            report_time: unix_now(),
        }
    }

    /// A replica is live when its node is active and its last report is
    /// within the timeout.
    pub fn is_live(&self, registry: &NodeRegistry, timeout_sec: i64, now: i64) -> bool {
        registry.data_node_active(&self.addr) && now - self.report_time < timeout_sec
    }

    /// True when the replica has not reported within `miss_sec`.
    pub fn is_missed(&self, miss_sec: i64, now: i64) -> bool {
        now - self.report_time > miss_sec
    }

    /// Folds a heartbeat report into the replica record.
    pub fn update_metric(&mut self, status: PartitionStatus) {
        self.status = status;
        self.report_time = unix_now();
    }

    /// Downgrades a stale replica so status derivation sees it as dead.
    pub fn check_liveness(&mut self, registry: &NodeRegistry, timeout_sec: i64, now: i64) {
        if !self.is_live(registry, timeout_sec, now) {
            self.status = PartitionStatus::Unavailable;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_requires_active_node() {
        let reg = NodeRegistry::new();
        let r = DataReplica::new("d1:9030");
        let now = unix_now();
        assert!(!r.is_live(&reg, 60, now));
        reg.register_data_node("d1:9030");
        assert!(r.is_live(&reg, 60, now));
        reg.set_data_node_active("d1:9030", false);
        assert!(!r.is_live(&reg, 60, now));
    }

    #[test]
    fn test_live_requires_fresh_report() {
        let reg = NodeRegistry::new();
        reg.register_data_node("d1:9030");
        let mut r = DataReplica::new("d1:9030");
        let now = unix_now();
        r.report_time = now - 120;
        assert!(!r.is_live(&reg, 60, now));
        assert!(r.is_missed(60, now));
    }

    #[test]
    fn test_check_liveness_downgrades_stale() {
        let reg = NodeRegistry::new();
        reg.register_data_node("d1:9030");
        let mut r = DataReplica::new("d1:9030");
        r.update_metric(PartitionStatus::ReadWrite);
        let now = unix_now();
        r.check_liveness(&reg, 60, now);
        assert_eq!(r.status, PartitionStatus::ReadWrite);
        r.report_time = now - 120;
        r.check_liveness(&reg, 60, now);
        assert_eq!(r.status, PartitionStatus::Unavailable);
    }
}
