//! Registry of data and meta nodes known to the master.
//!
//! Replicas reference nodes by address only; liveness questions go
//! through this registry so partitions and nodes stay independently
//! restartable.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::unix_now;

/// One storage or metadata server.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub id: u64,
    pub addr: String,
    pub is_active: bool,
    pub report_time: i64,
}

impl NodeInfo {
    fn new(id: u64, addr: &str) -> Self {
        Self {
            id,
            addr: addr.to_string(),
            is_active: true,
            report_time: unix_now(),
        }
    }
}

/// Address-keyed registry for both node kinds.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    data_nodes: RwLock<HashMap<String, NodeInfo>>,
    meta_nodes: RwLock<HashMap<String, NodeInfo>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            data_nodes: RwLock::new(HashMap::new()),
            meta_nodes: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    pub fn register_data_node(&self, addr: &str) -> u64 {
        let mut nodes = self.data_nodes.write().unwrap();
        let id = self.alloc_id();
        nodes
            .entry(addr.to_string())
            .or_insert_with(|| NodeInfo::new(id, addr))
            .id
    }

    pub fn register_meta_node(&self, addr: &str) -> u64 {
        let mut nodes = self.meta_nodes.write().unwrap();
        let id = self.alloc_id();
        nodes
            .entry(addr.to_string())
            .or_insert_with(|| NodeInfo::new(id, addr))
            .id
    }

    /// Refreshes a node's report time on heartbeat.
    pub fn data_node_reported(&self, addr: &str) {
        if let Some(n) = self.data_nodes.write().unwrap().get_mut(addr) {
            n.is_active = true;
            n.report_time = unix_now();
        }
    }

    pub fn meta_node_reported(&self, addr: &str) {
        if let Some(n) = self.meta_nodes.write().unwrap().get_mut(addr) {
            n.is_active = true;
            n.report_time = unix_now();
        }
    }

    pub fn set_data_node_active(&self, addr: &str, active: bool) {
        if let Some(n) = self.data_nodes.write().unwrap().get_mut(addr) {
            n.is_active = active;
        }
    }

    pub fn set_meta_node_active(&self, addr: &str, active: bool) {
        if let Some(n) = self.meta_nodes.write().unwrap().get_mut(addr) {
            n.is_active = active;
        }
    }

    /// Unknown addresses count as inactive.
    pub fn data_node_active(&self, addr: &str) -> bool {
        self.data_nodes
            .read()
            .unwrap()
            .get(addr)
            .map(|n| n.is_active)
            .unwrap_or(false)
    }

    pub fn meta_node_active(&self, addr: &str) -> bool {
        self.meta_nodes
            .read()
            .unwrap()
            .get(addr)
            .map(|n| n.is_active)
            .unwrap_or(false)
    }

    pub fn meta_node(&self, addr: &str) -> Option<NodeInfo> {
        self.meta_nodes.read().unwrap().get(addr).cloned()
    }

    pub fn data_node(&self, addr: &str) -> Option<NodeInfo> {
        self.data_nodes.read().unwrap().get(addr).cloned()
    }

    /// Active meta node addresses, id-ordered, for replica placement.
    pub fn active_meta_nodes(&self) -> Vec<NodeInfo> {
        let nodes = self.meta_nodes.read().unwrap();
        let mut out: Vec<NodeInfo> = nodes.values().filter(|n| n.is_active).cloned().collect();
        out.sort_by_key(|n| n.id);
        out
    }
}
