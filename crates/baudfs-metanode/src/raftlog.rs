//! The raft seam: mutations are proposed as log entries and applied by
//! the partition's state machine once committed.
//!
//! The consensus implementation itself is an external collaborator; all
//! this crate needs from it is "submit an entry to the partition
//! quorum, get the applied response back". [`LocalSequencer`] provides
//! that contract for single-replica partitions and tests by applying
//! entries directly, serialized by a mutex the way raft serializes its
//! apply loop.

use std::sync::{Arc, Mutex, RwLock, Weak};

use serde::{Deserialize, Serialize};

use crate::error::MetaError;

/// Operations recorded in a partition's raft log.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftOp {
    CreateInode,
    DeleteInode,
    Open,
    CreateDentry,
    DeleteDentry,
    ExtentsAdd,
    UpdatePartition,
    DeletePartition,
    OfflinePartition,
    StoreTick,
}

/// One log entry: the op code plus the marshaled entity it acts on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub op: RaftOp,
    pub body: Vec<u8>,
}

impl LogEntry {
    pub fn encode(&self) -> Result<Vec<u8>, MetaError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, MetaError> {
        Ok(bincode::deserialize(raw)?)
    }
}

/// Applies committed log entries; implemented by the meta partition.
pub trait StateMachine: Send + Sync {
    fn apply(&self, entry: &[u8]) -> Result<Vec<u8>, MetaError>;
}

/// Submits entries to the partition quorum and returns the applied
/// response.
pub trait RaftSequencer: Send + Sync {
    /// Replicates `entry` and returns the state machine's response once
    /// applied.
    fn propose(&self, entry: Vec<u8>) -> Result<Vec<u8>, MetaError>;

    /// Whether this replica may serialize mutations right now.
    fn is_leader(&self) -> bool;

    /// Best-effort address of the current leader, for retry routing.
    fn leader_hint(&self) -> Option<String>;
}

/// Loopback sequencer: single replica, always leader, applies entries
/// in proposal order.
#[derive(Default)]
pub struct LocalSequencer {
    sm: RwLock<Option<Weak<dyn StateMachine>>>,
    apply_order: Mutex<()>,
}

impl LocalSequencer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Binds the state machine the sequencer applies into. Weak, so the
    /// partition and its sequencer can drop independently.
    pub fn attach(&self, sm: &Arc<dyn StateMachine>) {
        *self.sm.write().unwrap() = Some(Arc::downgrade(sm));
    }
}

impl RaftSequencer for LocalSequencer {
    fn propose(&self, entry: Vec<u8>) -> Result<Vec<u8>, MetaError> {
        let _serialized = self.apply_order.lock().unwrap();
        let sm = self
            .sm
            .read()
            .unwrap()
            .as_ref()
            .and_then(|w| w.upgrade())
            .ok_or_else(|| MetaError::Raft("no state machine attached".to_string()))?;
        sm.apply(&entry)
    }

    fn is_leader(&self) -> bool {
        true
    }

    fn leader_hint(&self) -> Option<String> {
        None
    }
}
