//! Admin tasks: asynchronous commands from the Master to meta and data
//! nodes.
//!
//! Delivery is at-least-once. The task ID embeds the partition so a
//! receiver can recognize and drop duplicates or stale tasks.

use serde::{Deserialize, Serialize};

use crate::message::{
    CreateDataPartitionRequest, CreateMetaPartitionRequest, DeleteDataPartitionRequest,
    DeleteMetaPartitionRequest, LoadMetaPartitionRequest, MetaPartitionOfflineRequest,
    UpdateMetaPartitionRequest,
};
use crate::opcode::Opcode;

/// Typed payload of one admin task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPayload {
    /// Create a meta partition replica.
    CreateMetaPartition(CreateMetaPartitionRequest),
    /// Delete a meta partition replica.
    DeleteMetaPartition(DeleteMetaPartitionRequest),
    /// Update a meta partition's range end.
    UpdateMetaPartition(UpdateMetaPartitionRequest),
    /// Load a meta partition for verification.
    LoadMetaPartition(LoadMetaPartitionRequest),
    /// Move a meta partition replica to another peer.
    OfflineMetaPartition(MetaPartitionOfflineRequest),
    /// Create a data partition replica.
    CreateDataPartition(CreateDataPartitionRequest),
    /// Delete a data partition replica.
    DeleteDataPartition(DeleteDataPartitionRequest),
    /// Heartbeat probe.
    Heartbeat,
}

impl TaskPayload {
    /// The opcode a task with this payload travels under.
    pub fn opcode(&self) -> Opcode {
        match self {
            TaskPayload::CreateMetaPartition(_) => Opcode::CreateMetaPartition,
            TaskPayload::DeleteMetaPartition(_) => Opcode::DeleteMetaPartition,
            TaskPayload::UpdateMetaPartition(_) => Opcode::UpdateMetaPartition,
            TaskPayload::LoadMetaPartition(_) => Opcode::LoadMetaPartition,
            TaskPayload::OfflineMetaPartition(_) => Opcode::OfflineMetaPartition,
            TaskPayload::CreateDataPartition(_) => Opcode::CreateDataPartition,
            TaskPayload::DeleteDataPartition(_) => Opcode::DeleteDataPartition,
            TaskPayload::Heartbeat => Opcode::MetaNodeHeartbeat,
        }
    }
}

/// One asynchronous command addressed to a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminTask {
    /// `"<op-name>_pid[<partition_id>]"`; echoed verbatim in responses.
    pub id: String,
    /// Operation the receiver should perform.
    pub opcode: Opcode,
    /// Address of the node the task is for.
    pub target: String,
    /// Typed request body.
    pub payload: TaskPayload,
}

impl AdminTask {
    /// Builds a task for `target`, deriving the ID from the payload's
    /// opcode and the partition it concerns.
    pub fn new(target: &str, partition_id: u64, payload: TaskPayload) -> Self {
        let opcode = payload.opcode();
        Self {
            id: format!("{}_pid[{}]", opcode.name(), partition_id),
            opcode,
            target: target.to_string(),
            payload,
        }
    }
}
