use thiserror::Error;

/// Errors raised by the master's partition and reconciliation paths.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("data partition {0} not found")]
    DataPartitionNotFound(u64),

    #[error("meta partition {0} not found")]
    MetaPartitionNotFound(u64),

    #[error("meta replica {0} not found")]
    MetaReplicaNotFound(String),

    #[error("data replica excess")]
    DataReplicaExcess,

    #[error("data replica lack")]
    DataReplicaLack,

    #[error("meta replica excess")]
    MetaReplicaExcess,

    #[error("no leader")]
    NoLeader,

    #[error("no majority replica")]
    NoMajorityReplica,

    #[error("live replicas would drop below majority after offlining {0}")]
    OfflineBreaksMajority(String),

    #[error("new end {end} exceeds the inode-id overflow guard")]
    RangeOverflow { end: u64 },

    #[error("not enough meta nodes for {need} replicas, have {have}")]
    NotEnoughMetaNodes { need: usize, have: usize },

    #[error("persist failed: {0}")]
    PersistFailed(String),
}
