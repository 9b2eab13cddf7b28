use thiserror::Error;

use baudfs_proto::packet::ProtoError;
use baudfs_proto::ResultCode;

/// Errors raised by the meta node's partition and manager paths.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("inode id range exhausted")]
    InodeFull,

    #[error("not the partition leader")]
    NotLeader,

    #[error("unknown meta partition: {0}")]
    PartitionNotFound(u64),

    #[error("meta partition {0} already exists")]
    PartitionExists(u64),

    #[error("partition is stopped")]
    PartitionStopped,

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("raft: {0}")]
    Raft(String),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("encode: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for MetaError {
    fn from(e: serde_json::Error) -> Self {
        MetaError::Encode(e.to_string())
    }
}

impl From<bincode::Error> for MetaError {
    fn from(e: bincode::Error) -> Self {
        MetaError::Encode(e.to_string())
    }
}

impl MetaError {
    /// Result code a reply packet should carry for this error.
    pub fn result_code(&self) -> ResultCode {
        match self {
            MetaError::InodeFull => ResultCode::OpInodeFull,
            MetaError::NotLeader | MetaError::Raft(_) => ResultCode::OpAgain,
            MetaError::PartitionNotFound(_) => ResultCode::OpNotExist,
            MetaError::PartitionExists(_) => ResultCode::OpExist,
            _ => ResultCode::OpErr,
        }
    }
}
