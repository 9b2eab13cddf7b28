use thiserror::Error;

use baudfs_proto::packet::ProtoError;

/// Errors raised by the client SDK.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no writable data partition")]
    NoWritableDataPartition,

    #[error("data partition {0} not found")]
    DataPartitionNotFound(u32),

    #[error("refresh yielded {have} writable partitions, need {need}")]
    NotEnoughWritablePartitions { have: usize, need: usize },

    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        source: std::io::Error,
    },

    #[error("reply status {code:#04X} is not ok for request {request}")]
    ResultNotOk { code: u8, request: String },

    #[error("reply {reply} does not match request {request}")]
    ReplyMismatch { request: String, reply: String },

    #[error("crc mismatch: expected {expect:#010X}, got {got:#010X} on request {request}")]
    CrcMismatch {
        expect: u32,
        got: u32,
        request: String,
    },

    #[error("cannot allocate a new extent after retries")]
    ExtentAllocFailed,

    #[error("inode {0} does not exist on the meta partition")]
    InodeNotExist(u64),

    #[error("master request failed: {0}")]
    MasterRequest(String),

    #[error("read failed on every replica: {0}")]
    ReadExhausted(String),

    #[error("meta partition send retries exhausted for partition {0}")]
    MetaSendExhausted(u64),

    #[error("stream writer is closed")]
    StreamClosed,

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
