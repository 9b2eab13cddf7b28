//! BaudFS meta node: the namespace tier.
//!
//! Each meta partition owns a contiguous inode-ID range and hosts two
//! ordered containers, the inode tree and the dentry tree. Every
//! mutation travels through the partition's raft sequencer and is
//! applied by a single-threaded state machine; reads that tolerate
//! slight staleness go straight to the trees.

pub mod dentry;
pub mod error;
pub mod inode;
pub mod manager;
pub mod manifest;
pub mod partition;
pub mod raftlog;
pub mod server;
pub mod tree;

pub use error::MetaError;
pub use manager::{MetaManager, MetaManagerConfig};
pub use partition::{MetaPartition, MetaPartitionConfig};
pub use raftlog::{LocalSequencer, RaftSequencer};

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
