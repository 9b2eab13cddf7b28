//! BaudFS master control plane.
//!
//! The master owns cluster topology and replication decisions: it tracks
//! data/meta nodes, derives partition status from heartbeat reports, and
//! drives the replica sets toward their desired state with idempotent
//! admin tasks. Nothing here blocks on task completion; desired state is
//! reasserted on every reconciler tick.

pub mod cluster;
pub mod data_partition;
pub mod data_replica;
pub mod error;
pub mod meta_partition;
pub mod node;
pub mod reconciler;

pub use cluster::{Cluster, MemStore, MetaStore};
pub use error::MasterError;
pub use reconciler::{Reconciler, ReconcilerConfig};

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
