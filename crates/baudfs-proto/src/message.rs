//! Request and response bodies exchanged as JSON packet payloads.

use serde::{Deserialize, Serialize};

use crate::extent::ExtentKey;
use crate::status::PartitionStatus;

/// One raft peer of a meta partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Node ID of the peer.
    pub id: u64,
    /// Address of the peer.
    pub addr: String,
}

/// Master -> MetaNode: create a meta partition replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMetaPartitionRequest {
    /// Partition to create.
    pub partition_id: u64,
    /// Inclusive start of the inode-ID range.
    pub start: u64,
    /// Inclusive end of the inode-ID range.
    pub end: u64,
    /// Raft members of the partition.
    pub members: Vec<Peer>,
    /// Owning volume.
    pub vol_name: String,
}

/// Master -> MetaNode: delete a meta partition replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMetaPartitionRequest {
    /// Partition to delete.
    pub partition_id: u64,
}

/// Master -> MetaNode leader: move a partition's range end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMetaPartitionRequest {
    /// Partition to update.
    pub partition_id: u64,
    /// New inclusive range end.
    pub end: u64,
    /// Owning volume.
    pub vol_name: String,
}

/// MetaNode -> Master: result of an end-range update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMetaPartitionResponse {
    /// Partition that was updated.
    pub partition_id: u64,
    /// Range end after the update.
    pub end: u64,
    /// Result status byte.
    pub status: u8,
}

/// Master -> MetaNode: load a partition for verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadMetaPartitionRequest {
    /// Partition to load.
    pub partition_id: u64,
}

/// Master -> MetaNode leader: replace one peer with another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPartitionOfflineRequest {
    /// Partition being migrated.
    pub partition_id: u64,
    /// Owning volume.
    pub vol_name: String,
    /// Peer leaving the group.
    pub remove_peer: Peer,
    /// Peer joining the group.
    pub add_peer: Peer,
}

/// Master -> DataNode: create a data partition replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDataPartitionRequest {
    /// Partition to create.
    pub partition_id: u64,
    /// Storage flavor of the partition.
    pub partition_type: String,
}

/// Master -> DataNode: delete a data partition replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDataPartitionRequest {
    /// Partition to delete.
    pub partition_id: u64,
}

/// Per-partition state carried in a meta node's heartbeat response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPartitionReport {
    /// Reporting partition.
    pub partition_id: u64,
    /// Range start the replica believes in.
    pub start: u64,
    /// Range end the replica believes in.
    pub end: u64,
    /// Highest inode ID the replica has allocated.
    pub max_inode_id: u64,
    /// Serving status of the replica.
    pub status: PartitionStatus,
    /// Whether this replica is the raft leader.
    pub is_leader: bool,
}

/// Per-partition state carried in a data node's heartbeat response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPartitionReport {
    /// Reporting partition.
    pub partition_id: u64,
    /// Serving status of the replica.
    pub status: PartitionStatus,
}

/// Attributes of one inode as returned to clients.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeInfo {
    /// Inode ID.
    pub inode: u64,
    /// File mode/type bits.
    pub mode: u32,
    /// File size in bytes.
    pub size: u64,
    /// Generation counter.
    pub generation: u64,
    /// Creation time, unix seconds.
    pub create_time: i64,
    /// Last access time, unix seconds.
    pub access_time: i64,
    /// Last modification time, unix seconds.
    pub modify_time: i64,
}

/// Client -> MetaNode: allocate and create an inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInodeRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// File mode/type bits.
    pub mode: u32,
}

/// MetaNode -> Client: created inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInodeResponse {
    /// The created inode, present on success.
    pub info: Option<InodeInfo>,
}

/// Client -> MetaNode: delete an inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteInodeRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Inode to delete.
    pub inode: u64,
}

/// MetaNode -> Client: extents freed by an inode deletion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteInodeResponse {
    /// Extent keys the caller should release on data nodes.
    pub extents: Vec<ExtentKey>,
}

/// Client -> MetaNode: open an inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Inode to open.
    pub inode: u64,
}

/// Client -> MetaNode: fetch one inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeGetRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Inode to fetch.
    pub inode: u64,
}

/// MetaNode -> Client: one inode's attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeGetResponse {
    /// The inode, present on success.
    pub info: Option<InodeInfo>,
}

/// Client -> MetaNode: fetch a batch of inodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInodeGetRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Inodes to fetch.
    pub inodes: Vec<u64>,
}

/// MetaNode -> Client: attributes for every inode found.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInodeGetResponse {
    /// Found inodes; missing IDs are silently skipped.
    pub infos: Vec<InodeInfo>,
}

/// Client -> MetaNode: create a dentry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDentryRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Parent directory inode.
    pub parent_inode: u64,
    /// Entry name.
    pub name: String,
    /// Inode the entry points at.
    pub inode: u64,
    /// File mode/type bits of the target.
    pub mode: u32,
}

/// Client -> MetaNode: delete a dentry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDentryRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Parent directory inode.
    pub parent_inode: u64,
    /// Entry name.
    pub name: String,
}

/// MetaNode -> Client: the inode the deleted dentry pointed at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDentryResponse {
    /// Inode of the removed entry.
    pub inode: u64,
}

/// Client -> MetaNode: resolve (parent, name) to an inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Parent directory inode.
    pub parent_inode: u64,
    /// Entry name.
    pub name: String,
}

/// MetaNode -> Client: resolved entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    /// Inode the entry points at.
    pub inode: u64,
    /// File mode/type bits of the target.
    pub mode: u32,
}

/// One entry in a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DentryInfo {
    /// Entry name.
    pub name: String,
    /// Inode the entry points at.
    pub inode: u64,
    /// File mode/type bits of the target.
    #[serde(rename = "type")]
    pub mode: u32,
}

/// Client -> MetaNode: list a directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Directory inode to list.
    pub parent_inode: u64,
}

/// MetaNode -> Client: directory listing, name-ordered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirResponse {
    /// Entries under the parent.
    pub children: Vec<DentryInfo>,
}

/// Client -> MetaNode: append an extent key to an inode's stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentsAddRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Target inode.
    pub inode: u64,
    /// Key to merge into the stream.
    pub extent: ExtentKey,
}

/// Client -> MetaNode: list an inode's extent keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentsListRequest {
    /// Owning volume.
    pub vol_name: String,
    /// Target partition.
    pub partition_id: u64,
    /// Target inode.
    pub inode: u64,
}

/// MetaNode -> Client: an inode's extent keys in stream order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentsListResponse {
    /// Extent keys of the inode.
    pub extents: Vec<ExtentKey>,
}

/// One data partition in the master's client view. Field names are part
/// of the HTTP contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPartitionInfo {
    /// Partition ID.
    #[serde(rename = "PartitionID")]
    pub partition_id: u32,
    /// Serving status code.
    #[serde(rename = "Status")]
    pub status: u8,
    /// Desired replica count.
    #[serde(rename = "ReplicaNum")]
    pub replica_num: u8,
    /// Storage flavor.
    #[serde(rename = "PartitionType")]
    pub partition_type: String,
    /// Replica hosts; index 0 is the write entry point.
    #[serde(rename = "Hosts")]
    pub hosts: Vec<String>,
}

/// Body of `GET /client/dataPartitions`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPartitionView {
    /// All partitions of the volume, any status.
    #[serde(rename = "DataPartitions")]
    pub data_partitions: Vec<DataPartitionInfo>,
}
