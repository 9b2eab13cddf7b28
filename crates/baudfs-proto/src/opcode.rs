//! Operation codes for admin tasks, meta operations, and data operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every operation a packet or admin task can carry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Liveness probe; no payload.
    Ping = 0x01,

    // Master -> MetaNode / DataNode admin tasks.
    /// Create a meta partition replica on the target node.
    CreateMetaPartition = 0x10,
    /// Delete a meta partition replica from the target node.
    DeleteMetaPartition = 0x11,
    /// Update a meta partition's inode-ID range end on the leader.
    UpdateMetaPartition = 0x12,
    /// Load a meta partition for verification.
    LoadMetaPartition = 0x13,
    /// Move a meta partition replica off the target node.
    OfflineMetaPartition = 0x14,
    /// Create a data partition replica on the target node.
    CreateDataPartition = 0x15,
    /// Delete a data partition replica from the target node.
    DeleteDataPartition = 0x16,
    /// Heartbeat request to a meta node.
    MetaNodeHeartbeat = 0x17,

    // Client -> MetaNode.
    /// Allocate and create an inode.
    MetaCreateInode = 0x20,
    /// Delete an inode, returning its freed extents.
    MetaDeleteInode = 0x21,
    /// Fetch one inode.
    MetaInodeGet = 0x22,
    /// Fetch a batch of inodes.
    MetaBatchInodeGet = 0x23,
    /// Create a dentry.
    MetaCreateDentry = 0x24,
    /// Delete a dentry.
    MetaDeleteDentry = 0x25,
    /// List all dentries under a parent inode.
    MetaReadDir = 0x26,
    /// Resolve (parent, name) to an inode.
    MetaLookup = 0x27,
    /// Open an inode (bumps access time through the log).
    MetaOpen = 0x28,
    /// Append an extent key to an inode's stream.
    MetaExtentsAdd = 0x29,
    /// List an inode's extent keys.
    MetaExtentsList = 0x2A,
    /// Remove extent keys from an inode's stream.
    MetaExtentsDel = 0x2B,

    // Client -> DataNode.
    /// Create a new extent on a data partition.
    CreateExtent = 0x30,
    /// Write a block to an extent.
    Write = 0x31,
    /// Read a block from an extent.
    Read = 0x32,
    /// Stream-read a range from an extent in block-sized replies.
    StreamRead = 0x33,
}

impl Opcode {
    /// Returns the stable wire value for this opcode.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a wire value.
    pub fn from_u8(v: u8) -> Option<Self> {
        let op = match v {
            0x01 => Opcode::Ping,
            0x10 => Opcode::CreateMetaPartition,
            0x11 => Opcode::DeleteMetaPartition,
            0x12 => Opcode::UpdateMetaPartition,
            0x13 => Opcode::LoadMetaPartition,
            0x14 => Opcode::OfflineMetaPartition,
            0x15 => Opcode::CreateDataPartition,
            0x16 => Opcode::DeleteDataPartition,
            0x17 => Opcode::MetaNodeHeartbeat,
            0x20 => Opcode::MetaCreateInode,
            0x21 => Opcode::MetaDeleteInode,
            0x22 => Opcode::MetaInodeGet,
            0x23 => Opcode::MetaBatchInodeGet,
            0x24 => Opcode::MetaCreateDentry,
            0x25 => Opcode::MetaDeleteDentry,
            0x26 => Opcode::MetaReadDir,
            0x27 => Opcode::MetaLookup,
            0x28 => Opcode::MetaOpen,
            0x29 => Opcode::MetaExtentsAdd,
            0x2A => Opcode::MetaExtentsList,
            0x2B => Opcode::MetaExtentsDel,
            0x30 => Opcode::CreateExtent,
            0x31 => Opcode::Write,
            0x32 => Opcode::Read,
            0x33 => Opcode::StreamRead,
            _ => return None,
        };
        Some(op)
    }

    /// Short name used in admin-task IDs and log lines.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Ping => "Ping",
            Opcode::CreateMetaPartition => "CreateMetaPartition",
            Opcode::DeleteMetaPartition => "DeleteMetaPartition",
            Opcode::UpdateMetaPartition => "UpdateMetaPartition",
            Opcode::LoadMetaPartition => "LoadMetaPartition",
            Opcode::OfflineMetaPartition => "OfflineMetaPartition",
            Opcode::CreateDataPartition => "CreateDataPartition",
            Opcode::DeleteDataPartition => "DeleteDataPartition",
            Opcode::MetaNodeHeartbeat => "MetaNodeHeartbeat",
            Opcode::MetaCreateInode => "MetaCreateInode",
            Opcode::MetaDeleteInode => "MetaDeleteInode",
            Opcode::MetaInodeGet => "MetaInodeGet",
            Opcode::MetaBatchInodeGet => "MetaBatchInodeGet",
            Opcode::MetaCreateDentry => "MetaCreateDentry",
            Opcode::MetaDeleteDentry => "MetaDeleteDentry",
            Opcode::MetaReadDir => "MetaReadDir",
            Opcode::MetaLookup => "MetaLookup",
            Opcode::MetaOpen => "MetaOpen",
            Opcode::MetaExtentsAdd => "MetaExtentsAdd",
            Opcode::MetaExtentsList => "MetaExtentsList",
            Opcode::MetaExtentsDel => "MetaExtentsDel",
            Opcode::CreateExtent => "CreateExtent",
            Opcode::Write => "Write",
            Opcode::Read => "Read",
            Opcode::StreamRead => "StreamRead",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for v in 0..=0xFFu8 {
            if let Some(op) = Opcode::from_u8(v) {
                assert_eq!(op.as_u8(), v);
            }
        }
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert!(Opcode::from_u8(0x00).is_none());
        assert!(Opcode::from_u8(0xEE).is_none());
    }

    #[test]
    fn test_opcode_names_nonempty() {
        assert_eq!(Opcode::UpdateMetaPartition.name(), "UpdateMetaPartition");
        assert_eq!(format!("{}", Opcode::Write), "Write");
    }
}
