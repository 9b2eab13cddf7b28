//! The dentry entity and its binary wire format.
//!
//! Marshal key:
//!  +-------+----------+------+
//!  | item  | ParentId | Name |
//!  +-------+----------+------+
//!  | bytes |    8     | rest |
//!  +-------+----------+------+
//! Marshal value:
//!  +-------+-------+------+
//!  | item  | Inode | Type |
//!  +-------+-------+------+
//!  | bytes |   8   |   4  |
//!  +-------+-------+------+
//! The entity envelope matches the inode's: `u32 key_len || key ||
//! u32 val_len || val`, big-endian. The name carries no length prefix;
//! it is the remainder of the key.

use std::cmp::Ordering;

use baudfs_proto::message::DentryInfo;
use baudfs_proto::packet::ProtoError;

use crate::inode::split_entity;

/// One directory entry: `(parent, name) -> inode`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dentry {
    pub parent_id: u64,
    pub name: String,
    pub inode: u64,
    pub mode: u32,
}

impl Dentry {
    pub fn new(parent_id: u64, name: &str, inode: u64, mode: u32) -> Self {
        Self {
            parent_id,
            name: name.to_string(),
            inode,
            mode,
        }
    }

    /// Client-facing listing view.
    pub fn to_info(&self) -> DentryInfo {
        DentryInfo {
            name: self.name.clone(),
            inode: self.inode,
            mode: self.mode,
        }
    }

    pub fn marshal_key(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.name.len());
        buf.extend_from_slice(&self.parent_id.to_be_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf
    }

    pub fn unmarshal_key(&mut self, k: &[u8]) -> Result<(), ProtoError> {
        if k.len() < 8 {
            return Err(ProtoError::Truncated {
                what: "dentry key",
                need: 8,
                got: k.len(),
            });
        }
        self.parent_id = u64::from_be_bytes(k[0..8].try_into().unwrap());
        self.name = String::from_utf8_lossy(&k[8..]).into_owned();
        Ok(())
    }

    pub fn marshal_value(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0..8].copy_from_slice(&self.inode.to_be_bytes());
        buf[8..12].copy_from_slice(&self.mode.to_be_bytes());
        buf
    }

    pub fn unmarshal_value(&mut self, val: &[u8]) -> Result<(), ProtoError> {
        if val.len() < 12 {
            return Err(ProtoError::Truncated {
                what: "dentry value",
                need: 12,
                got: val.len(),
            });
        }
        self.inode = u64::from_be_bytes(val[0..8].try_into().unwrap());
        self.mode = u32::from_be_bytes(val[8..12].try_into().unwrap());
        Ok(())
    }

    /// Encodes the full entity envelope.
    pub fn marshal(&self) -> Vec<u8> {
        let key = self.marshal_key();
        let val = self.marshal_value();
        let mut buf = Vec::with_capacity(8 + key.len() + val.len());
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&key);
        buf.extend_from_slice(&(val.len() as u32).to_be_bytes());
        buf.extend_from_slice(&val);
        buf
    }

    /// Decodes a full entity envelope.
    pub fn unmarshal(raw: &[u8]) -> Result<Self, ProtoError> {
        let (key, val) = split_entity(raw, "dentry entity")?;
        let mut d = Dentry::default();
        d.unmarshal_key(key)?;
        d.unmarshal_value(val)?;
        Ok(d)
    }
}

impl PartialOrd for Dentry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dentry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parent_id
            .cmp(&other.parent_id)
            .then_with(|| self.name.cmp(&other.name))
    }
}
