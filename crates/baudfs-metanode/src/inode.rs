//! The inode entity and its binary wire format.
//!
//! Marshal key:
//!  +-------+-------+
//!  | item  | Inode |
//!  +-------+-------+
//!  | bytes |   8   |
//!  +-------+-------+
//! Marshal value:
//!  +-------+------+------+-----+----+----+----+------------------+
//!  | item  | Type | Size | Gen | CT | AT | MT | MarshaledExtents |
//!  +-------+------+------+-----+----+----+----+------------------+
//!  | bytes |  4   |  8   |  8  | 8  | 8  | 8  |       rest       |
//!  +-------+------+------+-----+----+----+----+------------------+
//! Marshal entity:
//!  +-------+-----------+--------------+-----------+--------------+
//!  | item  | KeyLength | MarshaledKey | ValLength | MarshaledVal |
//!  +-------+-----------+--------------+-----------+--------------+
//!  | bytes |     4     |   KeyLength  |     4     |   ValLength  |
//!  +-------+-----------+--------------+-----------+--------------+
//! All integers big-endian. The extents blob is present only when the
//! stream is non-empty.

use std::cmp::Ordering;

use baudfs_proto::message::InodeInfo;
use baudfs_proto::packet::ProtoError;
use baudfs_proto::{ExtentKey, StreamKey};

use crate::unix_now;

const INODE_VALUE_FIXED_LEN: usize = 44;

/// One file or directory in a meta partition's namespace range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inode {
    pub inode: u64,
    pub mode: u32,
    pub size: u64,
    pub generation: u64,
    pub create_time: i64,
    pub access_time: i64,
    pub modify_time: i64,
    pub extents: StreamKey,
}

impl Inode {
    /// A fresh inode with generation 1 and all times set to now.
    pub fn new(inode: u64, mode: u32) -> Self {
        let ts = unix_now();
        Self {
            inode,
            mode,
            size: 0,
            generation: 1,
            create_time: ts,
            access_time: ts,
            modify_time: ts,
            extents: StreamKey::new(inode),
        }
    }

    /// Merges an extent key into the stream and refreshes the derived
    /// fields: size is the sum of all extent sizes.
    pub fn append_extent(&mut self, ext: ExtentKey) {
        self.extents.put(ext);
        self.size = self.extents.size();
        self.modify_time = unix_now();
    }

    /// Client-facing attribute view.
    pub fn to_info(&self) -> InodeInfo {
        InodeInfo {
            inode: self.inode,
            mode: self.mode,
            size: self.size,
            generation: self.generation,
            create_time: self.create_time,
            access_time: self.access_time,
            modify_time: self.modify_time,
        }
    }

    pub fn marshal_key(&self) -> [u8; 8] {
        self.inode.to_be_bytes()
    }

    pub fn unmarshal_key(&mut self, k: &[u8]) -> Result<(), ProtoError> {
        if k.len() < 8 {
            return Err(ProtoError::Truncated {
                what: "inode key",
                need: 8,
                got: k.len(),
            });
        }
        self.inode = u64::from_be_bytes(k[0..8].try_into().unwrap());
        Ok(())
    }

    pub fn marshal_value(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.mode.to_be_bytes());
        buf.extend_from_slice(&self.size.to_be_bytes());
        buf.extend_from_slice(&self.generation.to_be_bytes());
        buf.extend_from_slice(&self.create_time.to_be_bytes());
        buf.extend_from_slice(&self.access_time.to_be_bytes());
        buf.extend_from_slice(&self.modify_time.to_be_bytes());
        if self.extents.extent_count() != 0 {
            buf.extend_from_slice(&self.extents.marshal_binary());
        }
        buf
    }

    pub fn unmarshal_value(&mut self, val: &[u8]) -> Result<(), ProtoError> {
        if val.len() < INODE_VALUE_FIXED_LEN {
            return Err(ProtoError::Truncated {
                what: "inode value",
                need: INODE_VALUE_FIXED_LEN,
                got: val.len(),
            });
        }
        self.mode = u32::from_be_bytes(val[0..4].try_into().unwrap());
        self.size = u64::from_be_bytes(val[4..12].try_into().unwrap());
        self.generation = u64::from_be_bytes(val[12..20].try_into().unwrap());
        self.create_time = i64::from_be_bytes(val[20..28].try_into().unwrap());
        self.access_time = i64::from_be_bytes(val[28..36].try_into().unwrap());
        self.modify_time = i64::from_be_bytes(val[36..44].try_into().unwrap());
        self.extents = StreamKey::new(self.inode);
        if val.len() > INODE_VALUE_FIXED_LEN {
            self.extents.unmarshal_binary(&val[INODE_VALUE_FIXED_LEN..])?;
        }
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
        let (key, val) = split_entity(raw, "inode entity")?;
        let mut ino = Inode::new(0, 0);
        ino.unmarshal_key(key)?;
        ino.unmarshal_value(val)?;
        Ok(ino)
    }
}

impl PartialOrd for Inode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Inode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inode.cmp(&other.inode)
    }
}

/// Splits a `u32 key_len || key || u32 val_len || val` envelope.
pub(crate) fn split_entity<'a>(
    raw: &'a [u8],
    what: &'static str,
) -> Result<(&'a [u8], &'a [u8]), ProtoError> {
    let need_header = |need: usize, got: usize| ProtoError::Truncated { what, need, got };
    if raw.len() < 4 {
        return Err(need_header(4, raw.len()));
    }
    let key_len = u32::from_be_bytes(raw[0..4].try_into().unwrap()) as usize;
    if raw.len() < 4 + key_len + 4 {
        return Err(need_header(4 + key_len + 4, raw.len()));
    }
    let key = &raw[4..4 + key_len];
    let val_off = 4 + key_len + 4;
    let val_len =
        u32::from_be_bytes(raw[4 + key_len..val_off].try_into().unwrap()) as usize;
    if raw.len() < val_off + val_len {
        return Err(need_header(val_off + val_len, raw.len()));
    }
    Ok((key, &raw[val_off..val_off + val_len]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ek(dp: u32, ext: u64, size: u32) -> ExtentKey {
        ExtentKey {
            partition_id: dp,
            extent_id: ext,
            offset: 0,
            size,
            crc: 0,
        }
    }

    #[test]
    fn test_marshal_roundtrip_without_extents() {
        let ino = Inode::new(42, 0o644);
        let back = Inode::unmarshal(&ino.marshal()).unwrap();
        assert_eq!(back, ino);
        assert_eq!(back.extents.extent_count(), 0);
    }

    #[test]
    fn test_marshal_roundtrip_with_extents() {
        let mut ino = Inode::new(42, 0o644);
        ino.append_extent(ek(1, 7, 100));
        ino.append_extent(ek(2, 9, 4096));
        let back = Inode::unmarshal(&ino.marshal()).unwrap();
        assert_eq!(back, ino);
        assert_eq!(back.size, 4196);
    }

    #[test]
    fn test_append_extent_updates_size_and_mtime() {
        let mut ino = Inode::new(1, 0);
        ino.modify_time = 0;
        ino.append_extent(ek(1, 7, 100));
        assert_eq!(ino.size, 100);
        assert!(ino.modify_time > 0);
    }

    #[test]
    fn test_append_extent_monotone_merge() {
        let mut ino = Inode::new(1, 0);
        ino.append_extent(ek(1, 7, 100));
        // Smaller replay: no-op on size.
        ino.append_extent(ek(1, 7, 80));
        assert_eq!(ino.size, 100);
        assert_eq!(ino.extents.extent_count(), 1);
        // Growth applies.
        ino.append_extent(ek(1, 7, 200));
        assert_eq!(ino.size, 200);
        assert_eq!(ino.extents.extent_count(), 1);
    }

    #[test]
    fn test_size_is_sum_of_extents() {
        let mut ino = Inode::new(1, 0);
        ino.append_extent(ek(1, 1, 10));
        ino.append_extent(ek(1, 2, 20));
        ino.append_extent(ek(2, 1, 30));
        let total: u64 = ino.extents.extents.iter().map(|e| e.size as u64).sum();
        assert_eq!(ino.size, total);
    }

    #[test]
    fn test_unmarshal_truncated_value() {
        let ino = Inode::new(42, 0o644);
        let raw = ino.marshal();
        assert!(Inode::unmarshal(&raw[..raw.len() - 1]).is_err());
    }

    #[test]
    fn test_ordering_by_inode_id() {
        let a = Inode::new(1, 0);
        let b = Inode::new(2, 0);
        assert!(a < b);
    }

    proptest! {
        #[test]
        fn prop_marshal_roundtrip(
            inode in any::<u64>(),
            mode in any::<u32>(),
            sizes in proptest::collection::vec(1u32..u32::MAX, 0..8),
        ) {
            let mut ino = Inode::new(inode, mode);
            for (i, s) in sizes.iter().enumerate() {
                ino.append_extent(ek(i as u32, i as u64, *s));
            }
            let back = Inode::unmarshal(&ino.marshal()).unwrap();
            prop_assert_eq!(back, ino);
        }
    }
}
