//! Extent keys: the address of one contiguous byte region on a data
//! partition.
//!
//! Binary layout (big-endian, 28 bytes):
//!  +-------+-------------+----------+--------+------+-----+
//!  | item  | PartitionId | ExtentId | Offset | Size | Crc |
//!  +-------+-------------+----------+--------+------+-----+
//!  | bytes |      4      |    8     |   8    |  4   |  4  |
//!  +-------+-------------+----------+--------+------+-----+

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::packet::ProtoError;

/// Serialized size of one extent key record.
pub const EXTENT_KEY_LEN: usize = 28;

/// Addresses a byte region `[offset, offset + size)` within an extent on
/// a data partition.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentKey {
    /// Owning data partition.
    pub partition_id: u32,
    /// Extent within the partition.
    pub extent_id: u64,
    /// Byte offset of the region within the extent.
    pub offset: u64,
    /// Region length in bytes.
    pub size: u32,
    /// CRC32-IEEE of the region's data.
    pub crc: u32,
}

impl ExtentKey {
    /// Creates a key for a fresh extent with no data yet.
    pub fn new(partition_id: u32, extent_id: u64) -> Self {
        Self {
            partition_id,
            extent_id,
            offset: 0,
            size: 0,
            crc: 0,
        }
    }

    /// True when both keys address the same extent, regardless of size.
    pub fn same_extent(&self, other: &ExtentKey) -> bool {
        self.partition_id == other.partition_id && self.extent_id == other.extent_id
    }

    /// Stable identity string, used for the client's known-updated map.
    pub fn extent_key_id(&self) -> String {
        format!("{}_{}", self.partition_id, self.extent_id)
    }

    /// Encodes this key into its fixed binary record.
    pub fn marshal(&self) -> [u8; EXTENT_KEY_LEN] {
        let mut buf = [0u8; EXTENT_KEY_LEN];
        buf[0..4].copy_from_slice(&self.partition_id.to_be_bytes());
        buf[4..12].copy_from_slice(&self.extent_id.to_be_bytes());
        buf[12..20].copy_from_slice(&self.offset.to_be_bytes());
        buf[20..24].copy_from_slice(&self.size.to_be_bytes());
        buf[24..28].copy_from_slice(&self.crc.to_be_bytes());
        buf
    }

    /// Decodes one fixed binary record.
    pub fn unmarshal(raw: &[u8]) -> Result<Self, ProtoError> {
        if raw.len() < EXTENT_KEY_LEN {
            return Err(ProtoError::Truncated {
                what: "extent key",
                need: EXTENT_KEY_LEN,
                got: raw.len(),
            });
        }
        Ok(Self {
            partition_id: u32::from_be_bytes(raw[0..4].try_into().unwrap()),
            extent_id: u64::from_be_bytes(raw[4..12].try_into().unwrap()),
            offset: u64::from_be_bytes(raw[12..20].try_into().unwrap()),
            size: u32::from_be_bytes(raw[20..24].try_into().unwrap()),
            crc: u32::from_be_bytes(raw[24..28].try_into().unwrap()),
        })
    }
}

impl fmt::Display for ExtentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExtentKey{{dp[{}] extent[{}] offset[{}] size[{}] crc[{}]}}",
            self.partition_id, self.extent_id, self.offset, self.size, self.crc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_marshal_roundtrip() {
        let k = ExtentKey {
            partition_id: 7,
            extent_id: 42,
            offset: 1 << 20,
            size: 4096,
            crc: 0xDEADBEEF,
        };
        let raw = k.marshal();
        assert_eq!(raw.len(), EXTENT_KEY_LEN);
        let back = ExtentKey::unmarshal(&raw).unwrap();
        assert_eq!(back, k);
    }

    #[test]
    fn test_unmarshal_truncated() {
        let k = ExtentKey::new(1, 2);
        let raw = k.marshal();
        assert!(ExtentKey::unmarshal(&raw[..EXTENT_KEY_LEN - 1]).is_err());
    }

    #[test]
    fn test_same_extent_ignores_size() {
        let a = ExtentKey {
            partition_id: 1,
            extent_id: 7,
            offset: 0,
            size: 100,
            crc: 0,
        };
        let mut b = a;
        b.size = 200;
        assert!(a.same_extent(&b));
        b.extent_id = 8;
        assert!(!a.same_extent(&b));
    }

    #[test]
    fn test_extent_key_id() {
        assert_eq!(ExtentKey::new(3, 9).extent_key_id(), "3_9");
    }

    proptest! {
        #[test]
        fn prop_marshal_roundtrip(
            partition_id in any::<u32>(),
            extent_id in any::<u64>(),
            offset in any::<u64>(),
            size in any::<u32>(),
            crc in any::<u32>(),
        ) {
            let k = ExtentKey { partition_id, extent_id, offset, size, crc };
            let back = ExtentKey::unmarshal(&k.marshal()).unwrap();
            prop_assert_eq!(back, k);
        }
    }
}
