//! An inode's stream of extent keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::extent::{ExtentKey, EXTENT_KEY_LEN};
use crate::packet::ProtoError;

/// The ordered list of extent keys that makes up a file's contents.
///
/// Keys are append-ordered. Re-appending a key for an extent already in
/// the stream only ever grows that key's `size`; shrinking or equal
/// appends are no-ops. Replays therefore converge to the same state in
/// any order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamKey {
    /// Owning inode.
    pub inode: u64,
    /// Append-ordered extent keys.
    pub extents: Vec<ExtentKey>,
}

impl StreamKey {
    /// Creates an empty stream for the given inode.
    pub fn new(inode: u64) -> Self {
        Self {
            inode,
            extents: Vec::new(),
        }
    }

    /// Merges one extent key into the stream.
    ///
    /// The last key is checked first since growth of the current write
    /// extent is the common case; otherwise the whole stream is scanned
    /// for the same `(partition_id, extent_id)` before appending.
    pub fn put(&mut self, k: ExtentKey) {
        if let Some(last) = self.extents.last_mut() {
            if last.same_extent(&k) {
                if k.size > last.size {
                    *last = k;
                }
                return;
            }
        } else {
            self.extents.push(k);
            return;
        }
        for ek in self.extents.iter_mut() {
            if ek.same_extent(&k) {
                if k.size > ek.size {
                    *ek = k;
                }
                return;
            }
        }
        self.extents.push(k);
    }

    /// Total stream size: the sum of all extent sizes.
    pub fn size(&self) -> u64 {
        self.extents.iter().map(|ek| ek.size as u64).sum()
    }

    /// Number of extent keys in the stream.
    pub fn extent_count(&self) -> usize {
        self.extents.len()
    }

    /// Encodes the stream as concatenated extent-key records.
    pub fn marshal_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.extents.len() * EXTENT_KEY_LEN);
        for ek in &self.extents {
            buf.extend_from_slice(&ek.marshal());
        }
        buf
    }

    /// Decodes concatenated extent-key records, appending to the stream.
    pub fn unmarshal_binary(&mut self, mut data: &[u8]) -> Result<(), ProtoError> {
        while !data.is_empty() {
            let ek = ExtentKey::unmarshal(data)?;
            self.extents.push(ek);
            data = &data[EXTENT_KEY_LEN..];
        }
        Ok(())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamKey{{inode[{}] extents[{}]}}", self.inode, self.extents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_put_appends_distinct_extents() {
        let mut sk = StreamKey::new(1);
        sk.put(ek(1, 1, 10));
        sk.put(ek(1, 2, 20));
        sk.put(ek(2, 1, 30));
        assert_eq!(sk.extent_count(), 3);
        assert_eq!(sk.size(), 60);
    }

    #[test]
    fn test_put_grows_last_key() {
        let mut sk = StreamKey::new(1);
        sk.put(ek(1, 7, 100));
        sk.put(ek(1, 7, 200));
        assert_eq!(sk.extent_count(), 1);
        assert_eq!(sk.extents[0].size, 200);
    }

    #[test]
    fn test_put_smaller_is_noop() {
        let mut sk = StreamKey::new(1);
        sk.put(ek(1, 7, 100));
        sk.put(ek(1, 7, 80));
        assert_eq!(sk.extent_count(), 1);
        assert_eq!(sk.extents[0].size, 100);
    }

    #[test]
    fn test_put_equal_is_noop() {
        let mut sk = StreamKey::new(1);
        sk.put(ek(1, 7, 100));
        let before = sk.clone();
        sk.put(ek(1, 7, 100));
        assert_eq!(sk, before);
    }

    #[test]
    fn test_put_updates_interior_key() {
        let mut sk = StreamKey::new(1);
        sk.put(ek(1, 1, 10));
        sk.put(ek(1, 2, 20));
        sk.put(ek(1, 1, 50));
        assert_eq!(sk.extent_count(), 2);
        assert_eq!(sk.extents[0].size, 50);
        assert_eq!(sk.size(), 70);
    }

    #[test]
    fn test_put_is_idempotent() {
        let mut once = StreamKey::new(1);
        once.put(ek(1, 1, 10));
        once.put(ek(1, 2, 20));
        let mut twice = once.clone();
        twice.put(ek(1, 2, 20));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_binary_roundtrip() {
        let mut sk = StreamKey::new(9);
        sk.put(ek(1, 1, 10));
        sk.put(ek(2, 5, 4096));
        let raw = sk.marshal_binary();
        let mut back = StreamKey::new(9);
        back.unmarshal_binary(&raw).unwrap();
        assert_eq!(back, sk);
    }

    #[test]
    fn test_unmarshal_rejects_trailing_garbage() {
        let mut sk = StreamKey::new(1);
        sk.put(ek(1, 1, 10));
        let mut raw = sk.marshal_binary();
        raw.extend_from_slice(&[0u8; 3]);
        let mut back = StreamKey::new(1);
        assert!(back.unmarshal_binary(&raw).is_err());
    }
}
