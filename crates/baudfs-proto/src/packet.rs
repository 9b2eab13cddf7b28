//! Request/reply packet framing.
//!
//! The header is fixed-size big-endian; `arg` carries the follower
//! address chain for replicated writes and `data` carries the payload.
//! Every reply echoes the request ID, partition, file, and offset of the
//! request it answers, which is what `is_matching_reply` verifies.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::extent::ExtentKey;
use crate::opcode::Opcode;
use crate::status::ResultCode;

/// First byte of every packet.
pub const PACKET_MAGIC: u8 = 0xBD;

/// Fixed header size in bytes.
pub const PACKET_HEADER_LEN: usize = 44;

/// Maximum size of one read/write block, and of one stream-read reply.
pub const READ_BLOCK_SIZE: usize = 64 * 1024;

/// Upper bound on a single packet's data section.
pub const MAX_PACKET_DATA: usize = 1 << 24;

/// Errors produced while encoding or decoding protocol structures.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// Input ended before a complete record was read.
    #[error("truncated {what}: need {need} bytes, got {got}")]
    Truncated {
        /// Record being decoded.
        what: &'static str,
        /// Bytes required.
        need: usize,
        /// Bytes available.
        got: usize,
    },

    /// First byte was not [`PACKET_MAGIC`].
    #[error("bad packet magic: 0x{0:02X}")]
    BadMagic(u8),

    /// Header carried an opcode this build does not know.
    #[error("unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    /// Declared payload exceeds [`MAX_PACKET_DATA`].
    #[error("packet data too large: {0} bytes")]
    DataTooLarge(u32),

    /// Underlying transport failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

fn next_req_id() -> u64 {
    NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed)
}

/// One framed request or reply.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    /// Operation code.
    pub opcode: u8,
    /// Result code; meaningful on replies only.
    pub result_code: u8,
    /// Replicas left to forward to; decremented by each data node.
    pub remaining_followers: u8,
    /// CRC32-IEEE of `data`.
    pub crc: u32,
    /// Target partition.
    pub partition_id: u32,
    /// Target extent (or newly allocated extent on replies).
    pub file_id: u64,
    /// Byte offset within the extent.
    pub offset: u64,
    /// Request ID; echoed by replies.
    pub req_id: u64,
    /// Follower address chain for replicated writes.
    pub arg: Vec<u8>,
    /// Payload.
    pub data: Vec<u8>,
    /// Declared payload size. Equals `data.len()` on requests; on
    /// stream-read replies it is the size of this block.
    pub size: u32,
}

impl Packet {
    /// Creates an empty request with a fresh request ID.
    pub fn new_request(op: Opcode) -> Self {
        Self {
            opcode: op.as_u8(),
            req_id: next_req_id(),
            ..Default::default()
        }
    }

    /// Creates a `CreateExtent` request addressed to a partition. The
    /// inode travels in `file_id` so the data node can tag the extent.
    pub fn new_create_extent(partition_id: u32, inode: u64, followers: &str) -> Self {
        let mut p = Self::new_request(Opcode::CreateExtent);
        p.partition_id = partition_id;
        p.file_id = inode;
        p.arg = followers.as_bytes().to_vec();
        p.remaining_followers = followers.split_terminator('/').count() as u8;
        p
    }

    /// Creates a `Write` request carrying one block.
    pub fn new_write(key: &ExtentKey, offset: u64, data: Vec<u8>, followers: &str) -> Self {
        let mut p = Self::new_request(Opcode::Write);
        p.partition_id = key.partition_id;
        p.file_id = key.extent_id;
        p.offset = offset;
        p.remaining_followers = followers.split_terminator('/').count() as u8;
        p.arg = followers.as_bytes().to_vec();
        p.fill_data(data);
        p
    }

    /// Creates a `StreamRead` request for `[offset, offset + size)`.
    pub fn new_stream_read(key: &ExtentKey, offset: u64, size: u32) -> Self {
        let mut p = Self::new_request(Opcode::StreamRead);
        p.partition_id = key.partition_id;
        p.file_id = key.extent_id;
        p.offset = offset;
        p.size = size;
        p
    }

    /// Creates an empty reply shell that expects to match `req_id` on
    /// the given partition and file.
    pub fn new_reply(req_id: u64, partition_id: u32, file_id: u64) -> Self {
        Self {
            req_id,
            partition_id,
            file_id,
            ..Default::default()
        }
    }

    /// Sets the payload and recomputes size and CRC.
    pub fn fill_data(&mut self, data: Vec<u8>) {
        self.crc = crc32fast::hash(&data);
        self.size = data.len() as u32;
        self.data = data;
    }

    /// Decoded opcode, if known.
    pub fn op(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// Decoded result code.
    pub fn result(&self) -> ResultCode {
        ResultCode::from_u8(self.result_code)
    }

    /// True when this reply's CRC matches its data.
    pub fn verify_crc(&self) -> bool {
        let n = (self.size as usize).min(self.data.len());
        crc32fast::hash(&self.data[..n]) == self.crc
    }

    /// Marks this packet as a reply with the given code and body.
    pub fn pack_error_with_body(&mut self, code: ResultCode, body: Vec<u8>) {
        self.result_code = code.as_u8();
        self.fill_data(body);
    }

    /// Marks this packet as a successful reply with the given body.
    pub fn pack_ok_with_body(&mut self, body: Vec<u8>) {
        self.pack_error_with_body(ResultCode::OpOk, body);
    }

    /// True when `reply` answers `self`: same request ID, partition,
    /// file, and offset.
    pub fn is_matching_reply(&self, reply: &Packet) -> bool {
        self.req_id == reply.req_id
            && self.partition_id == reply.partition_id
            && self.file_id == reply.file_id
            && self.offset == reply.offset
    }

    /// Stable identifier for log correlation.
    pub fn unique_log_id(&self) -> String {
        let op = self
            .op()
            .map(|o| o.name().to_string())
            .unwrap_or_else(|| format!("0x{:02X}", self.opcode));
        format!(
            "{}_req[{}]_dp[{}]_file[{}]_offset[{}]_size[{}]",
            op, self.req_id, self.partition_id, self.file_id, self.offset, self.size
        )
    }

    /// Writes the full packet to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        let mut header = [0u8; PACKET_HEADER_LEN];
        header[0] = PACKET_MAGIC;
        header[1] = self.opcode;
        header[2] = self.result_code;
        header[3] = self.remaining_followers;
        header[4..8].copy_from_slice(&self.crc.to_be_bytes());
        header[8..12].copy_from_slice(&self.size.to_be_bytes());
        header[12..16].copy_from_slice(&(self.arg.len() as u32).to_be_bytes());
        header[16..20].copy_from_slice(&self.partition_id.to_be_bytes());
        header[20..28].copy_from_slice(&self.file_id.to_be_bytes());
        header[28..36].copy_from_slice(&self.offset.to_be_bytes());
        header[36..44].copy_from_slice(&self.req_id.to_be_bytes());
        w.write_all(&header)?;
        w.write_all(&self.arg)?;
        w.write_all(&self.data)?;
        w.flush()?;
        Ok(())
    }

    /// Reads one full packet from `r`, replacing `self`.
    pub fn read_from<R: Read>(&mut self, r: &mut R) -> Result<(), ProtoError> {
        let mut header = [0u8; PACKET_HEADER_LEN];
        r.read_exact(&mut header)?;
        if header[0] != PACKET_MAGIC {
            return Err(ProtoError::BadMagic(header[0]));
        }
        self.opcode = header[1];
        self.result_code = header[2];
        self.remaining_followers = header[3];
        self.crc = u32::from_be_bytes(header[4..8].try_into().unwrap());
        self.size = u32::from_be_bytes(header[8..12].try_into().unwrap());
        let arg_len = u32::from_be_bytes(header[12..16].try_into().unwrap());
        self.partition_id = u32::from_be_bytes(header[16..20].try_into().unwrap());
        self.file_id = u64::from_be_bytes(header[20..28].try_into().unwrap());
        self.offset = u64::from_be_bytes(header[28..36].try_into().unwrap());
        self.req_id = u64::from_be_bytes(header[36..44].try_into().unwrap());
        if self.size as usize > MAX_PACKET_DATA {
            return Err(ProtoError::DataTooLarge(self.size));
        }
        let mut arg = vec![0u8; arg_len as usize];
        r.read_exact(&mut arg)?;
        self.arg = arg;
        let mut data = vec![0u8; self.size as usize];
        r.read_exact(&mut data)?;
        self.data = data;
        Ok(())
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unique_log_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let key = ExtentKey {
            partition_id: 3,
            extent_id: 11,
            offset: 0,
            size: 0,
            crc: 0,
        };
        let p = Packet::new_write(&key, 512, b"hello world".to_vec(), "10.0.0.2:9030/10.0.0.3:9030/");
        let mut buf = Vec::new();
        p.write_to(&mut buf).unwrap();

        let mut back = Packet::default();
        back.read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(back.op(), Some(Opcode::Write));
        assert_eq!(back.partition_id, 3);
        assert_eq!(back.file_id, 11);
        assert_eq!(back.offset, 512);
        assert_eq!(back.req_id, p.req_id);
        assert_eq!(back.remaining_followers, 2);
        assert_eq!(back.data, b"hello world");
        assert!(back.verify_crc());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let p = Packet::new_request(Opcode::Ping);
        let mut buf = Vec::new();
        p.write_to(&mut buf).unwrap();
        buf[0] = 0x00;
        let mut back = Packet::default();
        assert!(matches!(
            back.read_from(&mut buf.as_slice()),
            Err(ProtoError::BadMagic(0))
        ));
    }

    #[test]
    fn test_matching_reply() {
        let key = ExtentKey::new(1, 2);
        let req = Packet::new_stream_read(&key, 100, 4096);
        let mut reply = Packet::new_reply(req.req_id, 1, 2);
        reply.offset = 100;
        assert!(req.is_matching_reply(&reply));
        reply.req_id += 1;
        assert!(!req.is_matching_reply(&reply));
    }

    #[test]
    fn test_crc_detects_corruption() {
        let mut p = Packet::new_request(Opcode::Write);
        p.fill_data(b"abcdef".to_vec());
        assert!(p.verify_crc());
        p.data[0] ^= 0xFF;
        assert!(!p.verify_crc());
    }

    #[test]
    fn test_req_ids_unique() {
        let a = Packet::new_request(Opcode::Ping);
        let b = Packet::new_request(Opcode::Ping);
        assert_ne!(a.req_id, b.req_id);
    }

    #[test]
    fn test_pack_error_with_body() {
        let mut p = Packet::new_request(Opcode::MetaCreateInode);
        p.pack_error_with_body(ResultCode::OpInodeFull, b"range exhausted".to_vec());
        assert_eq!(p.result(), ResultCode::OpInodeFull);
        assert_eq!(p.data, b"range exhausted");
        assert!(p.verify_crc());
    }
}
