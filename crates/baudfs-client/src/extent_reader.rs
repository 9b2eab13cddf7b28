//! Random-read path for one extent key.
//!
//! Each reader caches its partition descriptor and replica count,
//! starts on a random replica, and advances to the next replica on any
//! failure. A read is chunked into block-sized stream-read replies;
//! every reply must carry the right identity and a matching CRC.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use tracing::warn;

use baudfs_proto::{ExtentKey, Packet, ResultCode};

use crate::error::ClientError;
use crate::pool::{ConnPool, FORCE_CLOSE_CONNECT, NO_CLOSE_CONNECT};
use crate::wrapper::DataPartition;

/// Attempts before a read surfaces its error.
pub const READ_RETRY_LIMIT: usize = 3;

pub struct ExtentReader {
    inode: u64,
    key: Mutex<ExtentKey>,
    dp: Arc<DataPartition>,
    start_inode_offset: u64,
    end_inode_offset: AtomicU64,
    reader_index: AtomicU32,
    pool: Arc<ConnPool>,
}

impl ExtentReader {
    pub fn new(
        inode: u64,
        in_inode_offset: u64,
        key: ExtentKey,
        dp: Arc<DataPartition>,
        pool: Arc<ConnPool>,
    ) -> Self {
        let replica_num = dp.replica_num.max(1) as u32;
        let reader_index = rand::thread_rng().gen_range(0..replica_num);
        Self {
            inode,
            key: Mutex::new(key),
            dp,
            start_inode_offset: in_inode_offset,
            end_inode_offset: AtomicU64::new(in_inode_offset + key.size as u64),
            reader_index: AtomicU32::new(reader_index),
            pool,
        }
    }

    pub fn key(&self) -> ExtentKey {
        *self.key.lock().unwrap()
    }

    pub fn start_inode_offset(&self) -> u64 {
        self.start_inode_offset
    }

    pub fn end_inode_offset(&self) -> u64 {
        self.end_inode_offset.load(Ordering::Acquire)
    }

    /// Reads `buf.len()` bytes starting at `offset` within the extent,
    /// retrying across replicas.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<(), ClientError> {
        if buf.is_empty() {
            return Ok(());
        }
        let key = self.key();
        let mut attempts = String::new();
        for attempt in 0..READ_RETRY_LIMIT {
            match self.stream_read_from_host(&key, buf, offset) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        inode = self.inode,
                        partition_id = key.partition_id,
                        extent_id = key.extent_id,
                        attempt,
                        error = %e,
                        "extent read attempt failed"
                    );
                    attempts.push_str(&format!(" (attempt[{}] err[{}])", attempt, e));
                }
            }
        }
        Err(ClientError::ReadExhausted(attempts))
    }

    /// One request/reply conversation with the currently selected
    /// replica. Any failure advances the replica index and force-closes
    /// the connection.
    fn stream_read_from_host(
        &self,
        key: &ExtentKey,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(), ClientError> {
        let mut index = self.reader_index.load(Ordering::Acquire);
        if index >= self.dp.hosts.len() as u32 {
            index = 0;
            self.reader_index.store(0, Ordering::Release);
        }
        let host = &self.dp.hosts[index as usize];

        let mut conn = match self.pool.get(host) {
            Ok(c) => c,
            Err(e) => {
                self.reader_index.fetch_add(1, Ordering::AcqRel);
                return Err(e);
            }
        };
        let result = self.stream_read_on_conn(key, conn.as_mut(), buf, offset);
        match &result {
            Ok(()) => self.pool.put(conn, NO_CLOSE_CONNECT),
            Err(_) => {
                self.reader_index.fetch_add(1, Ordering::AcqRel);
                self.pool.put(conn, FORCE_CLOSE_CONNECT);
            }
        }
        result
    }

    fn stream_read_on_conn(
        &self,
        key: &ExtentKey,
        conn: &mut dyn crate::transport::Connection,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(), ClientError> {
        let expect = buf.len();
        let request = Packet::new_stream_read(key, offset, expect as u32);
        conn.send(&request)?;

        let mut got = 0usize;
        while got < expect {
            let reply = conn.recv()?;
            self.check_stream_reply(&request, &reply)?;
            let take = (reply.size as usize).min(expect - got);
            buf[got..got + take].copy_from_slice(&reply.data[..take]);
            got += take;
            if reply.size == 0 {
                break;
            }
        }
        if got < expect {
            return Err(ClientError::ReadExhausted(format!(
                "short read: {} of {}",
                got, expect
            )));
        }
        Ok(())
    }

    fn check_stream_reply(&self, request: &Packet, reply: &Packet) -> Result<(), ClientError> {
        if reply.result() != ResultCode::OpOk {
            return Err(ClientError::ResultNotOk {
                code: reply.result_code,
                request: request.unique_log_id(),
            });
        }
        if request.req_id != reply.req_id
            || request.partition_id != reply.partition_id
            || request.file_id != reply.file_id
        {
            return Err(ClientError::ReplyMismatch {
                request: request.unique_log_id(),
                reply: reply.unique_log_id(),
            });
        }
        let n = (reply.size as usize).min(reply.data.len());
        let crc = crc32fast::hash(&reply.data[..n]);
        if crc != reply.crc {
            return Err(ClientError::CrcMismatch {
                expect: reply.crc,
                got: crc,
                request: request.unique_log_id(),
            });
        }
        Ok(())
    }

    /// Folds in a fresh extent key; only monotone growth of the same
    /// extent takes effect.
    pub fn update_key(&self, key: ExtentKey) -> bool {
        let mut current = self.key.lock().unwrap();
        if !current.same_extent(&key) {
            return false;
        }
        if key.size <= current.size {
            return false;
        }
        *current = key;
        self.end_inode_offset
            .store(self.start_inode_offset + key.size as u64, Ordering::Release);
        true
    }
}
