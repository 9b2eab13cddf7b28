//! A writer pinned to one extent on one data partition.
//!
//! Bytes are packed into block-sized write packets and sent through the
//! first replica host; followers ride in the packet's arg chain. Acks
//! are collected on flush, so at any instant the unacked tail (sent
//! packets plus the partial block) is recoverable into a fresh extent.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use baudfs_proto::packet::READ_BLOCK_SIZE;
use baudfs_proto::{ExtentKey, Packet, ResultCode};

use crate::error::ClientError;
use crate::transport::Connection;
use crate::wrapper::DataPartition;

/// An extent stops accepting data at this size.
pub const EXTENT_FULL_SIZE: u64 = 64 * 1024 * 1024;

/// One unacked block, replayable into another extent.
#[derive(Clone, Debug)]
pub struct RetryBlock {
    pub data: Vec<u8>,
    pub kernel_offset: u64,
}

/// Result of one `write` call: how much was buffered into packets, and
/// the send error if one surfaced. Buffered bytes live in the unacked
/// tail even when an error is reported, so recovery never loses them.
#[derive(Debug)]
pub struct WriteOutcome {
    pub buffered: usize,
    pub error: Option<ClientError>,
}

struct PendingWrite {
    packet: Packet,
    kernel_offset: u64,
}

struct FillingBlock {
    data: Vec<u8>,
    kernel_offset: u64,
    extent_offset: u64,
}

pub struct ExtentWriter {
    inode: u64,
    dp: Arc<DataPartition>,
    extent_id: u64,
    conn: Option<Box<dyn Connection>>,
    follower_addrs: String,
    /// Bytes buffered into the extent so far (acked + unacked).
    extent_size: u64,
    /// Bytes confirmed by the data node.
    acked_size: u64,
    pending: VecDeque<PendingWrite>,
    filling: Option<FillingBlock>,
}

impl ExtentWriter {
    pub fn new(
        inode: u64,
        dp: Arc<DataPartition>,
        extent_id: u64,
        conn: Box<dyn Connection>,
    ) -> Self {
        let follower_addrs = dp.follower_addrs();
        Self {
            inode,
            dp,
            extent_id,
            conn: Some(conn),
            follower_addrs,
            extent_size: 0,
            acked_size: 0,
            pending: VecDeque::new(),
            filling: None,
        }
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn partition_id(&self) -> u32 {
        self.dp.partition_id
    }

    pub fn extent_id(&self) -> u64 {
        self.extent_id
    }

    /// The key describing everything the data node has acked.
    pub fn to_key(&self) -> ExtentKey {
        ExtentKey {
            partition_id: self.dp.partition_id,
            extent_id: self.extent_id,
            offset: 0,
            size: self.acked_size as u32,
            crc: 0,
        }
    }

    /// No more room; the stream rotates to a fresh extent.
    pub fn is_full(&self) -> bool {
        self.extent_size >= EXTENT_FULL_SIZE
    }

    /// Buffers as much of `data` as the extent cap allows and sends
    /// every completed block.
    pub fn write(&mut self, data: &[u8], kernel_offset: u64) -> WriteOutcome {
        let mut buffered = 0usize;
        while buffered < data.len() && self.extent_size < EXTENT_FULL_SIZE {
            let block = self.filling.get_or_insert_with(|| FillingBlock {
                data: Vec::with_capacity(READ_BLOCK_SIZE),
                kernel_offset: kernel_offset + buffered as u64,
                extent_offset: self.extent_size,
            });
            let room = READ_BLOCK_SIZE - block.data.len();
            let cap_room = (EXTENT_FULL_SIZE - self.extent_size) as usize;
            let take = room.min(cap_room).min(data.len() - buffered);
            block.data.extend_from_slice(&data[buffered..buffered + take]);
            buffered += take;
            self.extent_size += take as u64;
            let full_block = block.data.len() >= READ_BLOCK_SIZE;
            if full_block || self.extent_size >= EXTENT_FULL_SIZE {
                if let Err(e) = self.seal_and_send() {
                    return WriteOutcome {
                        buffered,
                        error: Some(e),
                    };
                }
            }
        }
        WriteOutcome {
            buffered,
            error: None,
        }
    }

    fn seal_and_send(&mut self) -> Result<(), ClientError> {
        let Some(block) = self.filling.take() else {
            return Ok(());
        };
        if block.data.is_empty() {
            return Ok(());
        }
        let key = ExtentKey {
            partition_id: self.dp.partition_id,
            extent_id: self.extent_id,
            offset: 0,
            size: 0,
            crc: 0,
        };
        let packet = Packet::new_write(
            &key,
            block.extent_offset,
            block.data,
            &self.follower_addrs,
        );
        let kernel_offset = block.kernel_offset;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "extent writer has no connection",
            )))?;
        let send_result = conn.send(&packet);
        // The packet joins the unacked tail either way; a failed send is
        // replayed by recovery.
        self.pending.push_back(PendingWrite {
            packet,
            kernel_offset,
        });
        send_result
    }

    /// Sends the partial block and collects acks for every in-flight
    /// packet.
    pub fn flush(&mut self) -> Result<(), ClientError> {
        self.seal_and_send()?;
        while let Some(front) = self.pending.front() {
            let conn = self
                .conn
                .as_mut()
                .ok_or_else(|| ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "extent writer has no connection",
                )))?;
            let reply = conn.recv()?;
            if reply.result() != ResultCode::OpOk {
                return Err(ClientError::ResultNotOk {
                    code: reply.result_code,
                    request: front.packet.unique_log_id(),
                });
            }
            if !front.packet.is_matching_reply(&reply) {
                return Err(ClientError::ReplyMismatch {
                    request: front.packet.unique_log_id(),
                    reply: reply.unique_log_id(),
                });
            }
            let acked = self
                .pending
                .pop_front()
                .map(|w| w.packet.size as u64)
                .unwrap_or(0);
            self.acked_size += acked;
        }
        debug!(
            inode = self.inode,
            partition_id = self.dp.partition_id,
            extent_id = self.extent_id,
            acked = self.acked_size,
            "extent flush complete"
        );
        Ok(())
    }

    /// Drains the unacked tail for replay into another extent.
    pub fn take_retry_blocks(&mut self) -> Vec<RetryBlock> {
        let mut blocks: Vec<RetryBlock> = self
            .pending
            .drain(..)
            .map(|w| RetryBlock {
                data: w.packet.data,
                kernel_offset: w.kernel_offset,
            })
            .collect();
        if let Some(block) = self.filling.take() {
            if !block.data.is_empty() {
                blocks.push(RetryBlock {
                    data: block.data,
                    kernel_offset: block.kernel_offset,
                });
            }
        }
        blocks
    }

    /// Surrenders the connection for pooling or closing.
    pub fn take_conn(&mut self) -> Option<Box<dyn Connection>> {
        self.conn.take()
    }
}
