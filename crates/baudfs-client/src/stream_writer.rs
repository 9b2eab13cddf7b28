//! The per-inode stream writer actor.
//!
//! All mutations for one inode funnel through a single worker thread
//! fed by a request mailbox, which gives the write path its serial
//! ordering without holding locks across network calls. Flush is
//! single-flight via a token, and a 2-second timer flushes once the
//! unflushed byte count passes the threshold.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use baudfs_proto::{ExtentKey, Opcode, Packet, ResultCode};

use crate::error::ClientError;
use crate::extent_writer::{ExtentWriter, RetryBlock};
use crate::pool::{FORCE_CLOSE_CONNECT, NO_CLOSE_CONNECT};
use crate::wrapper::Wrapper;

/// Bound on partition hops while writing, flushing, or recovering.
pub const MAX_SELECT_DATA_PARTITION_FOR_WRITE: usize = 32;

/// Bound on allocate retries when initializing a write.
pub const MAX_STREAM_INIT_RETRY: usize = 3;

/// The timer flush threshold.
pub const AUTO_FLUSH_SIZE: u64 = 3 * 1024 * 1024;

/// Timer period for the background flush.
pub const AUTO_FLUSH_TICK: Duration = Duration::from_secs(2);

/// Pushes one extent key to the inode's meta partition.
pub type AppendExtentKeyFn =
    Box<dyn Fn(u64, ExtentKey) -> Result<(), ClientError> + Send>;

enum Request {
    Write {
        data: Vec<u8>,
        kernel_offset: u64,
        reply: Sender<Result<usize, ClientError>>,
    },
    Flush {
        reply: Sender<Result<(), ClientError>>,
    },
    Close {
        reply: Sender<Result<(), ClientError>>,
    },
}

/// Handle to one inode's writer actor.
pub struct StreamWriter {
    inode: u64,
    tx: Sender<Request>,
    worker: Option<JoinHandle<()>>,
}

impl StreamWriter {
    pub fn new(wrapper: Arc<Wrapper>, inode: u64, append_extent_key: AppendExtentKeyFn) -> Self {
        let (tx, rx) = channel();
        let worker = std::thread::Builder::new()
            .name(format!("stream-writer-{}", inode))
            .spawn(move || {
                let mut w = Worker {
                    wrapper,
                    inode,
                    append_extent_key,
                    current: None,
                    exclude: Vec::new(),
                    has_update_key: HashMap::new(),
                    err_count: 0,
                    has_write_size: 0,
                    is_flushing: false,
                };
                w.serve(rx);
            })
            .expect("spawn stream writer");
        Self {
            inode,
            tx,
            worker: Some(worker),
        }
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// Appends `data` at the file offset `kernel_offset`.
    pub fn write(&self, data: &[u8], kernel_offset: u64) -> Result<usize, ClientError> {
        let (reply, rx) = channel();
        self.tx
            .send(Request::Write {
                data: data.to_vec(),
                kernel_offset,
                reply,
            })
            .map_err(|_| ClientError::StreamClosed)?;
        rx.recv().map_err(|_| ClientError::StreamClosed)?
    }

    /// Flushes buffered data and pushes the extent key to the meta tier.
    pub fn flush(&self) -> Result<(), ClientError> {
        let (reply, rx) = channel();
        self.tx
            .send(Request::Flush { reply })
            .map_err(|_| ClientError::StreamClosed)?;
        rx.recv().map_err(|_| ClientError::StreamClosed)?
    }

    /// Flushes and stops the worker.
    pub fn close(mut self) -> Result<(), ClientError> {
        let result = self.send_close();
        if let Some(join) = self.worker.take() {
            let _ = join.join();
        }
        result
    }

    fn send_close(&self) -> Result<(), ClientError> {
        let (reply, rx) = channel();
        self.tx
            .send(Request::Close { reply })
            .map_err(|_| ClientError::StreamClosed)?;
        rx.recv().map_err(|_| ClientError::StreamClosed)?
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if let Some(join) = self.worker.take() {
            let _ = self.send_close();
            let _ = join.join();
        }
    }
}

struct Worker {
    wrapper: Arc<Wrapper>,
    inode: u64,
    append_extent_key: AppendExtentKeyFn,
    current: Option<ExtentWriter>,
    /// Partitions temporarily off-limits after write failures.
    exclude: Vec<u32>,
    /// extent-key id -> last size pushed to meta, for idempotent updates.
    has_update_key: HashMap<String, u32>,
    err_count: usize,
    has_write_size: u64,
    is_flushing: bool,
}

impl Worker {
    fn serve(&mut self, rx: Receiver<Request>) {
        info!(inode = self.inode, "stream writer started");
        loop {
            match rx.recv_timeout(AUTO_FLUSH_TICK) {
                Ok(Request::Write {
                    data,
                    kernel_offset,
                    reply,
                }) => {
                    let _ = reply.send(self.write(&data, kernel_offset));
                }
                Ok(Request::Flush { reply }) => {
                    let _ = reply.send(self.flush());
                }
                Ok(Request::Close { reply }) => {
                    let result = self.flush();
                    self.release_writer(result.is_err());
                    let _ = reply.send(result);
                    info!(inode = self.inode, "stream writer stopped");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.current.is_some()
                        && !self.is_flushing
                        && self.has_write_size >= AUTO_FLUSH_SIZE
                    {
                        if let Err(e) = self.flush() {
                            warn!(inode = self.inode, error = %e, "background flush failed");
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let _ = self.flush();
                    self.release_writer(false);
                    return;
                }
            }
        }
    }

    fn release_writer(&mut self, broken: bool) {
        if let Some(mut w) = self.current.take() {
            if let Some(conn) = w.take_conn() {
                self.wrapper.put_connect(
                    conn,
                    if broken {
                        FORCE_CLOSE_CONNECT
                    } else {
                        NO_CLOSE_CONNECT
                    },
                );
            }
        }
    }

    /// Ensures a non-full current writer, rotating and allocating as
    /// needed.
    fn init(&mut self) -> Result<(), ClientError> {
        if self.current.as_ref().map(|w| w.is_full()).unwrap_or(false) {
            self.flush()?;
        }
        if self.current.is_some() {
            return Ok(());
        }
        let writer = self.allocate_new_extent_writer()?;
        self.current = Some(writer);
        Ok(())
    }

    fn write(&mut self, data: &[u8], kernel_offset: u64) -> Result<usize, ClientError> {
        let size = data.len();
        let mut total = 0usize;
        let mut init_retry = 0usize;
        while total < size {
            if let Err(e) = self.init() {
                init_retry += 1;
                if init_retry > MAX_STREAM_INIT_RETRY {
                    return Err(e);
                }
                continue;
            }
            let Some(writer) = self.current.as_mut() else {
                continue;
            };
            let outcome = writer.write(&data[total..], kernel_offset + total as u64);
            total += outcome.buffered;
            self.has_write_size += outcome.buffered as u64;
            if let Some(e) = outcome.error {
                warn!(
                    inode = self.inode,
                    error = %e,
                    "extent write failed, recovering"
                );
                self.recover_extent()?;
            }
            // buffered == 0 with no error means the extent filled up;
            // the next init() rotates it.
        }
        Ok(total)
    }

    /// Single-flight flush with bounded recovery.
    fn flush(&mut self) -> Result<(), ClientError> {
        if self.is_flushing {
            return Ok(());
        }
        self.is_flushing = true;
        let result = self.flush_with_recovery();
        self.is_flushing = false;
        result
    }

    fn flush_with_recovery(&mut self) -> Result<(), ClientError> {
        loop {
            match self.flush_once() {
                Ok(()) => {
                    self.err_count = 0;
                    self.has_write_size = 0;
                    return Ok(());
                }
                Err(e @ ClientError::InodeNotExist(_)) => {
                    // The file is gone; nothing left to persist.
                    warn!(inode = self.inode, error = %e, "flush target vanished");
                    self.err_count = 0;
                    self.has_write_size = 0;
                    return Ok(());
                }
                Err(e) => {
                    self.err_count += 1;
                    if self.err_count >= MAX_SELECT_DATA_PARTITION_FOR_WRITE {
                        return Err(e);
                    }
                    self.recover_extent()?;
                }
            }
        }
    }

    fn flush_once(&mut self) -> Result<(), ClientError> {
        let Some(writer) = self.current.as_mut() else {
            return Ok(());
        };
        writer.flush()?;
        self.update_to_meta_node()?;
        let full = self
            .current
            .as_ref()
            .map(|w| w.is_full())
            .unwrap_or(false);
        if full {
            let mut w = match self.current.take() {
                Some(w) => w,
                None => return Ok(()),
            };
            if let Some(conn) = w.take_conn() {
                self.wrapper.put_connect(conn, NO_CLOSE_CONNECT);
            }
            // Emit the closed extent's key once more, bracket-safe.
            self.push_key_to_meta(w.to_key())?;
        }
        Ok(())
    }

    fn update_to_meta_node(&mut self) -> Result<(), ClientError> {
        let Some(key) = self.current.as_ref().map(|w| w.to_key()) else {
            return Ok(());
        };
        self.push_key_to_meta(key)
    }

    fn push_key_to_meta(&mut self, key: ExtentKey) -> Result<(), ClientError> {
        if key.size == 0 {
            return Ok(());
        }
        let id = key.extent_key_id();
        if self.has_update_key.get(&id) == Some(&key.size) {
            return Ok(());
        }
        let mut last_err = None;
        for _ in 0..MAX_SELECT_DATA_PARTITION_FOR_WRITE {
            match (self.append_extent_key)(self.inode, key) {
                Ok(()) => {
                    self.has_update_key.insert(id, key.size);
                    return Ok(());
                }
                Err(e @ ClientError::InodeNotExist(_)) => return Err(e),
                Err(e) => {
                    warn!(inode = self.inode, error = %e, "extent key update failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(ClientError::StreamClosed))
    }

    /// Abandons the current extent: excludes its partition, replays the
    /// unacked tail into a fresh extent on another partition.
    fn recover_extent(&mut self) -> Result<(), ClientError> {
        let Some(mut old) = self.current.take() else {
            return Ok(());
        };
        self.exclude.push(old.partition_id());
        let retry_blocks = old.take_retry_blocks();
        let old_key = old.to_key();
        if let Some(conn) = old.take_conn() {
            self.wrapper.put_connect(conn, FORCE_CLOSE_CONNECT);
        }
        // Record whatever the old extent acked before it failed.
        for _ in 0..MAX_SELECT_DATA_PARTITION_FOR_WRITE {
            if self.push_key_to_meta(old_key).is_ok() {
                break;
            }
        }

        let mut last_err = ClientError::ExtentAllocFailed;
        for _ in 0..MAX_SELECT_DATA_PARTITION_FOR_WRITE {
            let mut writer = match self.allocate_new_extent_writer() {
                Ok(w) => w,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };
            match Self::replay_blocks(&mut writer, &retry_blocks) {
                Ok(()) => {
                    self.exclude.clear();
                    self.current = Some(writer);
                    let _ = self.update_to_meta_node();
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        inode = self.inode,
                        partition_id = writer.partition_id(),
                        error = %e,
                        "recover replay failed, excluding partition"
                    );
                    self.exclude.push(writer.partition_id());
                    if let Some(conn) = writer.take_conn() {
                        self.wrapper.put_connect(conn, FORCE_CLOSE_CONNECT);
                    }
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn replay_blocks(
        writer: &mut ExtentWriter,
        blocks: &[RetryBlock],
    ) -> Result<(), ClientError> {
        for block in blocks {
            let outcome = writer.write(&block.data, block.kernel_offset);
            if let Some(e) = outcome.error {
                return Err(e);
            }
            if outcome.buffered < block.data.len() {
                return Err(ClientError::ExtentAllocFailed);
            }
        }
        writer.flush()
    }

    fn allocate_new_extent_writer(&mut self) -> Result<ExtentWriter, ClientError> {
        let mut last_err = ClientError::NoWritableDataPartition;
        for _ in 0..MAX_SELECT_DATA_PARTITION_FOR_WRITE {
            let dp = match self.wrapper.get_write_data_partition(&self.exclude) {
                Ok(dp) => dp,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };
            let extent_id = match self.create_extent(&dp) {
                Ok(id) => id,
                Err(e) => {
                    warn!(
                        inode = self.inode,
                        partition_id = dp.partition_id,
                        error = %e,
                        "create extent failed, excluding partition"
                    );
                    self.exclude.push(dp.partition_id);
                    last_err = e;
                    continue;
                }
            };
            let conn = match self.wrapper.get_connect(&dp.hosts[0]) {
                Ok(c) => c,
                Err(e) => {
                    self.exclude.push(dp.partition_id);
                    last_err = e;
                    continue;
                }
            };
            return Ok(ExtentWriter::new(self.inode, dp, extent_id, conn));
        }
        Err(last_err)
    }

    /// Creates a fresh extent on the partition's first replica; the
    /// data node fans the create out to the followers.
    fn create_extent(&self, dp: &crate::wrapper::DataPartition) -> Result<u64, ClientError> {
        let mut conn = self.wrapper.get_connect(&dp.hosts[0])?;
        let request =
            Packet::new_create_extent(dp.partition_id, self.inode, &dp.follower_addrs());
        let result = (|| {
            conn.send(&request)?;
            let reply = conn.recv()?;
            if reply.result() != ResultCode::OpOk {
                return Err(ClientError::ResultNotOk {
                    code: reply.result_code,
                    request: request.unique_log_id(),
                });
            }
            if reply.op() != Some(Opcode::CreateExtent) || reply.req_id != request.req_id {
                return Err(ClientError::ReplyMismatch {
                    request: request.unique_log_id(),
                    reply: reply.unique_log_id(),
                });
            }
            if reply.file_id == 0 {
                return Err(ClientError::ExtentAllocFailed);
            }
            Ok(reply.file_id)
        })();
        self.wrapper.put_connect(conn, result.is_err());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Connection, Transport};
    use baudfs_proto::message::{DataPartitionInfo, DataPartitionView};
    use baudfs_proto::PartitionStatus;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A scripted data-node fleet: allocates extent ids and acks writes,
    /// except on hosts marked broken.
    struct FakeCluster {
        next_extent: AtomicU64,
        broken_hosts: Mutex<HashSet<String>>,
    }

    impl FakeCluster {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next_extent: AtomicU64::new(1),
                broken_hosts: Mutex::new(HashSet::new()),
            })
        }

        fn break_host(&self, addr: &str) {
            self.broken_hosts.lock().unwrap().insert(addr.to_string());
        }

        fn is_broken(&self, addr: &str) -> bool {
            self.broken_hosts.lock().unwrap().contains(addr)
        }
    }

    struct FakeConn {
        cluster: Arc<FakeCluster>,
        addr: String,
        replies: VecDeque<Packet>,
    }

    impl Connection for FakeConn {
        fn send(&mut self, p: &Packet) -> Result<(), ClientError> {
            if self.cluster.is_broken(&self.addr) {
                return Err(ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "host down",
                )));
            }
            let mut reply = Packet::new_reply(p.req_id, p.partition_id, p.file_id);
            reply.opcode = p.opcode;
            reply.offset = p.offset;
            reply.result_code = ResultCode::OpOk.as_u8();
            match p.op() {
                Some(Opcode::CreateExtent) => {
                    reply.file_id = self.cluster.next_extent.fetch_add(1, Ordering::Relaxed);
                }
                Some(Opcode::Write) => {
                    reply.size = p.size;
                }
                _ => {}
            }
            self.replies.push_back(reply);
            Ok(())
        }

        fn recv(&mut self) -> Result<Packet, ClientError> {
            self.replies.pop_front().ok_or_else(|| {
                ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "nothing queued",
                ))
            })
        }

        fn addr(&self) -> &str {
            &self.addr
        }
    }

    struct FakeTransport {
        cluster: Arc<FakeCluster>,
    }

    impl Transport for FakeTransport {
        fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, ClientError> {
            Ok(Box::new(FakeConn {
                cluster: self.cluster.clone(),
                addr: addr.to_string(),
                replies: VecDeque::new(),
            }))
        }
    }

    fn view(n: u32) -> DataPartitionView {
        DataPartitionView {
            data_partitions: (0..n)
                .map(|i| DataPartitionInfo {
                    partition_id: i,
                    status: PartitionStatus::ReadWrite.as_u8(),
                    replica_num: 1,
                    partition_type: "extent".to_string(),
                    hosts: vec![format!("h{}:9030", i)],
                })
                .collect(),
        }
    }

    fn harness() -> (Arc<FakeCluster>, Arc<Wrapper>) {
        let cluster = FakeCluster::new();
        let wrapper = Wrapper::with_view(
            "vol",
            &view(12),
            Arc::new(FakeTransport {
                cluster: cluster.clone(),
            }),
        );
        (cluster, wrapper)
    }

    type KeyLog = Arc<Mutex<Vec<(u64, ExtentKey)>>>;

    fn recording_append() -> (KeyLog, AppendExtentKeyFn) {
        let log: KeyLog = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let f: AppendExtentKeyFn = Box::new(move |inode, key| {
            log2.lock().unwrap().push((inode, key));
            Ok(())
        });
        (log, f)
    }

    #[test]
    fn test_write_then_flush_pushes_key() {
        let (_cluster, wrapper) = harness();
        let (log, append) = recording_append();
        let sw = StreamWriter::new(wrapper, 42, append);

        let n = sw.write(b"hello stream", 0).unwrap();
        assert_eq!(n, 12);
        sw.flush().unwrap();

        let keys = log.lock().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, 42);
        assert_eq!(keys[0].1.size, 12);
        drop(keys);
        sw.close().unwrap();
    }

    #[test]
    fn test_repeated_flush_is_idempotent_on_meta() {
        let (_cluster, wrapper) = harness();
        let (log, append) = recording_append();
        let sw = StreamWriter::new(wrapper, 42, append);

        sw.write(b"abc", 0).unwrap();
        sw.flush().unwrap();
        sw.flush().unwrap();
        sw.flush().unwrap();
        // Same size, same key: only one meta update.
        assert_eq!(log.lock().unwrap().len(), 1);
        sw.close().unwrap();
    }

    #[test]
    fn test_growing_writes_update_meta_monotonically() {
        let (_cluster, wrapper) = harness();
        let (log, append) = recording_append();
        let sw = StreamWriter::new(wrapper, 42, append);

        sw.write(b"aaaa", 0).unwrap();
        sw.flush().unwrap();
        sw.write(b"bbbb", 4).unwrap();
        sw.flush().unwrap();

        let keys = log.lock().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].1.size, 4);
        assert_eq!(keys[1].1.size, 8);
        assert!(keys[0].1.same_extent(&keys[1].1));
        drop(keys);
        sw.close().unwrap();
    }

    #[test]
    fn test_write_failure_recovers_to_another_partition() {
        let (cluster, wrapper) = harness();
        let (log, append) = recording_append();
        let sw = StreamWriter::new(wrapper, 42, append);

        sw.write(b"pre!", 0).unwrap();
        sw.flush().unwrap();
        let first_key = log.lock().unwrap()[0].1;

        // Kill the host serving the current extent; the next write's
        // send fails and recovery moves to another partition.
        cluster.break_host(&format!("h{}:9030", first_key.partition_id));
        let data = vec![7u8; READ_BLOCK_SIZE_FOR_TEST];
        let n = sw.write(&data, 4).unwrap();
        assert_eq!(n, READ_BLOCK_SIZE_FOR_TEST);
        sw.flush().unwrap();

        let keys = log.lock().unwrap();
        let last = keys.last().unwrap().1;
        assert_ne!(last.partition_id, first_key.partition_id);
        assert_eq!(last.size, READ_BLOCK_SIZE_FOR_TEST as u32);
        drop(keys);
        sw.close().unwrap();
    }

    const READ_BLOCK_SIZE_FOR_TEST: usize = baudfs_proto::packet::READ_BLOCK_SIZE;

    #[test]
    fn test_close_flushes_pending_data() {
        let (_cluster, wrapper) = harness();
        let (log, append) = recording_append();
        let sw = StreamWriter::new(wrapper, 42, append);
        sw.write(b"tail data", 0).unwrap();
        sw.close().unwrap();
        let keys = log.lock().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].1.size, 9);
    }

    #[test]
    fn test_concurrent_callers_serialize_through_mailbox() {
        let (_cluster, wrapper) = harness();
        let (log, append) = recording_append();
        let sw = Arc::new(StreamWriter::new(wrapper, 42, append));

        let mut handles = Vec::new();
        for t in 0..4u64 {
            let sw = sw.clone();
            handles.push(std::thread::spawn(move || {
                sw.write(&vec![t as u8; 1000], t * 1000).unwrap()
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 4000);
        sw.flush().unwrap();
        assert_eq!(log.lock().unwrap().last().unwrap().1.size, 4000);
    }
}
