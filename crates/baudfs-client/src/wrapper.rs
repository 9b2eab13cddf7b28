//! The client's view of the cluster's data partitions.
//!
//! A `Wrapper` maps partition IDs to descriptors and keeps the pool of
//! currently writable partitions, refreshed from the master once a
//! minute. Refresh never shrinks the writable pool below
//! [`MIN_WRITABLE_DATA_PARTITION_NUM`]: on a short view the old pool is
//! kept, while the lookup map is still updated so readers keep seeing
//! fresh host lists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info};

use baudfs_proto::message::{DataPartitionInfo, DataPartitionView};
use baudfs_proto::PartitionStatus;

use crate::error::ClientError;
use crate::master::{MasterHelper, DATA_PARTITION_VIEW_URL};
use crate::pool::ConnPool;
use crate::transport::{Connection, Transport};

/// Refresh aborts the writable-pool swap below this count.
pub const MIN_WRITABLE_DATA_PARTITION_NUM: usize = 10;

/// Interval between view refreshes.
pub const VIEW_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// One data partition as the client sees it.
#[derive(Clone, Debug)]
pub struct DataPartition {
    pub partition_id: u32,
    pub status: PartitionStatus,
    pub replica_num: u8,
    pub partition_type: String,
    /// Replica hosts; index 0 is the write entry point.
    pub hosts: Vec<String>,
}

impl DataPartition {
    fn from_info(info: &DataPartitionInfo) -> Self {
        Self {
            partition_id: info.partition_id,
            status: PartitionStatus::from_u8(info.status),
            replica_num: info.replica_num,
            partition_type: info.partition_type.clone(),
            hosts: info.hosts.clone(),
        }
    }

    /// The follower chain a write packet carries: every host after the
    /// first, slash-terminated.
    pub fn follower_addrs(&self) -> String {
        let mut out = String::new();
        for h in self.hosts.iter().skip(1) {
            out.push_str(h);
            out.push('/');
        }
        out
    }
}

/// Partition lookup cache + writable pool + shared connection pool.
pub struct Wrapper {
    vol_name: String,
    master: MasterHelper,
    partitions: RwLock<HashMap<u32, Arc<DataPartition>>>,
    rw_partitions: RwLock<Vec<Arc<DataPartition>>>,
    conns: ConnPool,
}

impl Wrapper {
    /// Builds the wrapper and performs the initial refresh.
    pub fn new(
        vol_name: &str,
        master_hosts: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, ClientError> {
        let w = Arc::new(Self {
            vol_name: vol_name.to_string(),
            master: MasterHelper::from_hosts(master_hosts),
            partitions: RwLock::new(HashMap::new()),
            rw_partitions: RwLock::new(Vec::new()),
            conns: ConnPool::new(transport),
        });
        w.update_data_partitions()?;
        Ok(w)
    }

    /// Test/embedding constructor: no master, view folded in directly.
    pub fn with_view(
        vol_name: &str,
        view: &DataPartitionView,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let w = Arc::new(Self {
            vol_name: vol_name.to_string(),
            master: MasterHelper::new(Vec::new()),
            partitions: RwLock::new(HashMap::new()),
            rw_partitions: RwLock::new(Vec::new()),
            conns: ConnPool::new(transport),
        });
        let _ = w.fold_view(view);
        w
    }

    pub fn vol_name(&self) -> &str {
        &self.vol_name
    }

    /// Fetches the view from the master and folds it in.
    pub fn update_data_partitions(&self) -> Result<(), ClientError> {
        let mut params = HashMap::new();
        params.insert("name".to_string(), self.vol_name.clone());
        let body = self.master.request(DATA_PARTITION_VIEW_URL, &params)?;
        let view: DataPartitionView = serde_json::from_slice(&body)
            .map_err(|e| ClientError::MasterRequest(e.to_string()))?;
        self.fold_view(&view)
    }

    /// Applies one fetched view. The lookup map is replaced
    /// unconditionally; the writable pool only when the view carries
    /// enough ReadWrite partitions.
    fn fold_view(&self, view: &DataPartitionView) -> Result<(), ClientError> {
        let fresh: Vec<Arc<DataPartition>> = view
            .data_partitions
            .iter()
            .map(|info| Arc::new(DataPartition::from_info(info)))
            .collect();

        for dp in &fresh {
            self.replace_or_insert_partition(dp.clone());
        }

        let rw: Vec<Arc<DataPartition>> = fresh
            .iter()
            .filter(|dp| dp.status == PartitionStatus::ReadWrite)
            .cloned()
            .collect();
        if rw.len() < MIN_WRITABLE_DATA_PARTITION_NUM {
            let err = ClientError::NotEnoughWritablePartitions {
                have: rw.len(),
                need: MIN_WRITABLE_DATA_PARTITION_NUM,
            };
            error!(vol = %self.vol_name, error = %err, "keep previous writable pool");
            return Err(err);
        }
        *self.rw_partitions.write().unwrap() = rw;
        Ok(())
    }

    fn replace_or_insert_partition(&self, dp: Arc<DataPartition>) {
        let old = self
            .partitions
            .write()
            .unwrap()
            .insert(dp.partition_id, dp.clone());
        if let Some(old) = old {
            if old.status != dp.status {
                info!(
                    partition_id = dp.partition_id,
                    old = %old.status,
                    new = %dp.status,
                    "data partition status changed"
                );
            }
        }
    }

    /// A uniformly random writable partition outside `excluded`, with a
    /// linear fallback scan.
    pub fn get_write_data_partition(
        &self,
        excluded: &[u32],
    ) -> Result<Arc<DataPartition>, ClientError> {
        let rw = self.rw_partitions.read().unwrap();
        if rw.is_empty() {
            return Err(ClientError::NoWritableDataPartition);
        }
        let choose = rand::thread_rng().gen_range(0..rw.len());
        let candidate = &rw[choose];
        if !excluded.contains(&candidate.partition_id) {
            return Ok(candidate.clone());
        }
        for dp in rw.iter() {
            if !excluded.contains(&dp.partition_id) {
                return Ok(dp.clone());
            }
        }
        Err(ClientError::NoWritableDataPartition)
    }

    pub fn get_data_partition(&self, partition_id: u32) -> Result<Arc<DataPartition>, ClientError> {
        self.partitions
            .read()
            .unwrap()
            .get(&partition_id)
            .cloned()
            .ok_or(ClientError::DataPartitionNotFound(partition_id))
    }

    pub fn writable_count(&self) -> usize {
        self.rw_partitions.read().unwrap().len()
    }

    pub fn get_connect(&self, addr: &str) -> Result<Box<dyn Connection>, ClientError> {
        self.conns.get(addr)
    }

    pub fn put_connect(&self, conn: Box<dyn Connection>, force_close: bool) {
        self.conns.put(conn, force_close)
    }

    /// Starts the periodic refresh loop for `wrapper`.
    pub fn start_refresher(wrapper: &Arc<Wrapper>) -> RefresherHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let w = wrapper.clone();
        let join = std::thread::Builder::new()
            .name("dp-view-refresher".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    let mut slept = Duration::ZERO;
                    while slept < VIEW_REFRESH_INTERVAL {
                        if stop_flag.load(Ordering::Relaxed) {
                            return;
                        }
                        let slice = Duration::from_millis(100);
                        std::thread::sleep(slice);
                        slept += slice;
                    }
                    if let Err(e) = w.update_data_partitions() {
                        error!(vol = %w.vol_name, error = %e, "partition view refresh failed");
                    }
                }
            })
            .expect("spawn view refresher");
        RefresherHandle {
            stop,
            join: Some(join),
        }
    }
}

/// Join handle plus stop flag for the refresh loop.
pub struct RefresherHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Drop for RefresherHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
