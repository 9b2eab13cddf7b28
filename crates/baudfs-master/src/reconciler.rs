//! The periodic partition reconciler.
//!
//! Each tick walks every partition and runs its check sequence under the
//! partition's own lock, one step at a time; locks are never held across
//! task dispatch. Emitted tasks land on the cluster's outbound queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::unix_now;

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    pub check_interval: Duration,
    pub data_partition_timeout_sec: i64,
    pub data_partition_miss_sec: i64,
    pub meta_partition_timeout_sec: i64,
    pub meta_partition_miss_sec: i64,
    pub warn_interval_sec: i64,
    pub meta_replica_num: u8,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            data_partition_timeout_sec: 60,
            data_partition_miss_sec: 600,
            meta_partition_timeout_sec: 60,
            meta_partition_miss_sec: 600,
            warn_interval_sec: 1800,
            meta_replica_num: 3,
        }
    }
}

pub struct Reconciler {
    cluster: Arc<Cluster>,
    config: ReconcilerConfig,
}

/// Join handle plus stop flag for a running reconciler thread.
pub struct ReconcilerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Reconciler {
    pub fn new(cluster: Arc<Cluster>, config: ReconcilerConfig) -> Self {
        Self { cluster, config }
    }

    /// One full pass over every partition.
    pub fn tick(&self) {
        let now = unix_now();
        let name = self.cluster.name.clone();
        let registry = self.cluster.registry();

        for dp_arc in self.cluster.data_partition_snapshot() {
            {
                let mut dp = dp_arc.write().unwrap();
                dp.check_status(registry, self.config.data_partition_timeout_sec, now);
            }
            {
                let mut dp = dp_arc.write().unwrap();
                dp.check_replica_liveness(registry, self.config.data_partition_timeout_sec, now);
            }
            {
                let mut dp = dp_arc.write().unwrap();
                dp.check_miss(
                    &name,
                    self.config.data_partition_miss_sec,
                    self.config.warn_interval_sec,
                    now,
                );
            }
            {
                let mut dp = dp_arc.write().unwrap();
                dp.check_disk_error(&name);
            }
            let tasks = {
                let mut dp = dp_arc.write().unwrap();
                dp.check_replication_task()
            };
            self.cluster.put_tasks(tasks);
        }

        for mp_arc in self.cluster.meta_partition_snapshot() {
            {
                let mut mp = mp_arc.write().unwrap();
                mp.check_status(registry, self.config.meta_partition_timeout_sec, now);
            }
            {
                let mut mp = mp_arc.write().unwrap();
                mp.check_replica_miss(
                    &name,
                    self.config.meta_partition_miss_sec,
                    self.config.warn_interval_sec,
                    now,
                );
            }
            let tasks = {
                let mp = mp_arc.read().unwrap();
                mp.check_replica_num(&name, self.config.meta_replica_num);
                mp.generate_replica_tasks(&name)
            };
            self.cluster.put_tasks(tasks);
        }

        self.cluster.check_end();
        debug!(cluster = %name, pending = self.cluster.pending_task_count(), "reconciler tick");
    }

    /// Starts the tick loop on a background thread. The stop flag is
    /// observed between sleep slices, so shutdown is prompt.
    pub fn spawn(self) -> ReconcilerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let join = std::thread::Builder::new()
            .name("partition-reconciler".to_string())
            .spawn(move || {
                info!("reconciler started");
                while !stop_flag.load(Ordering::Relaxed) {
                    self.tick();
                    let mut slept = Duration::ZERO;
                    while slept < self.config.check_interval {
                        if stop_flag.load(Ordering::Relaxed) {
                            return;
                        }
                        let slice = Duration::from_millis(100);
                        std::thread::sleep(slice);
                        slept += slice;
                    }
                }
            })
            .expect("spawn reconciler thread");
        ReconcilerHandle {
            stop,
            join: Some(join),
        }
    }
}
