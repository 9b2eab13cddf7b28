//! TCP front door of the meta node.
//!
//! One accept loop, one thread per connection, packets in, replies out.
//! The stop signal is observed between accepts and between packets;
//! in-flight requests finish but are not interrupted.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info};

use baudfs_proto::packet::ProtoError;
use baudfs_proto::Packet;

use crate::error::MetaError;
use crate::manager::MetaManager;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running TCP service bound to a manager.
pub struct MetaServer {
    local_addr: String,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl MetaServer {
    /// Binds `addr` and starts serving the manager.
    pub fn start(manager: Arc<MetaManager>, addr: &str) -> Result<Self, MetaError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?.to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let accept_thread = std::thread::Builder::new()
            .name("metanode-accept".to_string())
            .spawn(move || {
                info!("meta server accepting connections");
                loop {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    match listener.accept() {
                        Ok((conn, peer)) => {
                            debug!(%peer, "connection accepted");
                            let mgr = manager.clone();
                            let conn_stop = stop_flag.clone();
                            let _ = std::thread::Builder::new()
                                .name("metanode-conn".to_string())
                                .spawn(move || serve_conn(mgr, conn, conn_stop));
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            std::thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            std::thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                    }
                }
            })?;
        Ok(Self {
            local_addr,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Stops accepting and joins the accept loop. Connection threads
    /// drain on their next packet boundary.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.accept_thread.take() {
            let _ = join.join();
        }
    }
}

impl Drop for MetaServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve_conn(manager: Arc<MetaManager>, mut conn: TcpStream, stop: Arc<AtomicBool>) {
    let _ = conn.set_nodelay(true);
    loop {
        // Checked between packets; an in-flight request is never
        // interrupted.
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let mut p = Packet::default();
        match p.read_from(&mut conn) {
            Ok(()) => {}
            Err(ProtoError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => return,
            Err(e) => {
                debug!(error = %e, "connection read failed");
                return;
            }
        }
        let log_id = p.unique_log_id();
        if let Err(e) = manager.handle_packet(&mut p) {
            error!(request = %log_id, error = %e, "request handling failed");
            return;
        }
        if let Err(e) = p.write_to(&mut conn) {
            debug!(request = %log_id, error = %e, "reply write failed");
            return;
        }
    }
}
