//! A TTL-reaped connection pool shared across inodes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::ClientError;
use crate::transport::{Connection, Transport};

/// Idle lifetime before a pooled connection is reaped.
pub const POOL_IDLE_TTL: Duration = Duration::from_secs(20);

/// Idle connections kept per address.
pub const POOL_MAX_IDLE_PER_ADDR: usize = 100;

/// Marker for `put`: the connection is broken, close it.
pub const FORCE_CLOSE_CONNECT: bool = true;
/// Marker for `put`: the connection is healthy, recycle it.
pub const NO_CLOSE_CONNECT: bool = false;

struct IdleConn {
    conn: Box<dyn Connection>,
    parked_at: Instant,
}

/// Pools connections per address; `get` reuses a fresh idle connection
/// or dials a new one, `put` recycles or closes.
pub struct ConnPool {
    transport: Arc<dyn Transport>,
    idle: Mutex<HashMap<String, Vec<IdleConn>>>,
    ttl: Duration,
    max_idle_per_addr: usize,
}

impl ConnPool {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_limits(transport, POOL_IDLE_TTL, POOL_MAX_IDLE_PER_ADDR)
    }

    pub fn with_limits(
        transport: Arc<dyn Transport>,
        ttl: Duration,
        max_idle_per_addr: usize,
    ) -> Self {
        Self {
            transport,
            idle: Mutex::new(HashMap::new()),
            ttl,
            max_idle_per_addr,
        }
    }

    /// Takes a pooled connection to `addr`, dialing when none is idle.
    /// Expired idle connections encountered on the way are dropped.
    pub fn get(&self, addr: &str) -> Result<Box<dyn Connection>, ClientError> {
        {
            let mut idle = self.idle.lock().unwrap();
            if let Some(conns) = idle.get_mut(addr) {
                while let Some(parked) = conns.pop() {
                    if parked.parked_at.elapsed() < self.ttl {
                        return Ok(parked.conn);
                    }
                }
            }
        }
        self.transport.connect(addr)
    }

    /// Returns a connection. Broken connections are closed; healthy ones
    /// are parked unless the per-address cap is reached.
    pub fn put(&self, conn: Box<dyn Connection>, force_close: bool) {
        if force_close {
            return;
        }
        let addr = conn.addr().to_string();
        let mut idle = self.idle.lock().unwrap();
        let conns = idle.entry(addr).or_default();
        conns.retain(|c| c.parked_at.elapsed() < self.ttl);
        if conns.len() < self.max_idle_per_addr {
            conns.push(IdleConn {
                conn,
                parked_at: Instant::now(),
            });
        }
    }

    pub fn idle_count(&self, addr: &str) -> usize {
        self.idle
            .lock()
            .unwrap()
            .get(addr)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baudfs_proto::Packet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockConn {
        addr: String,
    }

    impl Connection for MockConn {
        fn send(&mut self, _p: &Packet) -> Result<(), ClientError> {
            Ok(())
        }
        fn recv(&mut self) -> Result<Packet, ClientError> {
            Ok(Packet::default())
        }
        fn addr(&self) -> &str {
            &self.addr
        }
    }

    struct MockTransport {
        dials: AtomicUsize,
    }

    impl Transport for MockTransport {
        fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, ClientError> {
            self.dials.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(MockConn {
                addr: addr.to_string(),
            }))
        }
    }

    fn pool_with(ttl: Duration, cap: usize) -> (Arc<MockTransport>, ConnPool) {
        let t = Arc::new(MockTransport {
            dials: AtomicUsize::new(0),
        });
        let pool = ConnPool::with_limits(t.clone(), ttl, cap);
        (t, pool)
    }

    #[test]
    fn test_get_reuses_idle() {
        let (t, pool) = pool_with(Duration::from_secs(20), 10);
        let c = pool.get("a:1").unwrap();
        pool.put(c, NO_CLOSE_CONNECT);
        let _c = pool.get("a:1").unwrap();
        assert_eq!(t.dials.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_force_close_drops() {
        let (t, pool) = pool_with(Duration::from_secs(20), 10);
        let c = pool.get("a:1").unwrap();
        pool.put(c, FORCE_CLOSE_CONNECT);
        assert_eq!(pool.idle_count("a:1"), 0);
        let _c = pool.get("a:1").unwrap();
        assert_eq!(t.dials.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_expired_idle_is_reaped() {
        let (t, pool) = pool_with(Duration::from_millis(10), 10);
        let c = pool.get("a:1").unwrap();
        pool.put(c, NO_CLOSE_CONNECT);
        std::thread::sleep(Duration::from_millis(20));
        let _c = pool.get("a:1").unwrap();
        // The parked connection expired, so a fresh dial happened.
        assert_eq!(t.dials.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_idle_cap_enforced() {
        let (_t, pool) = pool_with(Duration::from_secs(20), 2);
        let conns: Vec<_> = (0..4).map(|_| pool.get("a:1").unwrap()).collect();
        for c in conns {
            pool.put(c, NO_CLOSE_CONNECT);
        }
        assert_eq!(pool.idle_count("a:1"), 2);
    }

    #[test]
    fn test_addresses_are_isolated() {
        let (_t, pool) = pool_with(Duration::from_secs(20), 10);
        let c = pool.get("a:1").unwrap();
        pool.put(c, NO_CLOSE_CONNECT);
        assert_eq!(pool.idle_count("a:1"), 1);
        assert_eq!(pool.idle_count("b:1"), 0);
    }
}
