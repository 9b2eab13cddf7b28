//! Client configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::pool::{POOL_IDLE_TTL, POOL_MAX_IDLE_PER_ADDR};
use crate::transport::{TcpTransport, READ_DEADLINE};

/// Tunables for one mounted volume.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Comma-separated master addresses.
    pub masters: String,
    /// Volume the client operates on.
    pub vol_name: String,
    /// Dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-RPC read deadline in milliseconds.
    pub read_timeout_ms: u64,
    /// Idle connection lifetime in milliseconds.
    pub pool_idle_ttl_ms: u64,
    /// Idle connections kept per address.
    pub pool_max_idle_per_addr: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            masters: String::new(),
            vol_name: String::new(),
            connect_timeout_ms: 1_000,
            read_timeout_ms: READ_DEADLINE.as_millis() as u64,
            pool_idle_ttl_ms: POOL_IDLE_TTL.as_millis() as u64,
            pool_max_idle_per_addr: POOL_MAX_IDLE_PER_ADDR,
        }
    }
}

impl ClientConfig {
    /// The TCP transport this configuration describes.
    pub fn transport(&self) -> TcpTransport {
        TcpTransport {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    pub fn pool_idle_ttl(&self) -> Duration {
        Duration::from_millis(self.pool_idle_ttl_ms)
    }
}
