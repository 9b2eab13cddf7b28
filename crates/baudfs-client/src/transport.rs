//! The transport seam: packet-oriented connections behind traits so the
//! pool, writers, and readers are testable without a live data node.

use std::io::{BufReader, BufWriter, Write as _};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use baudfs_proto::Packet;

use crate::error::ClientError;

/// Default per-RPC read deadline.
pub const READ_DEADLINE: Duration = Duration::from_secs(20);

/// One established packet connection.
pub trait Connection: Send {
    fn send(&mut self, p: &Packet) -> Result<(), ClientError>;
    fn recv(&mut self) -> Result<Packet, ClientError>;
    /// Remote address this connection is bound to.
    fn addr(&self) -> &str;
}

/// Connects to peers; shared by the pool and one-shot dials.
pub trait Transport: Send + Sync {
    fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, ClientError>;
}

/// TCP transport with nodelay and a read deadline.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            read_timeout: READ_DEADLINE,
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, ClientError> {
        let wrap = |source: std::io::Error| ClientError::ConnectFailed {
            addr: addr.to_string(),
            source,
        };
        let sock_addr = addr
            .to_socket_addrs()
            .map_err(wrap)?
            .next()
            .ok_or_else(|| ClientError::ConnectFailed {
                addr: addr.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"),
            })?;
        let stream = TcpStream::connect_timeout(&sock_addr, self.connect_timeout).map_err(wrap)?;
        stream.set_nodelay(true).map_err(wrap)?;
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(wrap)?;
        let reader = BufReader::new(stream.try_clone().map_err(wrap)?);
        Ok(Box::new(TcpConnection {
            addr: addr.to_string(),
            reader,
            writer: BufWriter::new(stream),
        }))
    }
}

struct TcpConnection {
    addr: String,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection for TcpConnection {
    fn send(&mut self, p: &Packet) -> Result<(), ClientError> {
        p.write_to(&mut self.writer)?;
        self.writer.flush().map_err(ClientError::Io)
    }

    fn recv(&mut self) -> Result<Packet, ClientError> {
        let mut p = Packet::default();
        p.read_from(&mut self.reader)?;
        Ok(p)
    }

    fn addr(&self) -> &str {
        &self.addr
    }
}
