//! BaudFS client SDK.
//!
//! The write path owns one stream-writer actor per open inode: bytes go
//! into append-only extents on writable data partitions, and the
//! resulting extent keys are pushed to the meta tier on flush. The read
//! path opens one extent reader per extent key and fails over across
//! replicas. Both sides share the partition view refreshed from the
//! master and a TTL-reaped connection pool.

pub mod config;
pub mod error;
pub mod extent_reader;
pub mod extent_writer;
pub mod master;
pub mod meta_conn;
pub mod pool;
pub mod stream_writer;
pub mod transport;
pub mod wrapper;

pub use config::ClientConfig;
pub use error::ClientError;
pub use extent_reader::ExtentReader;
pub use extent_writer::ExtentWriter;
pub use pool::ConnPool;
pub use stream_writer::{AppendExtentKeyFn, StreamWriter};
pub use transport::{Connection, TcpTransport, Transport};
pub use wrapper::{DataPartition, Wrapper};
