#![warn(missing_docs)]

//! BaudFS shared protocol: op codes, result codes, extent keys, packet
//! framing, and the admin-task envelope exchanged between the Master,
//! MetaNodes, DataNodes, and clients.

pub mod extent;
pub mod message;
pub mod opcode;
pub mod packet;
pub mod status;
pub mod stream;
pub mod task;

pub use extent::ExtentKey;
pub use opcode::Opcode;
pub use packet::Packet;
pub use status::{PartitionStatus, ResultCode};
pub use stream::StreamKey;
pub use task::{AdminTask, TaskPayload};
