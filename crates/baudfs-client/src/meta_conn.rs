//! Leader-routed requests to a meta partition.
//!
//! The leader address is tried first; when it is unknown or the reply
//! asks for a retry, every member is cycled with a short backoff until
//! the time limit runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use baudfs_proto::{Packet, ResultCode};

use crate::error::ClientError;
use crate::pool::{ConnPool, FORCE_CLOSE_CONNECT, NO_CLOSE_CONNECT};

/// Rounds over the member list before giving up.
pub const SEND_RETRY_LIMIT: usize = 100;

/// Backoff between member rounds.
pub const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Overall deadline for one logical send.
pub const SEND_TIME_LIMIT: Duration = Duration::from_secs(20);

/// The client's view of one meta partition's routing state.
#[derive(Clone, Debug, Default)]
pub struct MetaPartitionView {
    pub partition_id: u64,
    pub start: u64,
    pub end: u64,
    pub members: Vec<String>,
    /// Empty when no leader is known.
    pub leader_addr: String,
}

/// Sends `req` to the partition, preferring the leader.
pub fn send_to_meta_partition(
    pool: &Arc<ConnPool>,
    mp: &MetaPartitionView,
    req: &Packet,
) -> Result<Packet, ClientError> {
    if !mp.leader_addr.is_empty() {
        match send_once(pool, &mp.leader_addr, req) {
            Ok(resp) if !resp.result().is_retryable() => {
                debug!(
                    partition_id = mp.partition_id,
                    leader = %mp.leader_addr,
                    "meta send on leader succeeded"
                );
                return Ok(resp);
            }
            Ok(_) | Err(_) => {
                warn!(
                    partition_id = mp.partition_id,
                    leader = %mp.leader_addr,
                    "meta send on leader failed, retrying members"
                );
            }
        }
    }

    let start = Instant::now();
    for _round in 0..SEND_RETRY_LIMIT {
        for addr in &mp.members {
            match send_once(pool, addr, req) {
                Ok(resp) if !resp.result().is_retryable() => return Ok(resp),
                Ok(_) => {
                    debug!(partition_id = mp.partition_id, %addr, "member asked for retry")
                }
                Err(e) => {
                    warn!(partition_id = mp.partition_id, %addr, error = %e, "member send failed")
                }
            }
        }
        if start.elapsed() > SEND_TIME_LIMIT {
            break;
        }
        std::thread::sleep(SEND_RETRY_INTERVAL);
    }
    Err(ClientError::MetaSendExhausted(mp.partition_id))
}

fn send_once(pool: &Arc<ConnPool>, addr: &str, req: &Packet) -> Result<Packet, ClientError> {
    let mut conn = pool.get(addr)?;
    let result = (|| {
        conn.send(req)?;
        let resp = conn.recv()?;
        if resp.req_id != req.req_id {
            return Err(ClientError::ReplyMismatch {
                request: req.unique_log_id(),
                reply: resp.unique_log_id(),
            });
        }
        Ok(resp)
    })();
    pool.put(conn, if result.is_err() { FORCE_CLOSE_CONNECT } else { NO_CLOSE_CONNECT });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Connection, Transport};
    use baudfs_proto::Opcode;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted per-host result codes.
    struct FakeMetaNodes {
        codes: Mutex<HashMap<String, ResultCode>>,
    }

    struct FakeConn {
        nodes: Arc<FakeMetaNodes>,
        addr: String,
        reply: Option<Packet>,
    }

    impl Connection for FakeConn {
        fn send(&mut self, p: &Packet) -> Result<(), ClientError> {
            let code = *self
                .nodes
                .codes
                .lock()
                .unwrap()
                .get(&self.addr)
                .unwrap_or(&ResultCode::OpErr);
            let mut reply = Packet::new_reply(p.req_id, p.partition_id, p.file_id);
            reply.result_code = code.as_u8();
            self.reply = Some(reply);
            Ok(())
        }

        fn recv(&mut self) -> Result<Packet, ClientError> {
            self.reply.take().ok_or_else(|| {
                ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "nothing to receive",
                ))
            })
        }

        fn addr(&self) -> &str {
            &self.addr
        }
    }

    struct FakeTransport {
        nodes: Arc<FakeMetaNodes>,
    }

    impl Transport for FakeTransport {
        fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, ClientError> {
            Ok(Box::new(FakeConn {
                nodes: self.nodes.clone(),
                addr: addr.to_string(),
                reply: None,
            }))
        }
    }

    fn harness(codes: &[(&str, ResultCode)]) -> (Arc<ConnPool>, MetaPartitionView) {
        let nodes = Arc::new(FakeMetaNodes {
            codes: Mutex::new(
                codes
                    .iter()
                    .map(|(a, c)| (a.to_string(), *c))
                    .collect(),
            ),
        });
        let pool = Arc::new(ConnPool::new(Arc::new(FakeTransport { nodes })));
        let mp = MetaPartitionView {
            partition_id: 3,
            start: 0,
            end: 1000,
            members: vec!["m0:1".into(), "m1:1".into(), "m2:1".into()],
            leader_addr: "m0:1".into(),
        };
        (pool, mp)
    }

    #[test]
    fn test_leader_answers_directly() {
        let (pool, mp) = harness(&[
            ("m0:1", ResultCode::OpOk),
            ("m1:1", ResultCode::OpOk),
            ("m2:1", ResultCode::OpOk),
        ]);
        let req = Packet::new_request(Opcode::MetaInodeGet);
        let resp = send_to_meta_partition(&pool, &mp, &req).unwrap();
        assert_eq!(resp.result(), ResultCode::OpOk);
        assert_eq!(resp.req_id, req.req_id);
    }

    #[test]
    fn test_leader_again_falls_back_to_members() {
        let (pool, mp) = harness(&[
            ("m0:1", ResultCode::OpAgain),
            ("m1:1", ResultCode::OpOk),
            ("m2:1", ResultCode::OpOk),
        ]);
        let req = Packet::new_request(Opcode::MetaCreateInode);
        let resp = send_to_meta_partition(&pool, &mp, &req).unwrap();
        assert_eq!(resp.result(), ResultCode::OpOk);
    }

    #[test]
    fn test_no_leader_goes_straight_to_members() {
        let (pool, mut mp) = harness(&[
            ("m0:1", ResultCode::OpOk),
            ("m1:1", ResultCode::OpOk),
            ("m2:1", ResultCode::OpOk),
        ]);
        mp.leader_addr = String::new();
        let req = Packet::new_request(Opcode::MetaLookup);
        let resp = send_to_meta_partition(&pool, &mp, &req).unwrap();
        assert_eq!(resp.result(), ResultCode::OpOk);
    }

    #[test]
    fn test_terminal_error_is_returned_not_retried() {
        let (pool, mp) = harness(&[
            ("m0:1", ResultCode::OpInodeFull),
            ("m1:1", ResultCode::OpOk),
        ]);
        let req = Packet::new_request(Opcode::MetaCreateInode);
        // InodeFull is terminal: the caller migrates partitions instead.
        let resp = send_to_meta_partition(&pool, &mp, &req).unwrap();
        assert_eq!(resp.result(), ResultCode::OpInodeFull);
    }
}
