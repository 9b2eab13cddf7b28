//! Manager lifecycle: disk scan, attach/detach, dispatch, and restart
//! recovery through the manifest.

use std::fs;
use std::sync::Arc;

use baudfs_metanode::{MetaManager, MetaManagerConfig};
use baudfs_proto::message::{
    CreateInodeRequest, CreateInodeResponse, CreateMetaPartitionRequest,
    DeleteMetaPartitionRequest, InodeGetRequest, MetaPartitionReport,
};
use baudfs_proto::{Opcode, Packet, ResultCode};

fn manager(root: &std::path::Path) -> Arc<MetaManager> {
    let mgr = MetaManager::new(MetaManagerConfig {
        node_id: 1,
        root_dir: root.to_path_buf(),
    });
    mgr.start().unwrap();
    mgr
}

fn request(op: Opcode, body: &impl serde::Serialize) -> Packet {
    let mut p = Packet::new_request(op);
    p.fill_data(serde_json::to_vec(body).unwrap());
    p
}

fn create_partition(mgr: &Arc<MetaManager>, id: u64, start: u64, end: u64) {
    let mut p = request(
        Opcode::CreateMetaPartition,
        &CreateMetaPartitionRequest {
            partition_id: id,
            start,
            end,
            members: Vec::new(),
            vol_name: "vol".to_string(),
        },
    );
    mgr.handle_packet(&mut p).unwrap();
    assert_eq!(p.result(), ResultCode::OpOk);
}

fn create_inode(mgr: &Arc<MetaManager>, partition_id: u64) -> u64 {
    let mut p = request(
        Opcode::MetaCreateInode,
        &CreateInodeRequest {
            vol_name: "vol".to_string(),
            partition_id,
            mode: 0o644,
        },
    );
    mgr.handle_packet(&mut p).unwrap();
    assert_eq!(p.result(), ResultCode::OpOk);
    let resp: CreateInodeResponse = serde_json::from_slice(&p.data).unwrap();
    resp.info.unwrap().inode
}

#[test]
fn test_create_partition_and_serve_inodes() {
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    create_partition(&mgr, 1, 0, 1000);
    assert_eq!(mgr.partition_count(), 1);

    let ino = create_inode(&mgr, 1);
    assert!(ino >= 1);

    let mut p = request(
        Opcode::MetaInodeGet,
        &InodeGetRequest {
            vol_name: "vol".to_string(),
            partition_id: 1,
            inode: ino,
        },
    );
    mgr.handle_packet(&mut p).unwrap();
    assert_eq!(p.result(), ResultCode::OpOk);
}

#[test]
fn test_duplicate_partition_rejected() {
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    create_partition(&mgr, 1, 0, 1000);

    let mut p = request(
        Opcode::CreateMetaPartition,
        &CreateMetaPartitionRequest {
            partition_id: 1,
            start: 0,
            end: 1000,
            members: Vec::new(),
            vol_name: "vol".to_string(),
        },
    );
    mgr.handle_packet(&mut p).unwrap();
    assert_eq!(p.result(), ResultCode::OpExist);
}

#[test]
fn test_request_for_unknown_partition() {
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let mut p = request(
        Opcode::MetaInodeGet,
        &InodeGetRequest {
            vol_name: "vol".to_string(),
            partition_id: 42,
            inode: 1,
        },
    );
    mgr.handle_packet(&mut p).unwrap();
    assert_eq!(p.result(), ResultCode::OpNotExist);
}

#[test]
fn test_restart_recovers_partitions_from_disk() {
    let root = tempfile::tempdir().unwrap();
    {
        let mgr = manager(root.path());
        create_partition(&mgr, 1, 0, 1000);
        create_partition(&mgr, 2, 1001, 2000);
        create_inode(&mgr, 1);
        create_inode(&mgr, 1);
        // StoreTick persists the cursor through the manifest.
        mgr.get_partition(1).unwrap().store_tick().unwrap();
        mgr.stop();
    }

    let mgr = manager(root.path());
    assert_eq!(mgr.partition_count(), 2);
    let mp = mgr.get_partition(1).unwrap();
    assert_eq!(mp.cursor(), 2);
    assert_eq!(mp.end(), 1000);
    // Allocation resumes after the recovered cursor.
    let ino = create_inode(&mgr, 1);
    assert_eq!(ino, 3);
}

#[test]
fn test_scan_skips_invalid_directories() {
    let root = tempfile::tempdir().unwrap();
    {
        let mgr = manager(root.path());
        create_partition(&mgr, 1, 0, 1000);
        mgr.stop();
    }
    // Noise the scan must tolerate.
    fs::create_dir(root.path().join("partition_")).unwrap();
    fs::create_dir(root.path().join("partition_abc")).unwrap();
    fs::create_dir(root.path().join("unrelated")).unwrap();
    fs::create_dir(root.path().join("partition_9")).unwrap(); // no manifest
    fs::create_dir(root.path().join("partition_8")).unwrap();
    fs::write(root.path().join("partition_8").join("meta"), b"{torn").unwrap();

    let mgr = manager(root.path());
    assert_eq!(mgr.partition_count(), 1);
    assert!(mgr.get_partition(1).is_ok());
}

#[test]
fn test_delete_partition_detaches() {
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    create_partition(&mgr, 1, 0, 1000);

    let mut p = request(
        Opcode::DeleteMetaPartition,
        &DeleteMetaPartitionRequest { partition_id: 1 },
    );
    mgr.handle_packet(&mut p).unwrap();
    assert_eq!(p.result(), ResultCode::OpOk);
    assert_eq!(mgr.partition_count(), 0);
    assert!(mgr.get_partition(1).is_err());
}

#[test]
fn test_heartbeat_reports_every_partition() {
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    create_partition(&mgr, 1, 0, 1000);
    create_partition(&mgr, 2, 1001, 2000);
    create_inode(&mgr, 1);

    let mut p = Packet::new_request(Opcode::MetaNodeHeartbeat);
    mgr.handle_packet(&mut p).unwrap();
    assert_eq!(p.result(), ResultCode::OpOk);
    let reports: Vec<MetaPartitionReport> = serde_json::from_slice(&p.data).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].partition_id, 1);
    assert_eq!(reports[0].max_inode_id, 1);
    assert!(reports.iter().all(|r| r.is_leader));
}

#[test]
fn test_ping() {
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let mut p = Packet::new_request(Opcode::Ping);
    mgr.handle_packet(&mut p).unwrap();
    assert_eq!(p.result(), ResultCode::OpOk);
}
