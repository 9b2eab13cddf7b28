//! The per-partition on-disk manifest.
//!
//! `<rootDir>/partition_<id>/meta` holds enough JSON to reconstruct the
//! partition's identity and range. Writes go through a temp file plus
//! rename so a crash never leaves a half-written manifest in place; a
//! torn file surfaces as `InvalidManifest`, which the loader treats as
//! "fall back to raft replay".

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use baudfs_proto::message::Peer;

use crate::error::MetaError;

/// Manifest file name inside a partition directory.
pub const MANIFEST_FILE: &str = "meta";

/// Identity and range of one partition, as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub partition_id: u64,
    pub vol_name: String,
    pub start: u64,
    pub end: u64,
    /// Highest allocated inode ID at the last store tick.
    pub cursor: u64,
    pub peers: Vec<Peer>,
}

/// Atomically writes the manifest into `dir`, creating it if needed.
pub fn store(dir: &Path, m: &Manifest) -> Result<(), MetaError> {
    fs::create_dir_all(dir)?;
    let body = serde_json::to_vec_pretty(m)?;
    let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
    fs::write(&tmp, body)?;
    fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
    Ok(())
}

/// Reads the manifest from `dir`.
pub fn load(dir: &Path) -> Result<Manifest, MetaError> {
    let raw = fs::read(dir.join(MANIFEST_FILE))?;
    serde_json::from_slice(&raw)
        .map_err(|e| MetaError::InvalidManifest(format!("{}: {}", dir.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest {
            partition_id: 7,
            vol_name: "vol".to_string(),
            start: 0,
            end: 1000,
            cursor: 12,
            peers: vec![Peer {
                id: 1,
                addr: "m0:9021".to_string(),
            }],
        }
    }

    #[test]
    fn test_store_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let m = manifest();
        store(dir.path(), &m).unwrap();
        assert_eq!(load(dir.path()).unwrap(), m);
    }

    #[test]
    fn test_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = manifest();
        store(dir.path(), &m).unwrap();
        m.cursor = 99;
        store(dir.path(), &m).unwrap();
        assert_eq!(load(dir.path()).unwrap().cursor, 99);
    }

    #[test]
    fn test_torn_manifest_is_invalid_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{\"partition_id\": 7,").unwrap();
        assert!(matches!(
            load(dir.path()),
            Err(MetaError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_missing_manifest_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(dir.path()), Err(MetaError::Io(_))));
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), &manifest()).unwrap();
        assert!(!dir.path().join(format!("{}.tmp", MANIFEST_FILE)).exists());
    }
}
