//! Partition status and operation result codes.
//!
//! The numeric values are part of the wire contract: they appear in
//! heartbeat reports, packet headers, and the master's JSON views.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health/serving state of a data or meta partition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PartitionStatus {
    /// Partition serves reads only.
    ReadOnly = 1,
    /// Partition serves reads and writes.
    ReadWrite = 2,
    /// Partition is not serving.
    Unavailable = 255,
}

impl PartitionStatus {
    /// Returns the stable wire value for this status.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a wire value, defaulting unknown values to `Unavailable`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => PartitionStatus::ReadOnly,
            2 => PartitionStatus::ReadWrite,
            _ => PartitionStatus::Unavailable,
        }
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PartitionStatus::ReadOnly => "ReadOnly",
            PartitionStatus::ReadWrite => "ReadWrite",
            PartitionStatus::Unavailable => "Unavailable",
        };
        write!(f, "{}", s)
    }
}

/// Result code carried in every reply packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultCode {
    /// Operation succeeded.
    OpOk = 0xF0,
    /// Transient failure; the caller should retry, possibly elsewhere.
    OpAgain = 0xF1,
    /// Target entity does not exist.
    OpNotExist = 0xF2,
    /// Target entity already exists.
    OpExist = 0xF3,
    /// The partition's inode-ID range is exhausted.
    OpInodeFull = 0xF4,
    /// Request arguments do not match the partition state.
    OpArgMismatch = 0xF5,
    /// Fatal payload or internal error.
    OpErr = 0xFF,
}

impl ResultCode {
    /// Returns the stable wire value for this code.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a wire value, defaulting unknown values to `OpErr`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0xF0 => ResultCode::OpOk,
            0xF1 => ResultCode::OpAgain,
            0xF2 => ResultCode::OpNotExist,
            0xF3 => ResultCode::OpExist,
            0xF4 => ResultCode::OpInodeFull,
            0xF5 => ResultCode::OpArgMismatch,
            _ => ResultCode::OpErr,
        }
    }

    /// True for codes the caller may retry against another replica or
    /// partition.
    pub fn is_retryable(self) -> bool {
        self == ResultCode::OpAgain
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultCode::OpOk => "Ok",
            ResultCode::OpAgain => "Again",
            ResultCode::OpNotExist => "NotExist",
            ResultCode::OpExist => "Exist",
            ResultCode::OpInodeFull => "InodeFull",
            ResultCode::OpArgMismatch => "ArgMismatch",
            ResultCode::OpErr => "Err",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_status_roundtrip() {
        for s in [
            PartitionStatus::ReadOnly,
            PartitionStatus::ReadWrite,
            PartitionStatus::Unavailable,
        ] {
            assert_eq!(PartitionStatus::from_u8(s.as_u8()), s);
        }
    }

    #[test]
    fn test_partition_status_unknown_maps_to_unavailable() {
        assert_eq!(PartitionStatus::from_u8(0), PartitionStatus::Unavailable);
        assert_eq!(PartitionStatus::from_u8(7), PartitionStatus::Unavailable);
    }

    #[test]
    fn test_result_code_roundtrip() {
        for c in [
            ResultCode::OpOk,
            ResultCode::OpAgain,
            ResultCode::OpNotExist,
            ResultCode::OpExist,
            ResultCode::OpInodeFull,
            ResultCode::OpArgMismatch,
            ResultCode::OpErr,
        ] {
            assert_eq!(ResultCode::from_u8(c.as_u8()), c);
        }
    }

    #[test]
    fn test_only_again_is_retryable() {
        assert!(ResultCode::OpAgain.is_retryable());
        assert!(!ResultCode::OpOk.is_retryable());
        assert!(!ResultCode::OpErr.is_retryable());
        assert!(!ResultCode::OpInodeFull.is_retryable());
    }
}
