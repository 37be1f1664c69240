//! Replication Protocol
//!
//! Defines the wire protocol spoken with the replication controller.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Operation, ReplicationRequest, ReplicationResponse};

/// Largest accepted frame body
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Protocol messages exchanged with the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    // ========== Replication ==========
    /// Replication request, dispatched on its operation tag
    Replication(ReplicationRequest),

    /// Replication acknowledgment
    ReplicationResponse(ReplicationResponse),

    // ========== Readiness ==========
    /// Probe request
    Probe,

    /// Probe response
    ProbeResponse {
        ready: bool,
    },

    // ========== Identity ==========
    /// Plugin info request
    GetPluginInfo,

    /// Plugin info response
    PluginInfo(PluginInfo),

    // ========== Error ==========
    /// Error response
    Error(Status),
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Replication(request) => request.operation.rpc_name(),
            Message::ReplicationResponse(_) => "ReplicationResponse",
            Message::Probe => "Probe",
            Message::ProbeResponse { .. } => "ProbeResponse",
            Message::GetPluginInfo => "GetPluginInfo",
            Message::PluginInfo(_) => "PluginInfo",
            Message::Error(_) => "Error",
        }
    }

    /// Acknowledge a replication request
    pub fn ack(operation: Operation) -> Self {
        Message::ReplicationResponse(ReplicationResponse { operation })
    }
}

/// Controller identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Driver name, e.g. "rbd.csi.ceph.com"
    pub name: String,
    pub vendor_version: String,
}

/// Status codes carried by remote errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Remote failure: a code and the backend's message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Status reported when a call outlives its deadline
    pub fn deadline_exceeded() -> Self {
        Self::new(StatusCode::DeadlineExceeded, "context deadline exceeded")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error: code = {} desc = {}", self.code, self.message)
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            checksum: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}
