//! Replication Module
//!
//! Request model for volume replication operations and the dispatcher that
//! turns command input into requests.

pub mod protocol;
mod dispatch;

pub use protocol::{Message, FrameHeader, PluginInfo, Status, StatusCode};
pub use dispatch::{build_request, ReplicationArgs};

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved parameter key carrying the force flag
pub const FORCE_PARAMETER: &str = "force";

/// Backend-defined parameters, passed through verbatim
pub type Parameters = HashMap<String, String>;

/// Replication operations understood by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Enable,
    Disable,
    Promote,
    Demote,
    Resync,
}

impl Operation {
    /// All operations, in command order
    pub const ALL: [Operation; 5] = [
        Operation::Enable,
        Operation::Disable,
        Operation::Promote,
        Operation::Demote,
        Operation::Resync,
    ];

    /// Command name
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Enable => "enable",
            Operation::Disable => "disable",
            Operation::Promote => "promote",
            Operation::Demote => "demote",
            Operation::Resync => "resync",
        }
    }

    /// Remote procedure invoked for this operation
    pub fn rpc_name(&self) -> &'static str {
        match self {
            Operation::Enable => "EnableVolumeReplication",
            Operation::Disable => "DisableVolumeReplication",
            Operation::Promote => "PromoteVolume",
            Operation::Demote => "DemoteVolume",
            Operation::Resync => "ResyncVolume",
        }
    }

    /// Whether the operation takes the force flag
    pub fn accepts_force(&self) -> bool {
        !matches!(self, Operation::Enable)
    }

    /// Human-readable line printed after a successful call
    pub fn success_message(&self, volume_id: &str) -> String {
        match self {
            Operation::Enable => format!("replication enabled for volume {}", volume_id),
            Operation::Disable => format!("replication disabled for volume {}", volume_id),
            Operation::Promote => format!("volume {} promoted to primary", volume_id),
            Operation::Demote => format!("volume {} demoted to secondary", volume_id),
            Operation::Resync => format!("resync requested for volume {}", volume_id),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for the backend. Values never appear in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secrets(HashMap<String, String>);

impl Secrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a secret, replacing any previous value for the key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Secret keys (values are not exposed by iteration)
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

impl FromIterator<(String, String)> for Secrets {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A replication request; the operation tag selects the remote procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRequest {
    pub operation: Operation,
    pub volume_id: String,
    pub parameters: Parameters,
    pub secrets: Secrets,
}

impl ReplicationRequest {
    /// Create a request with empty parameters and secrets
    pub fn new(operation: Operation, volume_id: impl Into<String>) -> Self {
        Self {
            operation,
            volume_id: volume_id.into(),
            parameters: Parameters::new(),
            secrets: Secrets::new(),
        }
    }
}

/// Backend acknowledgment of a replication request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationResponse {
    pub operation: Operation,
}
