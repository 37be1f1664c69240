//! Command Dispatcher
//!
//! Validates command input and builds the request for an operation.
//! No network or disk access happens here.

use super::{Operation, Parameters, ReplicationRequest, Secrets, FORCE_PARAMETER};
use crate::error::{Error, Result};

/// Raw input of one replication command
#[derive(Debug, Clone, Default)]
pub struct ReplicationArgs {
    /// Positional volume identifier
    pub volume_id: Option<String>,
    /// `key=value` pairs in flag order
    pub parameters: Vec<(String, String)>,
    /// `key=value` pairs in flag order
    pub secrets: Vec<(String, String)>,
    /// Force flag; `None` when the flag was not given
    pub force: Option<bool>,
}

impl ReplicationArgs {
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: Some(volume_id.into()),
            ..Self::default()
        }
    }
}

/// Build the request for `operation`.
///
/// Duplicate keys keep the last value. For every operation except enable
/// the force flag is written to `parameters["force"]`, replacing any value
/// supplied through the parameters themselves.
pub fn build_request(operation: Operation, args: ReplicationArgs) -> Result<ReplicationRequest> {
    let volume_id = args.volume_id.ok_or(Error::MissingIdentifier)?;

    let mut parameters: Parameters = args.parameters.into_iter().collect();
    let secrets: Secrets = args.secrets.into_iter().collect();

    if operation.accepts_force() {
        let force = args.force.unwrap_or(false);
        parameters.insert(FORCE_PARAMETER.to_string(), force.to_string());
    } else if args.force.is_some() {
        return Err(Error::Usage(format!(
            "unknown flag: --force (not supported by {})",
            operation
        )));
    }

    tracing::debug!(
        operation = %operation,
        volume_id = %volume_id,
        parameters = ?parameters,
        secrets = ?secrets,
        "Built replication request"
    );

    Ok(ReplicationRequest {
        operation,
        volume_id,
        parameters,
        secrets,
    })
}
