//! volrepl - Volume Replication Control Client
//!
//! A command line client that asks a remote replication controller to
//! enable, disable, promote, demote or resync replication of a volume.
//!
//! # Architecture
//!
//! The replication state machine lives in the controller. This crate only
//! validates a command, builds the request, sends it over a framed channel
//! under a deadline and reports the outcome.
//!
//! - [`replication`]: request model, wire protocol and the command dispatcher
//! - [`network`]: framing and the client session
//! - [`config`]: endpoint and timeout resolution
//! - [`cli`]: the command surface of the `volrepl` binary

pub mod config;
pub mod error;
pub mod replication;
pub mod network;
pub mod cli;

pub use config::ClientConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ClientConfig, Endpoint};
    pub use crate::error::{Error, Result};
    pub use crate::network::{ConnectionLossPolicy, ReplicationControl, Session};
    pub use crate::replication::{build_request, Operation, ReplicationArgs, ReplicationRequest};
}
