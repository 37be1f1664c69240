//! Controller Client
//!
//! One session per process invocation: owns the channel to the controller
//! and runs each call under a deadline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::time::{timeout, Instant};

use super::{read_message, write_message, Connection};
use crate::config::{ClientConfig, Endpoint};
use crate::error::{Error, Result};
use crate::replication::{
    Message, PluginInfo, ReplicationRequest, ReplicationResponse, Status, StatusCode,
};

/// Pause between readiness probes
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Exit status used when the channel is lost under [`ConnectionLossPolicy::Exit`]
const CONNECTION_LOST_EXIT_CODE: i32 = 1;

/// What to do when an established channel is lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLossPolicy {
    /// Log and terminate the process (one-shot CLI)
    Exit,
    /// Return [`Error::ConnectionLost`]; the next call reconnects
    Report,
}

/// Issues replication requests to a controller
#[async_trait]
pub trait ReplicationControl: Send {
    /// Send one request and wait at most `timeout` for the acknowledgment
    async fn call(
        &mut self,
        request: &ReplicationRequest,
        timeout: Duration,
    ) -> Result<ReplicationResponse>;
}

/// Open channel to the controller
pub struct Session {
    config: ClientConfig,
    policy: ConnectionLossPolicy,
    /// `None` after a loss or an expired deadline; reopened lazily
    conn: Option<Box<dyn Connection>>,
}

impl Session {
    /// Connect, exiting the process if the channel is later lost
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        Self::connect_with_policy(config, ConnectionLossPolicy::Exit).await
    }

    /// Connect with an explicit connection-loss policy
    pub async fn connect_with_policy(
        config: &ClientConfig,
        policy: ConnectionLossPolicy,
    ) -> Result<Self> {
        let address = config.endpoint.to_string();

        let conn = match timeout(config.connect_timeout, open(&config.endpoint)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::ConnectionTimeout(address)),
        };

        tracing::debug!("Connected to {}", address);

        Ok(Self {
            config: config.clone(),
            policy,
            conn: Some(conn),
        })
    }

    /// Endpoint this session talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    /// Whether a channel is currently open
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Invoke the remote procedure for `request.operation`
    pub async fn call(
        &mut self,
        request: &ReplicationRequest,
        timeout: Duration,
    ) -> Result<ReplicationResponse> {
        let operation = request.operation;

        tracing::debug!(
            rpc = operation.rpc_name(),
            volume_id = %request.volume_id,
            parameters = ?request.parameters,
            "Calling controller"
        );

        match self.roundtrip(Message::Replication(request.clone()), timeout).await? {
            Message::ReplicationResponse(ack) if ack.operation == operation => Ok(ack),
            Message::ReplicationResponse(ack) => Err(Error::Network(format!(
                "controller acknowledged {} for a {} request",
                ack.operation.rpc_name(),
                operation.rpc_name()
            ))),
            Message::Error(status) => Err(Error::Remote(status)),
            other => Err(Error::UnexpectedResponse {
                expected: "ReplicationResponse",
                actual: other.type_name(),
            }),
        }
    }

    /// Probe until the controller reports ready or `timeout` elapses.
    ///
    /// Not-ready answers and `Unavailable`/`DeadlineExceeded` statuses keep
    /// probing; any other failure is returned at once.
    pub async fn probe(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Remote(Status::deadline_exceeded()));
            }

            match self.roundtrip(Message::Probe, remaining).await? {
                Message::ProbeResponse { ready: true } => return Ok(()),
                Message::ProbeResponse { ready: false } => {
                    tracing::debug!("Controller not ready yet");
                }
                Message::Error(status)
                    if matches!(
                        status.code,
                        StatusCode::Unavailable | StatusCode::DeadlineExceeded
                    ) =>
                {
                    tracing::debug!("Probe failed, retrying: {}", status);
                }
                Message::Error(status) => return Err(Error::Remote(status)),
                other => {
                    return Err(Error::UnexpectedResponse {
                        expected: "ProbeResponse",
                        actual: other.type_name(),
                    })
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(PROBE_INTERVAL.min(remaining)).await;
        }
    }

    /// Fetch the controller's identity
    pub async fn plugin_info(&mut self, timeout: Duration) -> Result<PluginInfo> {
        match self.roundtrip(Message::GetPluginInfo, timeout).await? {
            Message::PluginInfo(info) => Ok(info),
            Message::Error(status) => Err(Error::Remote(status)),
            other => Err(Error::UnexpectedResponse {
                expected: "PluginInfo",
                actual: other.type_name(),
            }),
        }
    }

    /// Fetch the controller's driver name
    pub async fn driver_name(&mut self, timeout: Duration) -> Result<String> {
        let info = self.plugin_info(timeout).await?;
        if info.name.is_empty() {
            return Err(Error::Network("driver name is empty".into()));
        }
        Ok(info.name)
    }

    /// Send one message and read its response under a deadline
    async fn roundtrip(&mut self, message: Message, deadline: Duration) -> Result<Message> {
        let rpc = message.type_name();

        let result = timeout(deadline, self.exchange(&message)).await;
        match result {
            Ok(Ok(response)) => {
                tracing::trace!("{} answered with {}", rpc, response.type_name());
                Ok(response)
            }
            Ok(Err(e)) => Err(self.on_failure(e)),
            Err(_) => {
                // A late response would desynchronize the stream
                self.conn = None;
                tracing::debug!("{} exceeded its deadline of {:?}", rpc, deadline);
                Err(Error::Remote(Status::deadline_exceeded()))
            }
        }
    }

    async fn exchange(&mut self, message: &Message) -> Result<Message> {
        if self.conn.is_none() {
            tracing::debug!("Reconnecting to {}", self.config.endpoint);
            self.conn = Some(open(&self.config.endpoint).await?);
        }

        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::ConnectionLost(self.config.endpoint.to_string()));
        };

        write_message(conn, message).await?;
        read_message(conn).await
    }

    /// Drop the channel after a failed exchange and apply the loss policy
    fn on_failure(&mut self, error: Error) -> Error {
        let had_channel = self.conn.take().is_some();
        if !had_channel || !is_channel_loss(&error) {
            return error;
        }

        let address = self.config.endpoint.to_string();
        match self.policy {
            ConnectionLossPolicy::Exit => {
                eprintln!("Error: connection lost to {}: {}", address, error);
                std::process::exit(CONNECTION_LOST_EXIT_CODE);
            }
            ConnectionLossPolicy::Report => {
                tracing::warn!("Lost connection to {}: {}", address, error);
                Error::ConnectionLost(address)
            }
        }
    }
}

#[async_trait]
impl ReplicationControl for Session {
    async fn call(
        &mut self,
        request: &ReplicationRequest,
        timeout: Duration,
    ) -> Result<ReplicationResponse> {
        Session::call(self, request, timeout).await
    }
}

fn is_channel_loss(error: &Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        error,
        Error::Io(e) if matches!(
            e.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
        )
    )
}

/// Open a raw channel to an endpoint
async fn open(endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
    let failed = |e: std::io::Error| Error::ConnectionFailed {
        address: endpoint.to_string(),
        reason: e.to_string(),
    };

    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await.map_err(failed)?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = UnixStream::connect(path).await.map_err(failed)?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(Error::Config(
            "unix sockets are not supported on this platform".into(),
        )),
    }
}
