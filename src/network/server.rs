//! Controller Server
//!
//! Loopback controller speaking the replication wire protocol. Backs the
//! client and command tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::watch;

use super::{read_message, write_message, Connection};
use crate::config::Endpoint;
use crate::error::{Error, Result};
use crate::replication::Message;

/// Request handler: one response per request
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, Message> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Message> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    async fn accept(&self) -> std::io::Result<(Box<dyn Connection>, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (socket, addr) = listener.accept().await?;
                socket.set_nodelay(true)?;
                Ok((Box::new(socket), addr.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (socket, _) = listener.accept().await?;
                Ok((Box::new(socket), "unix".to_string()))
            }
        }
    }
}

/// Replication controller bound to an endpoint
pub struct ControllerServer {
    /// Bound endpoint (with the actual port for TCP port 0)
    endpoint: Endpoint,
    listener: Listener,
    handler: MessageHandler,
    /// Accepted connections since bind
    connections: Arc<AtomicUsize>,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl ControllerServer {
    /// Bind to an endpoint. A stale Unix socket file is replaced; any other
    /// file at the path is left alone and binding fails.
    pub async fn bind(endpoint: &Endpoint, handler: MessageHandler) -> Result<Self> {
        let (listener, endpoint) = match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                let local = listener.local_addr()?.to_string();
                (Listener::Tcp(listener), Endpoint::Tcp(local))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                remove_stale_socket(path)?;
                (Listener::Unix(UnixListener::bind(path)?), endpoint.clone())
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => {
                return Err(Error::Config("unix sockets are not supported on this platform".into()));
            }
        };

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            endpoint,
            listener,
            handler,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown,
        })
    }

    /// Endpoint clients should connect to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Accept connections until [`stop`](Self::stop) is called
    pub async fn start(&self) -> Result<()> {
        tracing::info!("Controller listening on {}", self.endpoint);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer)) => {
                            self.connections.fetch_add(1, Ordering::SeqCst);
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, &peer, handler).await {
                                    tracing::warn!("Connection error from {}: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Controller stopped");
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => Ok(std::fs::remove_file(path)?),
        Ok(_) => Err(Error::Config(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Serve one connection: a response for every request until EOF
async fn handle_connection(
    mut socket: Box<dyn Connection>,
    peer: &str,
    handler: MessageHandler,
) -> Result<()> {
    loop {
        match read_message(&mut socket).await {
            Ok(message) => {
                tracing::trace!("Received {} from {}", message.type_name(), peer);
                let response = handler(message).await;
                write_message(&mut socket, &response).await?;
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording backend for tests

    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::replication::{PluginInfo, ReplicationRequest, Status};

    /// Canned backend behaviour
    #[derive(Clone)]
    pub enum Behavior {
        /// Acknowledge every request
        Succeed,
        /// Answer every request with this status
        Fail(Status),
        /// Acknowledge after sleeping
        Delay(Duration),
        /// Not ready for this many probes, then ready
        ReadyAfter(usize),
    }

    /// Backend that records every replication request it sees
    #[derive(Clone)]
    pub struct RecordingBackend {
        pub requests: Arc<Mutex<Vec<ReplicationRequest>>>,
        pub probes: Arc<AtomicUsize>,
        behavior: Behavior,
    }

    impl RecordingBackend {
        pub fn new(behavior: Behavior) -> Self {
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                probes: Arc::new(AtomicUsize::new(0)),
                behavior,
            }
        }

        pub fn requests(&self) -> Vec<ReplicationRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn handler(&self) -> MessageHandler {
            let backend = self.clone();
            handler_fn(move |message| {
                let backend = backend.clone();
                async move { backend.respond(message).await }
            })
        }

        async fn respond(&self, message: Message) -> Message {
            match message {
                Message::Replication(request) => {
                    let operation = request.operation;
                    self.requests.lock().unwrap().push(request);
                    match &self.behavior {
                        Behavior::Fail(status) => Message::Error(status.clone()),
                        Behavior::Delay(delay) => {
                            tokio::time::sleep(*delay).await;
                            Message::ack(operation)
                        }
                        _ => Message::ack(operation),
                    }
                }
                Message::Probe => {
                    let seen = self.probes.fetch_add(1, Ordering::SeqCst);
                    match &self.behavior {
                        Behavior::Fail(status) => Message::Error(status.clone()),
                        Behavior::ReadyAfter(n) => Message::ProbeResponse { ready: seen >= *n },
                        _ => Message::ProbeResponse { ready: true },
                    }
                }
                Message::GetPluginInfo => Message::PluginInfo(PluginInfo {
                    name: "mock.csi.example.com".to_string(),
                    vendor_version: "1.0.0".to_string(),
                }),
                other => Message::Error(Status::new(
                    crate::replication::StatusCode::Unimplemented,
                    format!("unexpected {}", other.type_name()),
                )),
            }
        }
    }

    /// Bind a loopback TCP controller and run it in the background
    pub async fn spawn_tcp(backend: &RecordingBackend) -> Arc<ControllerServer> {
        let endpoint = Endpoint::Tcp("127.0.0.1:0".to_string());
        spawn(&endpoint, backend).await
    }

    pub async fn spawn(endpoint: &Endpoint, backend: &RecordingBackend) -> Arc<ControllerServer> {
        let server = Arc::new(ControllerServer::bind(endpoint, backend.handler()).await.unwrap());
        let running = server.clone();
        tokio::spawn(async move { running.start().await });
        server
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{spawn, Behavior, RecordingBackend};
    use super::*;
    use crate::replication::{Operation, ReplicationRequest};

    #[tokio::test]
    async fn test_bind_reports_actual_port() {
        let backend = RecordingBackend::new(Behavior::Succeed);
        let server = ControllerServer::bind(&Endpoint::Tcp("127.0.0.1:0".into()), backend.handler())
            .await
            .unwrap();

        match server.endpoint() {
            Endpoint::Tcp(addr) => assert!(!addr.ends_with(":0")),
            other => panic!("unexpected endpoint {:?}", other),
        }
        assert_eq!(server.connection_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Unix(dir.path().join("csi.sock"));
        let backend = RecordingBackend::new(Behavior::Succeed);
        let server = spawn(&endpoint, &backend).await;

        let mut stream = tokio::net::UnixStream::connect(dir.path().join("csi.sock")).await.unwrap();
        let request = ReplicationRequest::new(Operation::Resync, "vol-9");
        write_message(&mut stream, &Message::Replication(request.clone())).await.unwrap();
        let response = read_message(&mut stream).await.unwrap();

        assert_eq!(response, Message::ack(Operation::Resync));
        assert_eq!(backend.requests(), vec![request]);
        assert_eq!(server.connection_count(), 1);
        server.stop();
    }
    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_replaces_stale_socket_only() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("csi.sock");
        let endpoint = Endpoint::Unix(socket_path.clone());

        // Leftover socket from an earlier listener
        drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
        let backend = RecordingBackend::new(Behavior::Succeed);
        assert!(ControllerServer::bind(&endpoint, backend.handler()).await.is_ok());

        let file_path = dir.path().join("state.db");
        std::fs::write(&file_path, b"keep me").unwrap();
        let err = ControllerServer::bind(&Endpoint::Unix(file_path.clone()), backend.handler())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::Config(_)));
        assert_eq!(std::fs::read(&file_path).unwrap(), b"keep me");
    }
}
