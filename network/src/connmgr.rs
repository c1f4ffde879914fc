//! The connection manager: TCP accept loop and outbound dialing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::NetworkError;

/// Dial timeout for outbound connections.
const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Handler invoked for each connection (accepted or dialed).
pub type ConnHandler = Arc<dyn Fn(TcpStream, SocketAddr) + Send + Sync>;

/// Connection manager configuration.
pub struct ConnMgrConfig {
    /// Listen port for inbound connections.
    pub port: u16,
    /// Invoked for every accepted inbound connection.
    pub on_accept: ConnHandler,
    /// Invoked for every successful outbound dial.
    pub on_conn: ConnHandler,
}

/// Accepts inbound peers and dials outbound ones.
pub struct ConnectionManager {
    config: ConnMgrConfig,
}

impl ConnectionManager {
    pub fn new(config: ConnMgrConfig) -> Self {
        Self { config }
    }

    /// Bind the listen port and spawn the accept loop. Each accepted
    /// connection is handed to `on_accept` in its own task.
    pub async fn listen(&self) -> Result<tokio::task::JoinHandle<()>, NetworkError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("bind failed: {e}")))?;
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "listening for peers");

        let on_accept = Arc::clone(&self.config.on_accept);
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        tracing::debug!(peer = %addr, "accepted connection");
                        let handler = Arc::clone(&on_accept);
                        tokio::spawn(async move {
                            handler(stream, addr);
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "error accepting connection request");
                    }
                }
            }
        }))
    }

    /// Dial `addr` with a one-second timeout and hand the stream to
    /// `on_conn`.
    pub async fn connect(&self, addr: &str) -> Result<(), NetworkError> {
        let stream = self.dial(addr).await?;
        let peer_addr = stream.peer_addr()?;
        let handler = Arc::clone(&self.config.on_conn);
        tokio::spawn(async move {
            handler(stream, peer_addr);
        });
        Ok(())
    }

    /// Dial `addr`, timing out after one second.
    pub async fn dial(&self, addr: &str) -> Result<TcpStream, NetworkError> {
        match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(NetworkError::ConnectionFailed(format!("{addr}: {e}"))),
            Err(_) => Err(NetworkError::DialTimeout(addr.to_string())),
        }
    }
}
