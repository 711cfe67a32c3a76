//! TCP connect.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::core::Error;
use crate::protocol::Protocol;
use crate::session::Session;
use crate::transport::drive;
use crate::transport::tcp::TcpConnection;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to connect to.
    pub server_addr: SocketAddr,

    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 19999)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server address.
    pub fn server_addr(mut self, addr: SocketAddr) -> Self {
        self.config.server_addr = addr;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Opens client sessions over TCP.
#[derive(Debug)]
pub struct Client;

impl Client {
    /// Connect with the default timeout.
    ///
    /// The returned session is open and its driver is running.
    pub async fn connect(addr: SocketAddr, protocol: Arc<Protocol>) -> Result<Session, Error> {
        let config = ClientBuilder::new().server_addr(addr).build();
        Self::connect_with(config, protocol).await
    }

    /// Connect using a full configuration.
    pub async fn connect_with(config: ClientConfig, protocol: Arc<Protocol>) -> Result<Session, Error> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.server_addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

        let (connection, source) =
            TcpConnection::split_with_limit(stream, protocol.config().max_frame_size);
        let session = Session::new(protocol);
        session.open(Arc::new(connection))?;
        tokio::spawn(drive(session.clone(), source));
        debug!(session = %session.id(), server = %config.server_addr, "connected");
        Ok(session)
    }
}
