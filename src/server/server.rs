//! TCP accept loop with a session registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::Error;
use crate::protocol::Protocol;
use crate::session::{Session, SessionId};
use crate::transport::drive;
use crate::transport::tcp::TcpConnection;

/// Reason sent to connections refused because the server is full.
pub const SERVER_FULL_REASON: &str = "server full";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 19999)),
            max_sessions: 1000,
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the maximum number of concurrent sessions.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

type Registry = Arc<RwLock<HashMap<SessionId, Session>>>;

/// Accepts TCP connections and runs one [`Session`] per connection.
///
/// Each accepted session gets its own driver task. A session leaves the
/// registry when its driver ends.
///
/// # Example
///
/// ```no_run
/// use strand::protocol::Protocol;
/// use strand::server::Server;
///
/// # async fn run() -> Result<(), strand::core::Error> {
/// let protocol = Protocol::builder().build();
/// let server = Server::bind("127.0.0.1:19999".parse().unwrap(), protocol).await?;
/// loop {
///     let session = server.accept().await?;
///     println!("session {} from {:?}", session.id(), session.remote_addr());
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    protocol: Arc<Protocol>,
    config: ServerConfig,
    sessions: Registry,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind to an address with default limits.
    pub async fn bind(addr: SocketAddr, protocol: Arc<Protocol>) -> Result<Self, Error> {
        let config = ServerBuilder::new().bind_addr(addr).build();
        Self::with_config(config, protocol).await
    }

    /// Bind using a full configuration.
    pub async fn with_config(config: ServerConfig, protocol: Arc<Protocol>) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "server listening");
        Ok(Self {
            listener,
            protocol,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            local_addr,
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Protocol spoken by accepted sessions.
    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    /// Wait for the next connection and return its open session.
    ///
    /// Connections arriving while the server is full are told so with a
    /// Disconnect packet and closed without ever opening a session, so the
    /// protocol's lifecycle listener does not see them. The call keeps
    /// waiting.
    pub async fn accept(&self) -> Result<Session, Error> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let (connection, source) =
                TcpConnection::split_with_limit(stream, self.protocol.config().max_frame_size);
            let session = Session::new(Arc::clone(&self.protocol));

            let full = {
                let mut sessions = self.sessions.write().await;
                let full = sessions.len() >= self.config.max_sessions;
                if !full {
                    sessions.insert(session.id(), session.clone());
                }
                full
            };

            if full {
                debug!(peer = %peer, max = self.config.max_sessions, "server full");
                session.refuse(Arc::new(connection), SERVER_FULL_REASON)?;
                tokio::spawn(drive(session, source));
                continue;
            }
            session.open(Arc::new(connection))?;

            let sessions = Arc::clone(&self.sessions);
            let driven = session.clone();
            tokio::spawn(async move {
                let id = driven.id();
                drive(driven, source).await;
                sessions.write().await.remove(&id);
            });
            debug!(session = %session.id(), peer = %peer, "session accepted");
            return Ok(session);
        }
    }

    /// Get the number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of the live sessions.
    pub async fn sessions(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Look up a live session.
    pub async fn session(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Close every live session with `reason`.
    ///
    /// Sessions leave the registry as their drivers observe the teardown.
    pub async fn shutdown(&self, reason: &str) {
        let sessions = self.sessions().await;
        info!(count = sessions.len(), reason, "server shutting down");
        for session in sessions {
            session.close(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::client::Client;
    use crate::protocol::SessionListener;
    use crate::session::SessionState;

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_accept_and_registry() {
        let protocol = Protocol::builder().build();
        let server = Server::bind(SocketAddr::from(([127, 0, 0, 1], 0)), protocol.clone())
            .await
            .unwrap();

        let (client, accepted) = tokio::join!(
            Client::connect(server.local_addr(), protocol),
            server.accept()
        );
        let client = client.unwrap();
        let accepted = accepted.unwrap();
        assert!(accepted.is_open());
        assert_eq!(server.session_count().await, 1);
        assert_eq!(server.session(accepted.id()).await, Some(accepted.clone()));

        client.close("bye");
        wait_for(|| accepted.state() == SessionState::Closed).await;
        assert_eq!(accepted.disconnect_reason().as_deref(), Some("bye"));
        for _ in 0..200 {
            if server.session_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let protocol = Protocol::builder().build();
        let server = Server::bind(SocketAddr::from(([127, 0, 0, 1], 0)), protocol.clone())
            .await
            .unwrap();
        let (client, accepted) = tokio::join!(
            Client::connect(server.local_addr(), protocol),
            server.accept()
        );
        let client = client.unwrap();
        accepted.unwrap();

        server.shutdown("maintenance").await;
        wait_for(|| client.state() == SessionState::Closed).await;
        assert_eq!(client.disconnect_reason().as_deref(), Some("maintenance"));
    }

    #[derive(Default)]
    struct Counts {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    impl SessionListener for Counts {
        fn on_opened(&self, _session: &Session) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }

        fn on_closed(&self, _session: &Session) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_full_server_refuses() {
        let counts = Arc::new(Counts::default());
        let server_protocol = Protocol::builder().lifecycle(Arc::clone(&counts)).build();
        let protocol = Protocol::builder().build();
        let config = ServerBuilder::new()
            .bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .max_sessions(1)
            .build();
        let server = Server::with_config(config, server_protocol).await.unwrap();
        let addr = server.local_addr();

        let (first, accepted) = tokio::join!(Client::connect(addr, protocol.clone()), server.accept());
        let _first = first.unwrap();
        let _accepted = accepted.unwrap();

        let second = Client::connect(addr, protocol).await.unwrap();
        // The refused connection is handled inside accept(), which then keeps
        // waiting; bound it with a timeout.
        let _ = tokio::time::timeout(Duration::from_millis(200), server.accept()).await;
        wait_for(|| second.state() == SessionState::Closed).await;
        assert_eq!(second.disconnect_reason().as_deref(), Some(SERVER_FULL_REASON));
        assert_eq!(server.session_count().await, 1);
        // Only the accepted session reached the application.
        assert_eq!(counts.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closed.load(Ordering::SeqCst), 0);
    }
}
