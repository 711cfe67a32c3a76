//! Session identity, state machine and lifecycle.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard, ReentrantMutex};
use tracing::{debug, warn};

use super::pending::{PendingReplies, ReplyHandle};
use crate::core::{Packet, ProtocolError, SessionError, TransportError};
use crate::encapsulation::Reassembler;
use crate::protocol::Protocol;
use crate::transport::UnderlyingConnection;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, no connection attached yet.
    Connecting,
    /// Connection attached, traffic flows.
    Open,
    /// Teardown requested, waiting for the transport.
    Closing,
    /// Terminal state.
    Closed,
}

pub(super) struct Inner {
    pub(super) state: SessionState,
    pub(super) connection: Option<Arc<dyn UnderlyingConnection>>,
    pub(super) remote_addr: Option<SocketAddr>,
    pub(super) disconnect_reason: Option<String>,
    pub(super) reassembler: Reassembler,
    pub(super) pending: PendingReplies,
}

pub(super) struct Shared {
    pub(super) id: SessionId,
    pub(super) protocol: Arc<Protocol>,
    pub(super) inner: Mutex<Inner>,
    /// Keeps every frame of one send contiguous on the connection.
    pub(super) send_lock: ReentrantMutex<()>,
    attachment: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

/// One logical connection between two endpoints.
///
/// A cheap handle: clones share the same session. Callbacks into
/// application code never run while internal locks are held, so handlers and
/// listeners may call back into the session freely.
#[derive(Clone)]
pub struct Session {
    pub(super) shared: Arc<Shared>,
}

impl Session {
    /// Create a session in the [`SessionState::Connecting`] state.
    pub fn new(protocol: Arc<Protocol>) -> Self {
        let reassembler = Reassembler::new(protocol.config().max_message_size);
        Self {
            shared: Arc::new(Shared {
                id: SessionId::next(),
                protocol,
                inner: Mutex::new(Inner {
                    state: SessionState::Connecting,
                    connection: None,
                    remote_addr: None,
                    disconnect_reason: None,
                    reassembler,
                    pending: PendingReplies::new(),
                }),
                send_lock: ReentrantMutex::new(()),
                attachment: Mutex::new(None),
            }),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Protocol this session speaks.
    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.shared.protocol
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Check if the session is open.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Why the session is closing or closed, once known.
    ///
    /// Set by the local `close`/`fail` or by a Disconnect packet from the
    /// peer, whichever comes first.
    pub fn disconnect_reason(&self) -> Option<String> {
        self.lock().disconnect_reason.clone()
    }

    /// Address of the remote endpoint, if the connection has one.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.lock().remote_addr
    }

    /// Attach a connection: `Connecting → Open`, then `on_opened`.
    pub fn open(&self, connection: Arc<dyn UnderlyingConnection>) -> Result<(), SessionError> {
        {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Connecting => {}
                SessionState::Open | SessionState::Closing => {
                    return Err(SessionError::AlreadyOpened);
                }
                SessionState::Closed => {
                    return Err(SessionError::Closed {
                        reason: inner.disconnect_reason.clone().unwrap_or_default(),
                    });
                }
            }
            inner.remote_addr = connection.remote_addr();
            inner.connection = Some(connection);
            inner.state = SessionState::Open;
        }

        debug!(session = %self.id(), remote = ?self.remote_addr(), "session opened");
        self.shared.protocol.lifecycle().on_opened(self);
        Ok(())
    }

    /// Turn a connection away without opening the session.
    ///
    /// Announces `reason` with a Disconnect packet, asks the transport to
    /// tear down and leaves the session `Closed`. No lifecycle callback runs.
    pub fn refuse(
        &self,
        connection: Arc<dyn UnderlyingConnection>,
        reason: impl Into<String>,
    ) -> Result<(), SessionError> {
        let reason = reason.into();
        {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Connecting => {}
                SessionState::Open | SessionState::Closing => {
                    return Err(SessionError::AlreadyOpened);
                }
                SessionState::Closed => {
                    return Err(SessionError::Closed {
                        reason: inner.disconnect_reason.clone().unwrap_or_default(),
                    });
                }
            }
            inner.remote_addr = connection.remote_addr();
            inner.disconnect_reason = Some(reason.clone());
            inner.state = SessionState::Closed;
        }

        debug!(session = %self.id(), remote = ?self.remote_addr(), reason = %reason, "connection refused");
        if connection.is_connected() {
            self.send_disconnect(connection.as_ref(), &reason);
        }
        connection.disconnect(&reason);
        Ok(())
    }

    /// Close gracefully.
    ///
    /// The first call moves to `Closing`, announces `reason` to the peer with
    /// a Disconnect packet when the connection is still writable, then asks
    /// the transport to tear down. The session reaches `Closed` once the
    /// transport confirms. Later calls do nothing.
    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let connection = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Closing | SessionState::Closed => return,
                SessionState::Connecting => {
                    inner.disconnect_reason = Some(reason);
                    drop(inner);
                    self.finish(None);
                    return;
                }
                SessionState::Open => {}
            }
            inner.state = SessionState::Closing;
            inner.disconnect_reason = Some(reason.clone());
            inner.connection.clone()
        };

        debug!(session = %self.id(), reason = %reason, "closing session");
        if let Some(connection) = connection {
            if connection.is_connected() {
                self.send_disconnect(connection.as_ref(), &reason);
            }
            connection.disconnect(&reason);
        }
    }

    /// Tear down after a fatal error.
    ///
    /// Skips the graceful handshake: a best effort Disconnect packet is sent
    /// only when the cause is not a transport failure and the connection is
    /// still writable. Pending replies fail with `cause`, then `on_exception`
    /// and `on_closed` run.
    pub fn fail(&self, cause: ProtocolError) {
        let (connection, was_open, reason) = {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            let was_open = inner.state == SessionState::Open;
            inner.state = SessionState::Closing;
            let reason = inner
                .disconnect_reason
                .get_or_insert_with(|| cause.to_string())
                .clone();
            (inner.connection.clone(), was_open, reason)
        };

        warn!(session = %self.id(), error = %cause, "session failed");
        if let Some(connection) = connection {
            if was_open && !cause.is_transport() && connection.is_connected() {
                self.send_disconnect(connection.as_ref(), &reason);
            }
            connection.disconnect(&reason);
        }
        self.finish(Some(cause));
    }

    /// The transport reports the connection is gone.
    ///
    /// Completes a pending close, or closes the session if the peer vanished
    /// without a Disconnect packet.
    pub fn on_transport_closed(&self) {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            inner
                .disconnect_reason
                .get_or_insert_with(|| "connection closed".to_string());
        }
        self.finish(None);
    }

    /// The transport reports an I/O failure.
    pub fn on_transport_error(&self, cause: TransportError) {
        self.fail(ProtocolError::Transport(cause));
    }

    /// A Disconnect packet arrived: record the reason and tear down without
    /// answering.
    pub(super) fn on_disconnect_packet(&self, reason: String) {
        let connection = {
            let mut inner = self.lock();
            if inner.state != SessionState::Open {
                return;
            }
            inner.state = SessionState::Closing;
            inner.disconnect_reason = Some(reason.clone());
            inner.connection.clone()
        };

        debug!(session = %self.id(), reason = %reason, "peer disconnected");
        if let Some(connection) = connection {
            connection.disconnect(&reason);
        }
    }

    /// Reach `Closed`: release every resource exactly once, then notify.
    fn finish(&self, cause: Option<ProtocolError>) {
        let (connection, reason, released) = {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            let reason = inner.disconnect_reason.clone().unwrap_or_default();
            let error = match &cause {
                Some(cause) => SessionError::Protocol(cause.clone()),
                None => SessionError::Closed {
                    reason: reason.clone(),
                },
            };
            let released = inner.pending.fail_all(&error);
            inner.reassembler.clear();
            inner.state = SessionState::Closed;
            (inner.connection.take(), reason, released)
        };

        if let Some(connection) = connection {
            connection.disconnect(&reason);
        }
        debug!(session = %self.id(), reason = %reason, pending = released, "session closed");

        let lifecycle = self.shared.protocol.lifecycle();
        if let Some(cause) = &cause {
            lifecycle.on_exception(self, cause);
        }
        lifecycle.on_closed(self);
    }

    /// Register a waiter for a correlated reply.
    ///
    /// On a closed session the handle is failed right away.
    pub fn create_pending(&self) -> (u64, ReplyHandle) {
        let mut inner = self.lock();
        let (id, handle) = inner.pending.create();
        if inner.state == SessionState::Closed {
            let reason = inner.disconnect_reason.clone().unwrap_or_default();
            inner.pending.reject(id, SessionError::Closed { reason });
        }
        (id, handle)
    }

    /// Complete a waiter. Returns `false` if it is not outstanding.
    pub fn resolve_pending(&self, id: u64, packet: Box<dyn Packet>) -> bool {
        self.lock().pending.resolve(id, packet)
    }

    /// Fail a waiter. Returns `false` if it is not outstanding.
    pub fn reject_pending(&self, id: u64, error: SessionError) -> bool {
        self.lock().pending.reject(id, error)
    }

    /// Number of outstanding waiters.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Store application state on the session, replacing any previous value.
    pub fn set_attachment<T: Any + Send + Sync>(&self, value: T) {
        *self.shared.attachment.lock() = Some(Box::new(value));
    }

    /// Run `f` on the attachment if it is a `T`.
    ///
    /// `f` must not touch the attachment of this session again.
    pub fn with_attachment<T: Any + Send + Sync, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut attachment = self.shared.attachment.lock();
        let value: &mut (dyn Any + Send + Sync) = attachment.as_deref_mut()?;
        value.downcast_mut::<T>().map(f)
    }

    /// Remove the attachment if it is a `T`.
    pub fn take_attachment<T: Any + Send + Sync>(&self) -> Option<T> {
        let mut attachment = self.shared.attachment.lock();
        if !attachment.as_deref().is_some_and(|value| value.is::<T>()) {
            return None;
        }
        let value = attachment.take()?;
        value.downcast::<T>().ok().map(|value| *value)
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("state", &inner.state)
            .field("remote_addr", &inner.remote_addr)
            .field("disconnect_reason", &inner.disconnect_reason)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DecodeError, Delivery, DISCONNECT_PACKET_ID};
    use crate::protocol::SessionListener;
    use crate::session::DisconnectPacket;
    use crate::tests::RecordingConnection;
    use crate::transport::WireFrame;

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl SessionListener for Events {
        fn on_opened(&self, _session: &Session) {
            self.0.lock().push("opened".into());
        }

        fn on_closed(&self, session: &Session) {
            assert_eq!(session.state(), SessionState::Closed);
            self.0.lock().push("closed".into());
        }

        fn on_exception(&self, _session: &Session, cause: &ProtocolError) {
            self.0.lock().push(format!("exception: {cause}"));
        }
    }

    fn session_with_events() -> (Session, Arc<Events>) {
        let events = Arc::new(Events::default());
        let protocol = Protocol::builder().lifecycle(Arc::clone(&events)).build();
        (Session::new(protocol), events)
    }

    fn disconnect_reasons(connection: &RecordingConnection, session: &Session) -> Vec<String> {
        connection
            .frames
            .lock()
            .iter()
            .filter_map(|frame| {
                let decoded = session.protocol().codecs().decode(&frame.payload).ok()?;
                (decoded.id == DISCONNECT_PACKET_ID)
                    .then(|| decoded.packet.downcast_ref::<DisconnectPacket>().map(|d| d.reason.clone()))
                    .flatten()
            })
            .collect()
    }

    #[test]
    fn test_ids_are_unique() {
        let protocol = Protocol::builder().build();
        let a = Session::new(protocol.clone());
        let b = Session::new(protocol);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().to_string().len(), 16);
    }

    #[test]
    fn test_open_twice() {
        let (session, events) = session_with_events();
        session.open(Arc::new(RecordingConnection::default())).unwrap();
        assert!(session.is_open());
        assert!(matches!(
            session.open(Arc::new(RecordingConnection::default())),
            Err(SessionError::AlreadyOpened)
        ));
        assert_eq!(*events.0.lock(), vec!["opened".to_string()]);
    }

    #[test]
    fn test_refuse_skips_lifecycle() {
        let (session, events) = session_with_events();
        let connection = Arc::new(RecordingConnection::default());
        session.refuse(connection.clone(), "server full").unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.disconnect_reason().as_deref(), Some("server full"));
        assert_eq!(disconnect_reasons(&connection, &session), vec!["server full"]);
        assert_eq!(*connection.disconnects.lock(), vec!["server full".to_string()]);
        assert!(events.0.lock().is_empty());

        session.on_transport_closed();
        assert!(events.0.lock().is_empty());
        assert!(matches!(
            session.open(Arc::new(RecordingConnection::default())),
            Err(SessionError::Closed { reason }) if reason == "server full"
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, events) = session_with_events();
        let connection = Arc::new(RecordingConnection::default());
        session.open(connection.clone()).unwrap();
        let (_, first) = session.create_pending();
        let (_, second) = session.create_pending();

        session.close("idle timeout");
        session.close("again");
        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(disconnect_reasons(&connection, &session), vec!["idle timeout"]);
        assert_eq!(*connection.disconnects.lock(), vec!["idle timeout".to_string()]);

        session.on_transport_closed();
        session.on_transport_closed();
        session.close("after");
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.disconnect_reason().as_deref(), Some("idle timeout"));
        assert_eq!(session.pending_count(), 0);

        for handle in [first, second] {
            assert!(matches!(handle.await, Err(SessionError::Closed { reason }) if reason == "idle timeout"));
        }
        assert_eq!(*events.0.lock(), vec!["opened".to_string(), "closed".to_string()]);
        assert_eq!(disconnect_reasons(&connection, &session).len(), 1);
    }

    #[test]
    fn test_close_before_open() {
        let (session, events) = session_with_events();
        session.close("never mind");
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.open(Arc::new(RecordingConnection::default())),
            Err(SessionError::Closed { reason }) if reason == "never mind"
        ));
        assert_eq!(*events.0.lock(), vec!["closed".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_protocol_error() {
        let (session, events) = session_with_events();
        let connection = Arc::new(RecordingConnection::default());
        session.open(connection.clone()).unwrap();
        let (_, handle) = session.create_pending();

        let cause = ProtocolError::malformed(None, DecodeError::InvalidBool(9));
        session.fail(cause.clone());
        session.fail(cause);

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(disconnect_reasons(&connection, &session).len(), 1);
        assert!(matches!(
            handle.await,
            Err(SessionError::Protocol(ProtocolError::MalformedPacket { .. }))
        ));

        let events = events.0.lock();
        assert_eq!(events.len(), 3);
        assert!(events[1].starts_with("exception: malformed packet"));
        assert_eq!(events[2], "closed");
    }

    #[test]
    fn test_transport_error_skips_disconnect_packet() {
        let (session, events) = session_with_events();
        let connection = Arc::new(RecordingConnection::default());
        session.open(connection.clone()).unwrap();

        session.on_transport_error(TransportError::ConnectionClosed);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(connection.frames.lock().is_empty());
        assert_eq!(connection.disconnects.lock().len(), 1);
        assert!(events.0.lock()[1].starts_with("exception: transport error"));
    }

    #[test]
    fn test_disconnect_packet_is_not_answered() {
        let (session, _events) = session_with_events();
        let connection = Arc::new(RecordingConnection::default());
        session.open(connection.clone()).unwrap();

        session.on_disconnect_packet("server restart".into());
        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(session.disconnect_reason().as_deref(), Some("server restart"));
        assert!(connection.frames.lock().is_empty());
        assert_eq!(*connection.disconnects.lock(), vec!["server restart".to_string()]);

        // A local close racing the peer's must not announce anything either.
        session.close("local");
        assert!(connection.frames.lock().is_empty());

        session.on_transport_closed();
        assert_eq!(session.disconnect_reason().as_deref(), Some("server restart"));
    }

    #[tokio::test]
    async fn test_pending_after_close() {
        let (session, _events) = session_with_events();
        session.close("gone");
        let (id, handle) = session.create_pending();
        assert!(!session.resolve_pending(id, Box::new(7u32)));
        assert!(matches!(handle.await, Err(SessionError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_resolve_pending() {
        let (session, _events) = session_with_events();
        session.open(Arc::new(RecordingConnection::default())).unwrap();
        let (id, handle) = session.create_pending();
        assert!(session.resolve_pending(id, Box::new(7u32)));
        assert_eq!(handle.await.unwrap().downcast_ref::<u32>(), Some(&7));
    }

    #[test]
    fn test_attachment() {
        let (session, _events) = session_with_events();
        assert!(session.with_attachment(|n: &mut u32| *n).is_none());

        session.set_attachment(41u32);
        assert_eq!(session.with_attachment(|n: &mut u32| {
            *n += 1;
            *n
        }), Some(42));
        assert!(session.take_attachment::<String>().is_none());
        assert_eq!(session.take_attachment::<u32>(), Some(42));
        assert!(session.take_attachment::<u32>().is_none());
    }

    #[test]
    fn test_frames_dropped_unless_open() {
        let (session, _events) = session_with_events();
        session.on_frame_received(WireFrame::new(Delivery::default(), vec![0xff]));
        assert_eq!(session.state(), SessionState::Connecting);
    }
}
