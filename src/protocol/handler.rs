//! Packet handlers and session lifecycle callbacks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::core::{Delivery, Packet, PacketId, ProtocolError, RegistrationError};
use crate::session::Session;

/// Application callback bound to one packet id.
pub type Handler = Box<dyn Fn(&Session, Box<dyn Packet>, Delivery) + Send + Sync>;

/// Packet id → handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<PacketId, Handler>,
}

impl HandlerRegistry {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to an id.
    ///
    /// Reserved ids are handled by the session itself and cannot be bound.
    pub fn insert<F>(&mut self, id: PacketId, handler: F) -> Result<(), RegistrationError>
    where
        F: Fn(&Session, Box<dyn Packet>, Delivery) + Send + Sync + 'static,
    {
        if id.is_reserved() {
            return Err(RegistrationError::ReservedPacketId(id));
        }
        if self.handlers.contains_key(&id) {
            return Err(RegistrationError::DuplicateHandler(id));
        }
        self.handlers.insert(id, Box::new(handler));
        Ok(())
    }

    /// Bind a handler receiving the packet as its concrete type.
    ///
    /// A packet of any other type arriving under `id` is logged and dropped.
    pub fn insert_typed<P, F>(&mut self, id: PacketId, handler: F) -> Result<(), RegistrationError>
    where
        P: Packet,
        F: Fn(&Session, P, Delivery) + Send + Sync + 'static,
    {
        self.insert(id, move |session, packet: Box<dyn Packet>, delivery| {
            if !packet.is::<P>() {
                debug!(
                    session = %session.id(),
                    packet_id = %id,
                    expected = std::any::type_name::<P>(),
                    actual = (*packet).type_name(),
                    "handler type mismatch, packet dropped"
                );
                return;
            }
            if let Some(packet) = packet.downcast::<P>() {
                handler(session, *packet, delivery);
            }
        })
    }

    /// Handler bound to `id`.
    pub fn get(&self, id: PacketId) -> Option<&Handler> {
        self.handlers.get(&id)
    }

    /// Check if `id` has a handler.
    pub fn contains(&self, id: PacketId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Number of bound handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is bound.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().map(|id| id.get()).collect();
        ids.sort_unstable();
        f.debug_struct("HandlerRegistry").field("ids", &ids).finish()
    }
}

/// Session lifecycle callbacks.
///
/// Every method defaults to a no-op. Callbacks run without internal locks
/// held, so they may send, close or inspect the session.
pub trait SessionListener: Send + Sync {
    /// The session reached `Open`.
    fn on_opened(&self, _session: &Session) {}

    /// The session reached `Closed`. Runs exactly once per session.
    fn on_closed(&self, _session: &Session) {}

    /// The session failed. Runs right before [`on_closed`](Self::on_closed).
    fn on_exception(&self, _session: &Session, _cause: &ProtocolError) {}
}

/// Listener that ignores every event.
impl SessionListener for () {}

impl<L: SessionListener + ?Sized> SessionListener for Arc<L> {
    fn on_opened(&self, session: &Session) {
        (**self).on_opened(session);
    }

    fn on_closed(&self, session: &Session) {
        (**self).on_closed(session);
    }

    fn on_exception(&self, session: &Session, cause: &ProtocolError) {
        (**self).on_exception(session, cause);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::Channel;
    use crate::protocol::Protocol;

    #[derive(Debug)]
    struct Move(i32);

    #[test]
    fn test_reserved_and_duplicate() {
        let mut handlers = HandlerRegistry::new();
        handlers.insert(PacketId::new(1), |_, _, _| {}).unwrap();
        assert_eq!(
            handlers.insert(PacketId::new(1), |_, _, _| {}),
            Err(RegistrationError::DuplicateHandler(PacketId::new(1)))
        );
        assert_eq!(
            handlers.insert(PacketId::new(0xFFFF_FFFD), |_, _, _| {}),
            Err(RegistrationError::ReservedPacketId(PacketId::new(0xFFFF_FFFD)))
        );
        assert!(handlers.contains(PacketId::new(1)));
        assert_eq!(handlers.len(), 1);
    }

    #[test]
    fn test_typed_handler() {
        let total = Arc::new(AtomicUsize::new(0));
        let mut handlers = HandlerRegistry::new();
        let seen = Arc::clone(&total);
        handlers
            .insert_typed(PacketId::new(4), move |_, m: Move, delivery| {
                assert_eq!(delivery.channel, Channel::new(2));
                seen.fetch_add(m.0 as usize, Ordering::SeqCst);
            })
            .unwrap();

        let session = Session::new(Protocol::builder().build());
        let delivery = Delivery::new(Channel::new(2), Default::default());
        let handler = handlers.get(PacketId::new(4)).unwrap();
        handler(&session, Box::new(Move(5)), delivery);
        // Wrong type is dropped.
        handler(&session, Box::new(7u8), delivery);
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }
}
