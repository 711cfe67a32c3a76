//! Listener traits and the values flowing through them.

use std::fmt;

use crate::core::{Channel, Delivery, Packet, ProtocolError, Reliability};
use crate::session::Session;

/// A message travelling through a listener chain.
///
/// Frames start out as [`Message::Bytes`]. A listener may decode early or
/// substitute a packet, which the terminal stage then encodes or dispatches
/// directly.
#[derive(Debug)]
pub enum Message {
    /// Encoded single-packet frame.
    Bytes(Vec<u8>),
    /// Already decoded packet.
    Packet(Box<dyn Packet>),
}

impl Message {
    /// Borrow the frame bytes, if this is a byte message.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Message::Bytes(bytes) => Some(bytes),
            Message::Packet(_) => None,
        }
    }

    /// Check if this message carries a decoded packet.
    pub fn is_packet(&self) -> bool {
        matches!(self, Message::Packet(_))
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message::Bytes(bytes)
    }
}

impl From<Box<dyn Packet>> for Message {
    fn from(packet: Box<dyn Packet>) -> Self {
        Message::Packet(packet)
    }
}

/// What a listener sees besides the message itself.
#[derive(Clone, Copy)]
pub struct ListenerContext<'a> {
    session: &'a Session,
    delivery: Delivery,
}

impl<'a> ListenerContext<'a> {
    /// Create a context for one message.
    pub fn new(session: &'a Session, delivery: Delivery) -> Self {
        Self { session, delivery }
    }

    /// Session the message belongs to.
    pub fn session(&self) -> &'a Session {
        self.session
    }

    /// Channel and reliability of the message.
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Channel of the message.
    pub fn channel(&self) -> Channel {
        self.delivery.channel
    }

    /// Reliability of the message.
    pub fn reliability(&self) -> Reliability {
        self.delivery.reliability
    }
}

impl fmt::Debug for ListenerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerContext")
            .field("session", &self.session.id())
            .field("delivery", &self.delivery)
            .finish()
    }
}

/// A stage of the inbound chain.
///
/// Returning `Ok(None)` consumes the message: later listeners and codec
/// dispatch never see it. Returning an error fails the session.
pub trait InboundListener: Send + Sync {
    /// Process one received message.
    fn on_received(
        &self,
        ctx: &ListenerContext<'_>,
        message: Message,
    ) -> Result<Option<Message>, ProtocolError>;
}

/// A stage of the outbound chain.
///
/// Every output pushed to `out` is handed to the next stage in turn. Pushing
/// nothing drops the message.
pub trait OutboundListener: Send + Sync {
    /// Process one message about to be sent.
    fn on_sending(
        &self,
        ctx: &ListenerContext<'_>,
        message: Message,
        out: &mut OutputCollector,
    ) -> Result<(), ProtocolError>;
}

/// Messages emitted by an outbound stage.
#[derive(Debug, Default)]
pub struct OutputCollector {
    messages: Vec<Message>,
}

impl OutputCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a message.
    pub fn push(&mut self, message: impl Into<Message>) {
        self.messages.push(message.into());
    }

    /// Number of collected messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consume the collector.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl Extend<Message> for OutputCollector {
    fn extend<T: IntoIterator<Item = Message>>(&mut self, iter: T) {
        self.messages.extend(iter);
    }
}

impl IntoIterator for OutputCollector {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
