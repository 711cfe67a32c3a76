//! Named listener chains and the two-direction pipeline.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::listener::{InboundListener, ListenerContext, Message, OutboundListener, OutputCollector};
use crate::core::{ProtocolError, RegistrationError};

/// Where a new listener goes in its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// Run before every existing listener.
    First,
    /// Run after every existing listener.
    Last,
    /// Run right before the named listener.
    Before(String),
    /// Run right after the named listener.
    After(String),
}

impl Position {
    /// Shorthand for [`Position::Before`].
    pub fn before(name: impl Into<String>) -> Self {
        Position::Before(name.into())
    }

    /// Shorthand for [`Position::After`].
    pub fn after(name: impl Into<String>) -> Self {
        Position::After(name.into())
    }
}

/// An ordered list of uniquely named listeners.
pub struct ListenerChain<L: ?Sized> {
    entries: Vec<(String, Arc<L>)>,
}

impl<L: ?Sized> Default for ListenerChain<L> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<L: ?Sized> ListenerChain<L> {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a listener under a unique name.
    pub fn add_listener(
        &mut self,
        name: impl Into<String>,
        listener: Arc<L>,
        position: Position,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        if self.index_of(&name).is_some() {
            return Err(RegistrationError::DuplicateListener(name));
        }

        let index = match position {
            Position::First => 0,
            Position::Last => self.entries.len(),
            Position::Before(anchor) => self
                .index_of(&anchor)
                .ok_or(RegistrationError::UnknownListener(anchor))?,
            Position::After(anchor) => {
                self.index_of(&anchor)
                    .ok_or(RegistrationError::UnknownListener(anchor))?
                    + 1
            }
        };
        self.entries.insert(index, (name, listener));
        Ok(())
    }

    /// Remove a listener by name.
    pub fn remove_listener(&mut self, name: &str) -> Option<Arc<L>> {
        let index = self.index_of(name)?;
        Some(self.entries.remove(index).1)
    }

    /// Look up a listener by name.
    pub fn get(&self, name: &str) -> Option<&Arc<L>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, listener)| listener)
    }

    /// Listener names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Listeners with their names, in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &L)> {
        self.entries
            .iter()
            .map(|(name, listener)| (name.as_str(), listener.as_ref()))
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }
}

impl<L: ?Sized> fmt::Debug for ListenerChain<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Inbound and outbound chains of one protocol.
#[derive(Debug, Default)]
pub struct Pipeline {
    inbound: ListenerChain<dyn InboundListener>,
    outbound: ListenerChain<dyn OutboundListener>,
}

impl Pipeline {
    /// Create a pipeline with empty chains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inbound chain.
    pub fn inbound(&self) -> &ListenerChain<dyn InboundListener> {
        &self.inbound
    }

    /// Outbound chain.
    pub fn outbound(&self) -> &ListenerChain<dyn OutboundListener> {
        &self.outbound
    }

    /// Mutable inbound chain.
    pub fn inbound_mut(&mut self) -> &mut ListenerChain<dyn InboundListener> {
        &mut self.inbound
    }

    /// Mutable outbound chain.
    pub fn outbound_mut(&mut self) -> &mut ListenerChain<dyn OutboundListener> {
        &mut self.outbound
    }

    /// Run a received message through the inbound chain.
    ///
    /// `terminal` receives the message only if every listener passed it on.
    pub fn fire_received<F>(
        &self,
        ctx: &ListenerContext<'_>,
        message: Message,
        terminal: F,
    ) -> Result<(), ProtocolError>
    where
        F: FnOnce(Message) -> Result<(), ProtocolError>,
    {
        let mut message = message;
        for (name, listener) in self.inbound.iter() {
            match listener.on_received(ctx, message)? {
                Some(next) => message = next,
                None => {
                    trace!(session = %ctx.session().id(), listener = name, "message consumed");
                    return Ok(());
                }
            }
        }
        terminal(message)
    }

    /// Run a message through the outbound chain, collecting what reaches the
    /// end into `out`.
    pub fn fire_sending(
        &self,
        ctx: &ListenerContext<'_>,
        message: Message,
        out: &mut OutputCollector,
    ) -> Result<(), ProtocolError> {
        if self.outbound.is_empty() {
            out.push(message);
            return Ok(());
        }

        let mut current = vec![message];
        for (_, listener) in self.outbound.iter() {
            let mut next = OutputCollector::new();
            for message in current {
                listener.on_sending(ctx, message, &mut next)?;
            }
            current = next.into_messages();
        }
        out.extend(current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DecodeError, Delivery};
    use crate::protocol::Protocol;
    use crate::session::Session;
    use parking_lot::Mutex;

    /// Appends its tag byte on the way in.
    struct Tag(u8);

    impl InboundListener for Tag {
        fn on_received(
            &self,
            _ctx: &ListenerContext<'_>,
            message: Message,
        ) -> Result<Option<Message>, ProtocolError> {
            match message {
                Message::Bytes(mut bytes) => {
                    bytes.push(self.0);
                    Ok(Some(Message::Bytes(bytes)))
                }
                other => Ok(Some(other)),
            }
        }
    }

    struct Swallow;

    impl InboundListener for Swallow {
        fn on_received(
            &self,
            _ctx: &ListenerContext<'_>,
            _message: Message,
        ) -> Result<Option<Message>, ProtocolError> {
            Ok(None)
        }
    }

    struct Reject;

    impl InboundListener for Reject {
        fn on_received(
            &self,
            _ctx: &ListenerContext<'_>,
            _message: Message,
        ) -> Result<Option<Message>, ProtocolError> {
            Err(ProtocolError::malformed(None, DecodeError::Invalid("rejected".into())))
        }
    }

    /// Emits every message twice.
    struct Duplicate;

    impl OutboundListener for Duplicate {
        fn on_sending(
            &self,
            _ctx: &ListenerContext<'_>,
            message: Message,
            out: &mut OutputCollector,
        ) -> Result<(), ProtocolError> {
            if let Message::Bytes(bytes) = message {
                out.push(bytes.clone());
                out.push(bytes);
            }
            Ok(())
        }
    }

    /// Prefixes its tag byte on the way out.
    struct Prefix(u8);

    impl OutboundListener for Prefix {
        fn on_sending(
            &self,
            _ctx: &ListenerContext<'_>,
            message: Message,
            out: &mut OutputCollector,
        ) -> Result<(), ProtocolError> {
            if let Message::Bytes(mut bytes) = message {
                bytes.insert(0, self.0);
                out.push(bytes);
            }
            Ok(())
        }
    }

    fn session() -> Session {
        Session::new(Protocol::builder().build())
    }

    fn received(pipeline: &Pipeline, session: &Session, bytes: Vec<u8>) -> Option<Vec<u8>> {
        let ctx = ListenerContext::new(session, Delivery::default());
        let seen = Mutex::new(None);
        pipeline
            .fire_received(&ctx, Message::Bytes(bytes), |message| {
                *seen.lock() = message.as_bytes().map(<[u8]>::to_vec);
                Ok(())
            })
            .unwrap();
        seen.into_inner()
    }

    #[test]
    fn test_positions() {
        let mut chain: ListenerChain<dyn InboundListener> = ListenerChain::new();
        chain.add_listener("b", Arc::new(Tag(2)), Position::Last).unwrap();
        chain.add_listener("a", Arc::new(Tag(1)), Position::First).unwrap();
        chain.add_listener("d", Arc::new(Tag(4)), Position::Last).unwrap();
        chain.add_listener("c", Arc::new(Tag(3)), Position::before("d")).unwrap();
        chain.add_listener("e", Arc::new(Tag(5)), Position::after("d")).unwrap();

        assert_eq!(chain.names().collect::<Vec<_>>(), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        let mut chain: ListenerChain<dyn InboundListener> = ListenerChain::new();
        chain.add_listener("a", Arc::new(Tag(1)), Position::Last).unwrap();

        assert_eq!(
            chain.add_listener("a", Arc::new(Tag(2)), Position::Last),
            Err(RegistrationError::DuplicateListener("a".into()))
        );
        assert_eq!(
            chain.add_listener("b", Arc::new(Tag(2)), Position::before("zzz")),
            Err(RegistrationError::UnknownListener("zzz".into()))
        );
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_remove_listener() {
        let mut chain: ListenerChain<dyn InboundListener> = ListenerChain::new();
        chain.add_listener("a", Arc::new(Tag(1)), Position::Last).unwrap();
        chain.add_listener("b", Arc::new(Tag(2)), Position::Last).unwrap();

        assert!(chain.remove_listener("a").is_some());
        assert!(chain.remove_listener("a").is_none());
        assert!(chain.get("b").is_some());
        assert_eq!(chain.names().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_fire_received_in_order() {
        let session = session();
        let mut pipeline = Pipeline::new();
        pipeline.inbound_mut().add_listener("one", Arc::new(Tag(1)), Position::Last).unwrap();
        pipeline.inbound_mut().add_listener("two", Arc::new(Tag(2)), Position::Last).unwrap();

        assert_eq!(received(&pipeline, &session, vec![0]), Some(vec![0, 1, 2]));
    }

    #[test]
    fn test_fire_received_consumed() {
        let session = session();
        let mut pipeline = Pipeline::new();
        pipeline.inbound_mut().add_listener("drop", Arc::new(Swallow), Position::Last).unwrap();
        pipeline.inbound_mut().add_listener("tag", Arc::new(Tag(1)), Position::Last).unwrap();

        assert_eq!(received(&pipeline, &session, vec![0]), None);
    }

    #[test]
    fn test_fire_received_error() {
        let session = session();
        let mut pipeline = Pipeline::new();
        pipeline.inbound_mut().add_listener("reject", Arc::new(Reject), Position::Last).unwrap();

        let ctx = ListenerContext::new(&session, Delivery::default());
        let result = pipeline.fire_received(&ctx, Message::Bytes(vec![1]), |_| {
            panic!("terminal must not run")
        });
        assert!(matches!(result, Err(ProtocolError::MalformedPacket { .. })));
    }

    #[test]
    fn test_fire_sending_fans_out() {
        let session = session();
        let mut pipeline = Pipeline::new();
        pipeline.outbound_mut().add_listener("dup", Arc::new(Duplicate), Position::Last).unwrap();
        pipeline.outbound_mut().add_listener("prefix", Arc::new(Prefix(9)), Position::Last).unwrap();

        let ctx = ListenerContext::new(&session, Delivery::default());
        let mut out = OutputCollector::new();
        pipeline.fire_sending(&ctx, Message::Bytes(vec![1]), &mut out).unwrap();

        let frames: Vec<_> = out
            .into_iter()
            .filter_map(|m| m.as_bytes().map(<[u8]>::to_vec))
            .collect();
        assert_eq!(frames, vec![vec![9, 1], vec![9, 1]]);
    }

    #[test]
    fn test_fire_sending_empty_chain_passes_through() {
        let session = session();
        let pipeline = Pipeline::new();
        let ctx = ListenerContext::new(&session, Delivery::default());
        let mut out = OutputCollector::new();
        pipeline.fire_sending(&ctx, Message::Bytes(vec![7]), &mut out).unwrap();
        assert_eq!(out.len(), 1);
    }
}
