//! The immutable protocol definition and its builder.

use std::fmt;
use std::sync::Arc;

use super::config::ProtocolConfig;
use super::handler::{HandlerRegistry, SessionListener};
use crate::codec::{CodecRegistry, PacketReader, PacketWriter};
use crate::core::{
    BATCH_PACKET_ID, DISCONNECT_PACKET_ID, DecodeError, Delivery, FRAGMENT_PACKET_ID, Packet,
    PacketCodec, PacketId, RegistrationError,
};
use crate::encapsulation::{Batch, FragmentChunk};
use crate::pipeline::{InboundListener, OutboundListener, Pipeline, Position};
use crate::session::{DisconnectPacket, Session};

/// Everything two peers must agree on, bundled and frozen.
///
/// Built once with [`ProtocolBuilder`] and shared by every session through an
/// `Arc`. Nothing in it changes after [`ProtocolBuilder::build`], so dispatch
/// never locks.
pub struct Protocol {
    codecs: CodecRegistry,
    handlers: HandlerRegistry,
    pipeline: Pipeline,
    lifecycle: Box<dyn SessionListener>,
    config: ProtocolConfig,
}

impl Protocol {
    /// Start building a protocol.
    pub fn builder() -> ProtocolBuilder {
        ProtocolBuilder::new()
    }

    /// Codec registry, reserved codecs included.
    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Packet handlers.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Inbound and outbound listener chains.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Lifecycle listener.
    pub fn lifecycle(&self) -> &dyn SessionListener {
        self.lifecycle.as_ref()
    }

    /// Configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("codecs", &self.codecs)
            .field("handlers", &self.handlers)
            .field("pipeline", &self.pipeline)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Protocol`].
///
/// Registration errors are programmer errors and surface from the method
/// that caused them.
///
/// # Example
///
/// ```
/// use strand::codec::{PacketReader, PacketWriter};
/// use strand::core::{DecodeError, PacketCodec};
/// use strand::protocol::Protocol;
///
/// #[derive(Debug)]
/// struct Ping(u32);
///
/// impl PacketCodec for Ping {
///     fn encode(&self, buf: &mut PacketWriter) {
///         buf.write_u32(self.0);
///     }
///
///     fn decode(buf: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
///         Ok(Ping(buf.read_u32()?))
///     }
/// }
///
/// let protocol = Protocol::builder()
///     .register_codec::<Ping>(1)?
///     .typed_handler(1, |session, ping: Ping, _delivery| {
///         tracing::info!(session = %session.id(), seq = ping.0, "ping");
///     })?
///     .build();
/// assert!(protocol.codecs().contains(strand::core::PacketId::new(1)));
/// # Ok::<(), strand::core::RegistrationError>(())
/// ```
pub struct ProtocolBuilder {
    codecs: CodecRegistry,
    handlers: HandlerRegistry,
    pipeline: Pipeline,
    lifecycle: Box<dyn SessionListener>,
    config: ProtocolConfig,
}

impl ProtocolBuilder {
    /// Create a builder with the reserved codecs installed.
    pub fn new() -> Self {
        let mut codecs = CodecRegistry::new();
        codecs.register_reserved::<DisconnectPacket>(DISCONNECT_PACKET_ID);
        codecs.register_reserved::<FragmentChunk>(FRAGMENT_PACKET_ID);
        codecs.register_reserved::<Batch>(BATCH_PACKET_ID);
        Self {
            codecs,
            handlers: HandlerRegistry::new(),
            pipeline: Pipeline::new(),
            lifecycle: Box::new(()),
            config: ProtocolConfig::default(),
        }
    }

    /// Register a codec from a pair of functions.
    pub fn register<P, E, D>(mut self, id: u32, encode: E, decode: D) -> Result<Self, RegistrationError>
    where
        P: Packet,
        E: Fn(&P, &mut PacketWriter) + Send + Sync + 'static,
        D: Fn(&mut PacketReader<'_>) -> Result<P, DecodeError> + Send + Sync + 'static,
    {
        self.codecs.register(id, encode, decode)?;
        Ok(self)
    }

    /// Register a type implementing [`PacketCodec`].
    pub fn register_codec<P: PacketCodec>(mut self, id: u32) -> Result<Self, RegistrationError> {
        self.codecs.register_codec::<P>(id)?;
        Ok(self)
    }

    /// Bind a handler to a packet id.
    pub fn handler<F>(mut self, id: u32, handler: F) -> Result<Self, RegistrationError>
    where
        F: Fn(&Session, Box<dyn Packet>, Delivery) + Send + Sync + 'static,
    {
        self.handlers.insert(PacketId::new(id), handler)?;
        Ok(self)
    }

    /// Bind a handler that receives the packet as `P`.
    pub fn typed_handler<P, F>(mut self, id: u32, handler: F) -> Result<Self, RegistrationError>
    where
        P: Packet,
        F: Fn(&Session, P, Delivery) + Send + Sync + 'static,
    {
        self.handlers.insert_typed::<P, F>(PacketId::new(id), handler)?;
        Ok(self)
    }

    /// Add an inbound listener.
    pub fn inbound(
        mut self,
        name: impl Into<String>,
        listener: Arc<dyn InboundListener>,
        position: Position,
    ) -> Result<Self, RegistrationError> {
        self.pipeline
            .inbound_mut()
            .add_listener(name, listener, position)?;
        Ok(self)
    }

    /// Add an outbound listener.
    pub fn outbound(
        mut self,
        name: impl Into<String>,
        listener: Arc<dyn OutboundListener>,
        position: Position,
    ) -> Result<Self, RegistrationError> {
        self.pipeline
            .outbound_mut()
            .add_listener(name, listener, position)?;
        Ok(self)
    }

    /// Set the lifecycle listener, replacing the previous one.
    pub fn lifecycle<L: SessionListener + 'static>(mut self, listener: L) -> Self {
        self.lifecycle = Box::new(listener);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    /// Freeze the definition.
    pub fn build(self) -> Arc<Protocol> {
        Arc::new(Protocol {
            codecs: self.codecs,
            handlers: self.handlers,
            pipeline: self.pipeline,
            lifecycle: self.lifecycle,
            config: self.config,
        })
    }
}

impl Default for ProtocolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProtocolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolBuilder")
            .field("codecs", &self.codecs)
            .field("handlers", &self.handlers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
