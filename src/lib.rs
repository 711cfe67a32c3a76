//! # STRAND Protocol
//!
//! **S**ession **T**ransport with **R**eassembly **A**nd **N**amed **D**ispatch
//!
//! STRAND turns a raw, ordered, reliable byte connection into a structured,
//! multiplexed messaging channel between two endpoints. It provides:
//!
//! - **Sessions**: connection lifecycle with a graceful, loop-free disconnect
//!   handshake
//! - **Codecs**: application packets identified by varint ids, encoded by
//!   explicitly registered functions
//! - **Pipeline**: ordered, named inbound and outbound listener chains
//! - **Encapsulation**: transparent fragmentation of oversized frames and
//!   batching of small ones
//! - **Channels**: per-message channel and reliability metadata
//!
//! ## Feature Flags
//!
//! - `tcp` (default): TCP binding, [`server`] and [`client`] endpoints
//! - `compression` (default): zstd compression pipeline listener
//!
//! ## Modules
//!
//! - [`core`]: Core traits, constants, and error types
//! - [`codec`]: Codec registry and wire primitives
//! - [`encapsulation`]: Fragmentation and batch envelopes
//! - [`pipeline`]: Listener chains
//! - [`transport`]: Underlying connection adapter and bindings
//! - [`session`]: Session state machine and Disconnect Protocol
//! - [`protocol`]: Protocol definition and builder
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use strand::prelude::*;
//! use strand::transport::{drive, memory};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position {
//!     x: i32,
//!     y: i32,
//! }
//!
//! impl PacketCodec for Position {
//!     fn encode(&self, buf: &mut PacketWriter) {
//!         buf.write_i32(self.x);
//!         buf.write_i32(self.y);
//!     }
//!
//!     fn decode(buf: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
//!         Ok(Self {
//!             x: buf.read_i32()?,
//!             y: buf.read_i32()?,
//!         })
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let protocol = Protocol::builder()
//!     .register_codec::<Position>(1)?
//!     .typed_handler(1, |session, pos: Position, delivery| {
//!         println!("{} moved to {pos:?} on channel {}", session.id(), delivery.channel);
//!     })?
//!     .build();
//!
//! let ((conn_a, source_a), (conn_b, source_b)) = memory::pair();
//! let a = Session::new(protocol.clone());
//! let b = Session::new(protocol);
//! a.open(Arc::new(conn_a))?;
//! b.open(Arc::new(conn_b))?;
//! tokio::spawn(drive(a.clone(), source_a));
//! tokio::spawn(drive(b.clone(), source_b));
//!
//! a.send(&Position { x: 5, y: 10 }, Channel::new(3), Reliability::ReliableOrdered)?
//!     .await?;
//! a.close("done");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod codec;
pub mod encapsulation;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "tcp")]
#[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "tcp")]
#[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
pub mod server;


/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::codec::{CodecRegistry, PacketReader, PacketWriter};
    pub use crate::pipeline::{
        InboundListener, ListenerContext, Message, OutboundListener, OutputCollector, Position,
    };
    pub use crate::protocol::{Protocol, ProtocolBuilder, ProtocolConfig, SessionListener};
    pub use crate::session::{ReplyHandle, Session, SessionId, SessionState};
    pub use crate::transport::{SendHandle, UnderlyingConnection, WireFrame};

    #[cfg(feature = "compression")]
    pub use crate::pipeline::{CompressionConfig, CompressionListener};

    #[cfg(feature = "tcp")]
    pub use crate::{client::Client, server::Server};
}

// Re-export commonly used items at crate root
pub use crate::core::{Channel, Delivery, Error, Packet, PacketCodec, PacketId, Reliability};
pub use crate::protocol::Protocol;
pub use crate::session::Session;
