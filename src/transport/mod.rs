//! STRAND Protocol - Underlying Connection adapter
//!
//! Bridges a raw, ordered, reliable byte transport and a [`Session`].
//!
//! - **Outbound**: [`UnderlyingConnection`] accepts [`WireFrame`]s and hands
//!   back a [`WriteHandle`] per write. Concurrent senders are serialized by a
//!   single writer per connection, so frames never interleave.
//! - **Inbound**: a [`FrameSource`] yields frames one at a time; [`drive`] is
//!   the per-connection loop feeding them to the session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Session / Event Pipeline           │
//! ├─────────────────────────────────────────┤
//! │   Underlying Connection adapter         │  ← This module
//! │   WireFrame, WriteHandle, drive         │
//! ├─────────────────────────────────────────┤
//! │   in-memory pair │ TCP stream           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! [`Session`]: crate::session::Session

mod connection;
mod driver;
pub mod memory;
#[cfg(feature = "tcp")]
#[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
pub mod tcp;

pub use connection::*;
pub use driver::*;
