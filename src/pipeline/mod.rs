//! STRAND Protocol - Event Pipeline
//!
//! Ordered, named listener chains that every message passes through between
//! the transport and the codec registry.
//!
//! ```text
//! inbound:  frame ─▶ [listener 1] ─▶ ... ─▶ [listener n] ─▶ codec dispatch
//! outbound: encoded frame ─▶ [listener 1] ─▶ ... ─▶ [listener n] ─▶ transport
//! ```
//!
//! Order is registration order adjusted by [`Position`], fixed once the
//! protocol is built. Later listeners may assume earlier ones already ran
//! (decompression before decode, for example).

mod chain;
#[cfg(feature = "compression")]
#[cfg_attr(docsrs, doc(cfg(feature = "compression")))]
mod compression;
mod listener;

pub use chain::*;
#[cfg(feature = "compression")]
pub use compression::*;
pub use listener::*;
