//! STRAND Protocol - Client endpoint
//!
//! Connects to a server over TCP and hands back an open [`Session`].
//!
//! [`Session`]: crate::session::Session

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
