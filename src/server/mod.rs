//! STRAND Protocol - Server endpoint
//!
//! Accepts TCP connections, opens one [`Session`] per connection and keeps a
//! registry of the live ones.
//!
//! [`Session`]: crate::session::Session

#[allow(clippy::module_inception)]
mod server;

pub use server::*;
