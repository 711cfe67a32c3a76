//! STRAND Protocol - Protocol definition
//!
//! The frozen bundle both peers agree on: packet codecs, packet handlers,
//! listener chains, lifecycle callbacks and limits.
//!
//! ```text
//! ProtocolBuilder ──register/handler/inbound/outbound──▶ build() ──▶ Arc<Protocol>
//!                                                                     │
//!                                              shared by every Session ┘
//! ```

mod config;
mod handler;
#[allow(clippy::module_inception)]
mod protocol;

pub use config::*;
pub use handler::*;
pub use protocol::*;
