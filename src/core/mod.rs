//! STRAND Protocol - Core traits, types, and constants.
//!
//! This module provides the foundational types shared by every layer of the
//! stack: packet identifiers, channels, reliability markers, the [`Packet`]
//! trait and the error taxonomy. It has no knowledge of transports or sessions.

mod constants;
mod error;
mod traits;
mod types;

pub use constants::*;
pub use error::*;
pub use traits::*;
pub use types::*;
