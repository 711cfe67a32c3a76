//! STRAND Protocol - Codec Registry
//!
//! Maps packet identifiers to encode/decode functions and provides the wire
//! primitives codecs are written with.
//!
//! A single-packet frame is `[varint packetId][encoded fields...]`. The
//! registry writes and reads the id; codecs only see their own fields.
//!
//! ```text
//! encode:  &dyn Packet ──TypeId──▶ entry ──▶ [varint id][fields]
//! decode:  [varint id][fields] ──id──▶ entry ──▶ Box<dyn Packet>
//! ```

mod buffer;
mod registry;

pub use buffer::*;
pub use registry::*;
