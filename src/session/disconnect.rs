//! Disconnect Protocol packet.
//!
//! Announces why a session is closing. The receiver records the reason and
//! tears the connection down without answering, so two peers can never
//! bounce Disconnect packets back and forth.

use crate::codec::{PacketReader, PacketWriter};
use crate::core::{DecodeError, PacketCodec};

/// Reserved packet carrying a close reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    /// Human readable close reason.
    pub reason: String,
}

impl DisconnectPacket {
    /// Create a disconnect packet.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PacketCodec for DisconnectPacket {
    fn encode(&self, buf: &mut PacketWriter) {
        buf.write_str(&self.reason);
    }

    fn decode(buf: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            reason: buf.read_string()?,
        })
    }
}
