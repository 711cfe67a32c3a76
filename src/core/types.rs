//! Identifiers and delivery metadata carried alongside every packet.

use std::fmt;

use super::constants::RESERVED_ID_START;

/// Numeric packet identifier, written on the wire as a varint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(u32);

impl PacketId {
    /// Create a packet id from its raw value.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Check if this id belongs to the protocol's reserved range.
    pub const fn is_reserved(self) -> bool {
        self.0 >= RESERVED_ID_START
    }
}

impl From<u32> for PacketId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Logical sub-stream multiplexed over one session.
///
/// Application channels are `0..=u16::MAX`. The raw value `-1` is
/// [`Channel::DEFAULT`], meaning "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(i32);

impl Channel {
    /// The unset/default channel.
    pub const DEFAULT: Self = Self(-1);

    /// Create an application channel.
    pub const fn new(id: u16) -> Self {
        Self(id as i32)
    }

    /// Parse a channel from its wire value.
    ///
    /// Returns `None` for values below `-1`.
    pub const fn from_raw(raw: i32) -> Option<Self> {
        if raw < -1 { None } else { Some(Self(raw)) }
    }

    /// Get the wire value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Check if this is the unset/default channel.
    pub const fn is_default(self) -> bool {
        self.0 == -1
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u16> for Channel {
    fn from(id: u16) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            f.write_str("default")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Delivery class attached to each outbound message.
///
/// Advisory metadata for the transport binding. The protocol stack itself
/// never reorders or drops messages based on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Reliability {
    /// May be lost, may arrive out of order.
    Unreliable = 0x00,
    /// May be lost; stale messages are discarded.
    UnreliableSequenced = 0x01,
    /// Always arrives, order not guaranteed.
    Reliable = 0x02,
    /// Always arrives, in send order.
    #[default]
    ReliableOrdered = 0x03,
    /// Always arrives; stale messages are discarded.
    ReliableSequenced = 0x04,
}

impl Reliability {
    /// Parse a reliability marker from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Unreliable),
            0x01 => Some(Self::UnreliableSequenced),
            0x02 => Some(Self::Reliable),
            0x03 => Some(Self::ReliableOrdered),
            0x04 => Some(Self::ReliableSequenced),
            _ => None,
        }
    }

    /// Convert to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Check if the class guarantees delivery.
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Self::Reliable | Self::ReliableOrdered | Self::ReliableSequenced
        )
    }

    /// Check if the class guarantees send-order delivery.
    pub fn is_ordered(self) -> bool {
        self == Self::ReliableOrdered
    }
}

/// Channel and reliability a message was received or sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    /// Logical channel.
    pub channel: Channel,
    /// Delivery class.
    pub reliability: Reliability,
}

impl Delivery {
    /// Create delivery metadata.
    pub const fn new(channel: Channel, reliability: Reliability) -> Self {
        Self {
            channel,
            reliability,
        }
    }
}
