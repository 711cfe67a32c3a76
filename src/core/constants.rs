//! Protocol constants.
//!
//! Reserved packet identifiers are fixed by the protocol and MUST NOT be
//! changed; both peers rely on them to recognise envelopes.

use super::types::PacketId;

// =============================================================================
// RESERVED PACKET IDS
// =============================================================================

/// First identifier of the reserved range. Applications may register any id
/// below this value.
pub const RESERVED_ID_START: u32 = 0xFFFF_FF00;

/// Disconnect announcement (carries the close reason).
pub const DISCONNECT_PACKET_ID: PacketId = PacketId::new(0xFFFF_FFFD);

/// Fragment chunk of an oversized payload.
pub const FRAGMENT_PACKET_ID: PacketId = PacketId::new(0xFFFF_FFFE);

/// Batch envelope carrying several single-packet frames.
pub const BATCH_PACKET_ID: PacketId = PacketId::new(0xFFFF_FFFF);

// =============================================================================
// WIRE PRIMITIVES
// =============================================================================

/// Maximum encoded size of a 32-bit varint.
pub const MAX_VARINT_LEN: usize = 5;

/// Fragment header size when `isFirst` is set (bool + total + offset + length).
pub const FIRST_FRAGMENT_HEADER_SIZE: usize = 1 + 4 + 4 + 4;

/// Fragment header size for continuation chunks (bool + offset + length).
pub const FRAGMENT_HEADER_SIZE: usize = 1 + 4 + 4;

/// Batch envelope header size (sub-packet count).
pub const BATCH_HEADER_SIZE: usize = 4;

/// Per sub-packet length prefix inside a batch envelope.
pub const BATCH_ENTRY_HEADER_SIZE: usize = 4;

/// Transport frame header used by the stream bindings (channel + reliability).
pub const WIRE_FRAME_HEADER_SIZE: usize = 4 + 1;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Payloads larger than this are fragmented (64 KiB).
pub const DEFAULT_FRAGMENT_THRESHOLD: usize = 64 * 1024;

/// Largest message the reassembler accepts (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Largest transport frame a stream binding accepts (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum sub-packets per batch envelope.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 256;

/// Default maximum encoded bytes per batch envelope (60 KiB, below the
/// fragment threshold so a full batch never needs fragmenting).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 60 * 1024;
