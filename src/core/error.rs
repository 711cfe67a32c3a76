//! Error types for STRAND protocol.
//!
//! Errors are split by the moment they can occur: [`RegistrationError`] at
//! setup time, [`ProtocolError`] while a session processes traffic (always
//! fatal to that session), [`SessionError`] at the application API, and
//! [`TransportError`] from a connection binding.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use super::types::PacketId;

/// Errors that can occur when reading wire primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of data.
    #[error("unexpected end of data: needed {needed} more bytes")]
    UnexpectedEof {
        /// Bytes missing.
        needed: usize,
    },

    /// Varint longer than five bytes or overflowing 32 bits.
    #[error("varint too long")]
    VarIntTooLong,

    /// Boolean byte other than 0 or 1.
    #[error("invalid bool byte: 0x{0:02x}")]
    InvalidBool(u8),

    /// String bytes are not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Negative length or count prefix.
    #[error("negative length: {0}")]
    NegativeLength(i32),

    /// Bytes left over after the packet's fields.
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),

    /// Field value rejected by a decoder.
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Errors from a connection binding.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// Connection is closed or no longer writable.
    #[error("connection closed")]
    ConnectionClosed,

    /// Frame exceeds the configured size limit.
    #[error("frame too large: {size} > {limit}")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Frame header could not be parsed.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Writer task ended before completing a write.
    #[error("writer task gone")]
    WriterGone,
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl TransportError {
    /// Check if this error is fatal to the connection.
    ///
    /// A frame that is merely too large to send is the caller's problem; every
    /// other transport error means the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::FrameTooLarge { .. })
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Session-fatal errors raised while processing traffic.
///
/// Every variant routes through the session's failure path. `Clone` so one
/// cause can fail every pending handle of the session.
#[derive(Debug, Error, Clone)]
pub enum ProtocolError {
    /// I/O failure of the underlying connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Received a packet id with no registered codec.
    #[error("unknown packet id: {0}")]
    UnknownPacketId(PacketId),

    /// Tried to encode a packet type with no registered codec.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(&'static str),

    /// A codec failed to decode a packet.
    #[error("malformed packet {id:?}: {source}")]
    MalformedPacket {
        /// Packet id, when it could be read.
        id: Option<PacketId>,
        /// Underlying decode failure.
        #[source]
        source: DecodeError,
    },

    /// Fragment arrived out of the expected order.
    #[error("fragmentation order violation: expected offset {expected}, got {actual}")]
    FragmentationOrderViolation {
        /// Next offset the reassembler expected.
        expected: u32,
        /// Offset carried by the chunk.
        actual: u32,
    },

    /// Payload exceeds what the encapsulation layer can carry.
    #[error("payload too large: {size} > {limit}")]
    PayloadTooLarge {
        /// Size of the payload.
        size: usize,
        /// Maximum supported size.
        limit: usize,
    },
}

impl ProtocolError {
    /// Build a [`ProtocolError::MalformedPacket`].
    pub fn malformed(id: Option<PacketId>, source: DecodeError) -> Self {
        Self::MalformedPacket { id, source }
    }

    /// Check if the error came from the transport itself.
    ///
    /// A session failing with a transport error skips the Disconnect packet,
    /// since the connection can no longer be written.
    pub fn is_transport(&self) -> bool {
        matches!(self, ProtocolError::Transport(_))
    }
}

/// Programmer errors detected while building a protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Packet id already has a codec.
    #[error("packet id {0} already registered")]
    DuplicatePacketId(PacketId),

    /// Packet type already has a codec under another id.
    #[error("packet type {name} already registered as {id}")]
    DuplicatePacketType {
        /// Type name.
        name: &'static str,
        /// Id it is registered under.
        id: PacketId,
    },

    /// Packet id is in the protocol's reserved range.
    #[error("packet id {0} is reserved")]
    ReservedPacketId(PacketId),

    /// Packet id already has a handler.
    #[error("handler for packet id {0} already registered")]
    DuplicateHandler(PacketId),

    /// Listener name already used in the chain.
    #[error("listener {0:?} already registered")]
    DuplicateListener(String),

    /// Listener referenced as position anchor does not exist.
    #[error("listener {0:?} not found")]
    UnknownListener(String),
}

/// Errors returned by the session API.
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    /// Operation requires an open session.
    #[error("session is not open")]
    NotOpen,

    /// `open` was called more than once.
    #[error("session already opened")]
    AlreadyOpened,

    /// Session was closed gracefully.
    #[error("session closed: {reason}")]
    Closed {
        /// Close reason.
        reason: String,
    },

    /// Session failed with a protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A single write failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The pending reply was discarded without being resolved.
    #[error("pending reply dropped")]
    ReplyDropped,
}

/// Top-level STRAND errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Setup error.
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
