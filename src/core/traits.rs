//! Core traits for STRAND protocol.
//!
//! These traits define what a logical packet is and how a packet type can
//! describe its own wire encoding.

use std::any::Any;
use std::fmt;

use super::error::DecodeError;
use crate::codec::{PacketReader, PacketWriter};

/// An application-defined structured message.
///
/// Blanket-implemented for every `Debug + Send + Sync + 'static` type, so
/// plain structs are packets without ceremony. The wire identity of a packet
/// type comes from the codec registered for it, never from the type itself.
///
/// Note that `Box<dyn Packet>` is itself `Debug + Send + Sync + 'static`.
/// Always pass `&*boxed` (a `&dyn Packet`) where a packet is expected, or the
/// box is treated as an unregistered packet type.
pub trait Packet: Any + Send + Sync + fmt::Debug {
    /// View the packet as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Convert the boxed packet into a boxed [`Any`].
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;

    /// Name of the concrete type, for diagnostics.
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> Packet for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn Packet {
    /// Check if the packet is of type `T`.
    pub fn is<T: Packet>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrow the packet as `T`.
    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Take ownership of the packet as `T`.
    ///
    /// Check with [`is`](Self::is) first when the packet must survive a
    /// mismatch; it is dropped otherwise.
    pub fn downcast<T: Packet>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

/// A packet type that knows how to encode and decode its own fields.
///
/// Register implementors with
/// [`CodecRegistry::register_codec`](crate::codec::CodecRegistry::register_codec).
///
/// # Example
///
/// ```
/// use strand::codec::{PacketReader, PacketWriter};
/// use strand::core::{DecodeError, PacketCodec};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Position {
///     x: i32,
///     y: i32,
/// }
///
/// impl PacketCodec for Position {
///     fn encode(&self, buf: &mut PacketWriter) {
///         buf.write_i32(self.x);
///         buf.write_i32(self.y);
///     }
///
///     fn decode(buf: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
///         Ok(Self {
///             x: buf.read_i32()?,
///             y: buf.read_i32()?,
///         })
///     }
/// }
/// ```
pub trait PacketCodec: Packet + Sized {
    /// Write the packet's fields (the id is written by the registry).
    fn encode(&self, buf: &mut PacketWriter);

    /// Read the packet's fields.
    fn decode(buf: &mut PacketReader<'_>) -> Result<Self, DecodeError>;
}
