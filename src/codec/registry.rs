//! Packet id ↔ codec table.
//!
//! Built once during setup, then shared read-only by every session. Lookup on
//! encode is by the packet's runtime [`TypeId`]; lookup on decode is by the
//! leading varint id. No reflection is involved: both tables are filled by
//! explicit registration.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use super::buffer::{PacketReader, PacketWriter};
use crate::core::{
    DecodeError, Packet, PacketCodec, PacketId, ProtocolError, RegistrationError,
};

type EncodeFn = Box<dyn Fn(&dyn Packet, &mut PacketWriter) -> Result<(), ProtocolError> + Send + Sync>;
type DecodeFn =
    Box<dyn Fn(&mut PacketReader<'_>) -> Result<Box<dyn Packet>, DecodeError> + Send + Sync>;

struct CodecEntry {
    type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl CodecEntry {
    /// Erase typed codec functions behind `dyn Packet`.
    fn new<P, E, D>(encode: E, decode: D) -> Self
    where
        P: Packet,
        E: Fn(&P, &mut PacketWriter) + Send + Sync + 'static,
        D: Fn(&mut PacketReader<'_>) -> Result<P, DecodeError> + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<P>(),
            encode: Box::new(move |packet: &dyn Packet, buf: &mut PacketWriter| {
                match packet.downcast_ref::<P>() {
                    Some(packet) => {
                        encode(packet, buf);
                        Ok(())
                    }
                    None => Err(ProtocolError::UnknownPacketType(packet.type_name())),
                }
            }),
            decode: Box::new(move |buf: &mut PacketReader<'_>| {
                decode(buf).map(|packet| Box::new(packet) as Box<dyn Packet>)
            }),
        }
    }
}

/// A decoded packet together with the id it was read with.
#[derive(Debug)]
pub struct DecodedPacket {
    /// Wire id.
    pub id: PacketId,
    /// The packet.
    pub packet: Box<dyn Packet>,
}

/// Bidirectional mapping between packet ids and codecs.
#[derive(Default)]
pub struct CodecRegistry {
    by_id: HashMap<PacketId, CodecEntry>,
    by_type: HashMap<TypeId, PacketId>,
}

impl CodecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec from a pair of functions.
    ///
    /// Fails if the id is reserved, if the id is taken, or if type `P` is
    /// already registered under another id.
    ///
    /// # Example
    ///
    /// ```
    /// use strand::codec::CodecRegistry;
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct Chat(String);
    ///
    /// let mut registry = CodecRegistry::new();
    /// registry
    ///     .register(
    ///         7,
    ///         |chat: &Chat, buf| buf.write_str(&chat.0),
    ///         |buf| Ok(Chat(buf.read_string()?)),
    ///     )
    ///     .unwrap();
    ///
    /// let frame = registry.encode(&Chat("hi".into())).unwrap();
    /// let decoded = registry.decode(&frame).unwrap();
    /// assert_eq!(decoded.packet.downcast_ref::<Chat>(), Some(&Chat("hi".into())));
    /// ```
    pub fn register<P, E, D>(
        &mut self,
        id: u32,
        encode: E,
        decode: D,
    ) -> Result<(), RegistrationError>
    where
        P: Packet,
        E: Fn(&P, &mut PacketWriter) + Send + Sync + 'static,
        D: Fn(&mut PacketReader<'_>) -> Result<P, DecodeError> + Send + Sync + 'static,
    {
        let id = PacketId::new(id);
        if id.is_reserved() {
            return Err(RegistrationError::ReservedPacketId(id));
        }
        self.insert(id, encode, decode)
    }

    /// Register a type implementing [`PacketCodec`].
    pub fn register_codec<P: PacketCodec>(&mut self, id: u32) -> Result<(), RegistrationError> {
        self.register(id, P::encode, P::decode)
    }

    /// Install one of the protocol's own envelopes under a reserved id.
    ///
    /// Reserved entries are installed into a fresh registry before any
    /// application codec, so no conflict check is needed.
    pub(crate) fn register_reserved<P: PacketCodec>(&mut self, id: PacketId) {
        debug_assert!(id.is_reserved());
        self.by_id.insert(id, CodecEntry::new::<P, _, _>(P::encode, P::decode));
        self.by_type.insert(TypeId::of::<P>(), id);
    }

    fn insert<P, E, D>(&mut self, id: PacketId, encode: E, decode: D) -> Result<(), RegistrationError>
    where
        P: Packet,
        E: Fn(&P, &mut PacketWriter) + Send + Sync + 'static,
        D: Fn(&mut PacketReader<'_>) -> Result<P, DecodeError> + Send + Sync + 'static,
    {
        if self.by_id.contains_key(&id) {
            return Err(RegistrationError::DuplicatePacketId(id));
        }
        if let Some(existing) = self.by_type.get(&TypeId::of::<P>()) {
            return Err(RegistrationError::DuplicatePacketType {
                name: std::any::type_name::<P>(),
                id: *existing,
            });
        }

        let entry = CodecEntry::new::<P, E, D>(encode, decode);
        self.by_id.insert(id, entry);
        self.by_type.insert(TypeId::of::<P>(), id);
        Ok(())
    }

    /// Id registered for the packet's runtime type.
    pub fn id_of(&self, packet: &dyn Packet) -> Option<PacketId> {
        self.by_type.get(&Any::type_id(packet.as_any())).copied()
    }

    /// Check if an id has a codec.
    pub fn contains(&self, id: PacketId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Name of the type registered under `id`.
    pub fn type_name(&self, id: PacketId) -> Option<&'static str> {
        self.by_id.get(&id).map(|entry| entry.type_name)
    }

    /// Number of registered codecs, reserved ones included.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Check if no codec is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Encode a packet as a single-packet frame `[varint id][fields]`.
    pub fn encode(&self, packet: &dyn Packet) -> Result<Vec<u8>, ProtocolError> {
        let id = self
            .id_of(packet)
            .ok_or(ProtocolError::UnknownPacketType(packet.type_name()))?;
        let entry = self
            .by_id
            .get(&id)
            .ok_or(ProtocolError::UnknownPacketType(packet.type_name()))?;

        let mut buf = PacketWriter::new();
        buf.write_varint(id.get());
        (entry.encode)(packet, &mut buf)?;
        Ok(buf.into_inner())
    }

    /// Decode a single-packet frame.
    ///
    /// The whole frame must be consumed; leftover bytes make the packet
    /// malformed.
    pub fn decode(&self, frame: &[u8]) -> Result<DecodedPacket, ProtocolError> {
        let mut buf = PacketReader::new(frame);
        let id = PacketId::new(
            buf.read_varint()
                .map_err(|e| ProtocolError::malformed(None, e))?,
        );
        let entry = self
            .by_id
            .get(&id)
            .ok_or(ProtocolError::UnknownPacketId(id))?;

        let packet = (entry.decode)(&mut buf).map_err(|e| ProtocolError::malformed(Some(id), e))?;
        buf.finish()
            .map_err(|e| ProtocolError::malformed(Some(id), e))?;

        Ok(DecodedPacket { id, packet })
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self
            .by_id
            .iter()
            .map(|(id, entry)| (id.get(), entry.type_name))
            .collect();
        entries.sort_unstable();
        f.debug_struct("CodecRegistry")
            .field("codecs", &entries)
            .finish()
    }
}
