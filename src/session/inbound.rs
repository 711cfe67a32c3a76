//! Inbound dispatch: from a received frame to the packet's handler.

use tracing::{debug, trace};

use super::disconnect::DisconnectPacket;
use super::session::Session;
use crate::codec::DecodedPacket;
use crate::core::{
    BATCH_PACKET_ID, DISCONNECT_PACKET_ID, DecodeError, Delivery, FRAGMENT_PACKET_ID, Packet, PacketCodec,
    PacketId, ProtocolError,
};
use crate::encapsulation::{Batch, FragmentChunk};
use crate::pipeline::{ListenerContext, Message};
use crate::transport::WireFrame;

impl Session {
    /// Process one frame from the transport.
    ///
    /// Called by the connection's driver, one frame at a time. Frames arriving
    /// while the session is not open are dropped. Any error is fatal and
    /// routes through [`fail`](Self::fail).
    pub fn on_frame_received(&self, frame: WireFrame) {
        if !self.is_open() {
            trace!(session = %self.id(), len = frame.payload.len(), "frame dropped, session not open");
            return;
        }

        let delivery = frame.delivery();
        let ctx = ListenerContext::new(self, delivery);
        let result = self.shared.protocol.pipeline().fire_received(
            &ctx,
            Message::Bytes(frame.payload),
            |message| self.dispatch(delivery, message),
        );
        if let Err(err) = result {
            self.fail(err);
        }
    }

    /// Terminal stage of the inbound pipeline.
    fn dispatch(&self, delivery: Delivery, message: Message) -> Result<(), ProtocolError> {
        let codecs = self.shared.protocol.codecs();
        let DecodedPacket { id, packet } = match message {
            Message::Bytes(bytes) => codecs.decode(&bytes)?,
            Message::Packet(packet) => {
                let id = codecs
                    .id_of(&*packet)
                    .ok_or(ProtocolError::UnknownPacketType((*packet).type_name()))?;
                DecodedPacket { id, packet }
            }
        };
        self.dispatch_packet(delivery, id, packet)
    }

    fn dispatch_packet(
        &self,
        delivery: Delivery,
        id: PacketId,
        packet: Box<dyn Packet>,
    ) -> Result<(), ProtocolError> {
        if !self.is_open() {
            trace!(session = %self.id(), packet_id = %id, "packet dropped, session not open");
            return Ok(());
        }

        match id {
            FRAGMENT_PACKET_ID => {
                let chunk = expect_reserved::<FragmentChunk>(packet)?;
                let payload = self.lock().reassembler.accept(delivery.channel, chunk)?;
                if let Some(payload) = payload {
                    let DecodedPacket { id, packet } = self.shared.protocol.codecs().decode(&payload)?;
                    if id == FRAGMENT_PACKET_ID {
                        return Err(nested_envelope(id, "fragment"));
                    }
                    self.dispatch_packet(delivery, id, packet)?;
                }
                Ok(())
            }
            BATCH_PACKET_ID => {
                let batch = expect_reserved::<Batch>(packet)?;
                let codecs = self.shared.protocol.codecs();
                // Decode and check everything first so a bad sub-frame
                // delivers nothing. Envelopes never nest inside a batch.
                let packets = batch
                    .frames()
                    .map(|frame| {
                        let decoded = codecs.decode(frame)?;
                        match decoded.id {
                            BATCH_PACKET_ID | FRAGMENT_PACKET_ID => {
                                Err(nested_envelope(decoded.id, "batch"))
                            }
                            _ => Ok(decoded),
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                trace!(session = %self.id(), count = packets.len(), "batch unpacked");
                for DecodedPacket { id, packet } in packets {
                    self.dispatch_packet(delivery, id, packet)?;
                }
                Ok(())
            }
            DISCONNECT_PACKET_ID => {
                let disconnect = expect_reserved::<DisconnectPacket>(packet)?;
                self.on_disconnect_packet(disconnect.reason);
                Ok(())
            }
            _ => {
                match self.shared.protocol.handlers().get(id) {
                    Some(handler) => {
                        trace!(session = %self.id(), packet_id = %id, channel = %delivery.channel, "dispatching packet");
                        handler(self, packet, delivery);
                    }
                    None => {
                        debug!(session = %self.id(), packet_id = %id, "no handler registered, packet dropped");
                    }
                }
                Ok(())
            }
        }
    }
}

fn nested_envelope(id: PacketId, outer: &str) -> ProtocolError {
    ProtocolError::malformed(
        Some(id),
        DecodeError::Invalid(format!("envelope {id} nested in a {outer}")),
    )
}

/// Unwrap a reserved envelope decoded by the built-in codec.
fn expect_reserved<P: PacketCodec>(packet: Box<dyn Packet>) -> Result<P, ProtocolError> {
    if !packet.is::<P>() {
        return Err(ProtocolError::UnknownPacketType((*packet).type_name()));
    }
    packet
        .downcast::<P>()
        .map(|packet| *packet)
        .ok_or(ProtocolError::UnknownPacketType(std::any::type_name::<P>()))
}
