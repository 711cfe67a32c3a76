//! Outbound path: encode, fragment, run the outbound pipeline, hand off to
//! the connection.

use std::sync::Arc;

use tracing::{debug, trace};

use super::disconnect::DisconnectPacket;
use super::session::{Session, SessionState};
use crate::core::{Channel, Delivery, Packet, ProtocolError, Reliability, SessionError};
use crate::encapsulation::{Batch, Fragmenter};
use crate::pipeline::{ListenerContext, Message, OutputCollector};
use crate::transport::{SendHandle, UnderlyingConnection, WireFrame};

impl Session {
    /// Send one packet.
    ///
    /// The returned handle resolves once every transport write of the
    /// message completed. A packet type with no registered codec is rejected
    /// without affecting the session.
    ///
    /// Pass `&*boxed` for a `Box<dyn Packet>`, not `&boxed`.
    pub fn send(
        &self,
        packet: &dyn Packet,
        channel: Channel,
        reliability: Reliability,
    ) -> Result<SendHandle, SessionError> {
        let frame = self.shared.protocol.codecs().encode(packet)?;
        self.submit(Delivery::new(channel, reliability), vec![frame])
    }

    /// Send several packets as batch envelopes.
    ///
    /// Packets are packed in order into as few envelopes as the configured
    /// [`BatchingConfig`](crate::encapsulation::BatchingConfig) allows. Every
    /// packet is encoded before anything is written, so an unregistered type
    /// sends nothing. An empty list sends nothing.
    pub fn send_batch(
        &self,
        packets: &[&dyn Packet],
        channel: Channel,
        reliability: Reliability,
    ) -> Result<SendHandle, SessionError> {
        let protocol = Arc::clone(&self.shared.protocol);
        let codecs = protocol.codecs();
        let frames = packets
            .iter()
            .map(|packet| codecs.encode(*packet))
            .collect::<Result<Vec<_>, _>>()?;

        let batches = Batch::pack(frames, &protocol.config().batching);
        let envelopes = batches
            .iter()
            .map(|batch| codecs.encode(batch))
            .collect::<Result<Vec<_>, _>>()?;

        trace!(
            session = %self.id(),
            packets = packets.len(),
            envelopes = envelopes.len(),
            "sending batch"
        );
        self.submit(Delivery::new(channel, reliability), envelopes)
    }

    /// Send an already encoded single-packet frame (`[varint id][fields]`).
    ///
    /// The frame is not validated; a frame the peer cannot decode fails the
    /// peer's session.
    pub fn send_frame(
        &self,
        frame: Vec<u8>,
        channel: Channel,
        reliability: Reliability,
    ) -> Result<SendHandle, SessionError> {
        self.submit(Delivery::new(channel, reliability), vec![frame])
    }

    fn submit(&self, delivery: Delivery, frames: Vec<Vec<u8>>) -> Result<SendHandle, SessionError> {
        let connection = self.writable_connection()?;
        let mut handle = SendHandle::new();

        let result = {
            let _guard = self.shared.send_lock.lock();
            frames
                .into_iter()
                .try_for_each(|frame| self.transmit(connection.as_ref(), delivery, frame, &mut handle))
        };

        match result {
            Ok(()) => Ok(handle),
            Err(err) => {
                // Part of the message may already be on the wire; the peer's
                // stream can no longer be trusted.
                let partial = handle.frames() > 0;
                let fatal = matches!(&err, ProtocolError::Transport(e) if e.is_fatal());
                if partial || fatal {
                    self.fail(err.clone());
                }
                Err(match err {
                    ProtocolError::Transport(err) => SessionError::Transport(err),
                    err => SessionError::Protocol(err),
                })
            }
        }
    }

    fn writable_connection(&self) -> Result<Arc<dyn UnderlyingConnection>, SessionError> {
        let inner = self.lock();
        match (inner.state, &inner.connection) {
            (SessionState::Open, Some(connection)) => Ok(Arc::clone(connection)),
            (SessionState::Closing | SessionState::Closed, _) => Err(SessionError::Closed {
                reason: inner.disconnect_reason.clone().unwrap_or_default(),
            }),
            _ => Err(SessionError::NotOpen),
        }
    }

    /// Write one logical frame, fragmenting it when it exceeds the threshold.
    ///
    /// Callers hold the send lock.
    fn transmit(
        &self,
        connection: &dyn UnderlyingConnection,
        delivery: Delivery,
        frame: Vec<u8>,
        handle: &mut SendHandle,
    ) -> Result<(), ProtocolError> {
        let protocol = Arc::clone(&self.shared.protocol);
        let config = protocol.config();
        if frame.len() > config.max_message_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: frame.len(),
                limit: config.max_message_size,
            });
        }
        if frame.len() <= config.fragment_threshold {
            return self.emit(connection, delivery, Message::Bytes(frame), handle);
        }

        let chunks = Fragmenter::new(config.fragment_threshold).split(&frame)?;
        trace!(
            session = %self.id(),
            len = frame.len(),
            chunks = chunks.len(),
            "fragmenting frame"
        );
        for chunk in chunks {
            let bytes = protocol.codecs().encode(&chunk)?;
            self.emit(connection, delivery, Message::Bytes(bytes), handle)?;
        }
        Ok(())
    }

    fn emit(
        &self,
        connection: &dyn UnderlyingConnection,
        delivery: Delivery,
        message: Message,
        handle: &mut SendHandle,
    ) -> Result<(), ProtocolError> {
        let protocol = Arc::clone(&self.shared.protocol);
        let ctx = ListenerContext::new(self, delivery);
        let mut out = OutputCollector::new();
        protocol.pipeline().fire_sending(&ctx, message, &mut out)?;

        for message in out {
            let bytes = match message {
                Message::Bytes(bytes) => bytes,
                Message::Packet(packet) => protocol.codecs().encode(&*packet)?,
            };
            trace!(
                session = %self.id(),
                channel = %delivery.channel,
                len = bytes.len(),
                "frame queued"
            );
            handle.push(connection.send(WireFrame::new(delivery, bytes))?);
        }
        Ok(())
    }

    /// Announce `reason` to the peer. Failures are logged and ignored: the
    /// session is going away regardless.
    pub(super) fn send_disconnect(&self, connection: &dyn UnderlyingConnection, reason: &str) {
        let delivery = Delivery::new(
            self.shared.protocol.config().control_channel,
            Reliability::ReliableOrdered,
        );
        let result = self
            .shared
            .protocol
            .codecs()
            .encode(&DisconnectPacket::new(reason))
            .and_then(|frame| {
                let _guard = self.shared.send_lock.lock();
                let mut handle = SendHandle::new();
                self.transmit(connection, delivery, frame, &mut handle)
            });

        match result {
            Ok(()) => trace!(session = %self.id(), reason, "disconnect sent"),
            Err(err) => debug!(session = %self.id(), error = %err, "disconnect not sent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::codec::{PacketReader, PacketWriter};
    use crate::core::{
        BATCH_PACKET_ID, DecodeError, FRAGMENT_PACKET_ID, PacketCodec, PacketId, TransportError,
    };
    use crate::encapsulation::{BatchingConfig, FragmentChunk};
    use crate::protocol::{Protocol, ProtocolConfig};
    use crate::tests::RecordingConnection;

    #[derive(Debug, Clone, PartialEq)]
    struct Blob(Vec<u8>);

    impl PacketCodec for Blob {
        fn encode(&self, buf: &mut PacketWriter) {
            buf.write_bytes(&self.0);
        }

        fn decode(buf: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
            Ok(Self(buf.read_bytes()?.to_vec()))
        }
    }

    #[derive(Debug)]
    struct Unregistered;

    fn open_session(config: ProtocolConfig) -> (Session, Arc<RecordingConnection>) {
        let protocol = Protocol::builder()
            .config(config)
            .register_codec::<Blob>(1)
            .unwrap()
            .build();
        let session = Session::new(protocol);
        let connection = Arc::new(RecordingConnection::default());
        session.open(connection.clone()).unwrap();
        (session, connection)
    }

    fn decoded_ids(session: &Session, connection: &RecordingConnection) -> Vec<PacketId> {
        connection
            .frames
            .lock()
            .iter()
            .map(|frame| session.protocol().codecs().decode(&frame.payload).unwrap().id)
            .collect()
    }

    #[tokio::test]
    async fn test_send_single_frame() {
        let (session, connection) = open_session(ProtocolConfig::default());
        let handle = session
            .send(&Blob(vec![1, 2, 3]), Channel::new(3), Reliability::Reliable)
            .unwrap();
        assert_eq!(handle.frames(), 1);
        handle.await.unwrap();

        let frames = connection.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].channel, Channel::new(3));
        assert_eq!(frames[0].reliability, Reliability::Reliable);
        assert_eq!(frames[0].payload, vec![0x01, 3, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_large_frame_is_fragmented() {
        let config = ProtocolConfig::builder()
            .fragment_threshold(64)
            .build()
            .unwrap();
        let (session, connection) = open_session(config);
        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();

        let handle = session
            .send(&Blob(payload.clone()), Channel::new(1), Reliability::ReliableOrdered)
            .unwrap();
        let expected_chunks = session.protocol().codecs().encode(&Blob(payload)).unwrap().len().div_ceil(64);
        assert_eq!(handle.frames(), expected_chunks);
        handle.await.unwrap();

        let ids = decoded_ids(&session, &connection);
        assert_eq!(ids.len(), expected_chunks);
        assert!(ids.iter().all(|id| *id == FRAGMENT_PACKET_ID));

        let frames = connection.frames.lock();
        let first = session.protocol().codecs().decode(&frames[0].payload).unwrap();
        let first = first.packet.downcast_ref::<FragmentChunk>().unwrap();
        assert!(first.is_first());
        assert_eq!(first.offset, 0);
    }

    #[test]
    fn test_unregistered_type_keeps_session_open() {
        let (session, connection) = open_session(ProtocolConfig::default());
        let err = session
            .send(&Unregistered, Channel::DEFAULT, Reliability::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::Protocol(ProtocolError::UnknownPacketType(_))));
        assert!(session.is_open());
        assert!(connection.frames.lock().is_empty());
    }

    #[test]
    fn test_send_requires_open_session() {
        let protocol = Protocol::builder().register_codec::<Blob>(1).unwrap().build();
        let session = Session::new(protocol);
        assert!(matches!(
            session.send(&Blob(vec![]), Channel::DEFAULT, Reliability::default()),
            Err(SessionError::NotOpen)
        ));

        session.open(Arc::new(RecordingConnection::default())).unwrap();
        session.close("bye");
        assert!(matches!(
            session.send(&Blob(vec![]), Channel::DEFAULT, Reliability::default()),
            Err(SessionError::Closed { reason }) if reason == "bye"
        ));
    }

    #[test]
    fn test_broken_connection_fails_session() {
        let (session, connection) = open_session(ProtocolConfig::default());
        connection.broken.store(true, Ordering::SeqCst);

        let err = session
            .send(&Blob(vec![1]), Channel::DEFAULT, Reliability::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::ConnectionClosed)));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_oversized_message_rejected() {
        let config = ProtocolConfig::builder()
            .fragment_threshold(16)
            .max_message_size(64)
            .build()
            .unwrap();
        let (session, connection) = open_session(config);
        let err = session
            .send(&Blob(vec![0; 100]), Channel::DEFAULT, Reliability::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(ProtocolError::PayloadTooLarge { limit: 64, .. })
        ));
        assert!(session.is_open());
        assert!(connection.frames.lock().is_empty());
    }

    #[tokio::test]
    async fn test_send_batch_splits_envelopes() {
        let config = ProtocolConfig::builder()
            .batching(BatchingConfig {
                max_batch_size: 3,
                max_batch_bytes: 1024,
            })
            .build()
            .unwrap();
        let (session, connection) = open_session(config);

        let blobs: Vec<Blob> = (0..7u8).map(|i| Blob(vec![i])).collect();
        let packets: Vec<&dyn Packet> = blobs.iter().map(|b| b as &dyn Packet).collect();
        session
            .send_batch(&packets, Channel::new(2), Reliability::ReliableOrdered)
            .unwrap()
            .await
            .unwrap();

        let frames = connection.frames.lock().clone();
        assert_eq!(frames.len(), 3);
        let mut seen = Vec::new();
        for frame in &frames {
            let decoded = session.protocol().codecs().decode(&frame.payload).unwrap();
            assert_eq!(decoded.id, BATCH_PACKET_ID);
            let batch = decoded.packet.downcast_ref::<Batch>().unwrap();
            for sub in batch.frames() {
                let sub = session.protocol().codecs().decode(sub).unwrap();
                seen.push(sub.packet.downcast_ref::<Blob>().unwrap().clone());
            }
        }
        assert_eq!(seen, blobs);
    }

    #[test]
    fn test_send_batch_empty_and_unregistered() {
        let (session, connection) = open_session(ProtocolConfig::default());
        let handle = session
            .send_batch(&[], Channel::DEFAULT, Reliability::default())
            .unwrap();
        assert_eq!(handle.frames(), 0);

        let blob = Blob(vec![1]);
        let packets: [&dyn Packet; 2] = [&blob, &Unregistered];
        let err = session
            .send_batch(&packets, Channel::DEFAULT, Reliability::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::Protocol(ProtocolError::UnknownPacketType(_))));
        assert!(connection.frames.lock().is_empty());
    }

    #[test]
    fn test_send_frame_passes_bytes_through() {
        let (session, connection) = open_session(ProtocolConfig::default());
        session
            .send_frame(vec![0x01, 0x00], Channel::new(9), Reliability::Unreliable)
            .unwrap();
        let frames = connection.frames.lock();
        assert_eq!(frames[0].payload, vec![0x01, 0x00]);
        assert_eq!(frames[0].channel, Channel::new(9));
    }

    #[test]
    fn test_disconnect_on_control_channel() {
        let config = ProtocolConfig::builder()
            .control_channel(Channel::new(0))
            .build()
            .unwrap();
        let (session, connection) = open_session(config);
        session.close("maintenance");

        let frames = connection.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].channel, Channel::new(0));
        assert_eq!(frames[0].reliability, Reliability::ReliableOrdered);
        let decoded = session.protocol().codecs().decode(&frames[0].payload).unwrap();
        assert_eq!(
            decoded.packet.downcast_ref::<DisconnectPacket>(),
            Some(&DisconnectPacket::new("maintenance"))
        );
    }
}
