//! Fragmentation of oversized payloads and their reassembly.
//!
//! Wire format of one chunk (after the reserved packet id):
//! ```text
//! +0  isFirst      (1 byte, 0x00/0x01)
//! +1  totalLength  (4 bytes BE32, only when isFirst)
//!     offset       (4 bytes BE32)
//!     dataLength   (4 bytes BE32)
//!     data         (dataLength bytes)
//! ```
//!
//! The transport is ordered, so chunks of one message arrive back to back and
//! their offsets are contiguous. Any deviation is a protocol violation.

use std::collections::HashMap;

use tracing::trace;

use crate::codec::{PacketReader, PacketWriter};
use crate::core::{Channel, DecodeError, PacketCodec, ProtocolError, FRAGMENT_PACKET_ID};

/// Largest payload the fragment header can describe.
pub const MAX_FRAGMENTED_PAYLOAD: usize = i32::MAX as usize;

/// One chunk of a fragmented payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentChunk {
    /// Total payload length; present only on the first chunk.
    pub total_length: Option<u32>,
    /// Position of `data` within the payload.
    pub offset: u32,
    /// Chunk bytes.
    pub data: Vec<u8>,
}

impl FragmentChunk {
    /// Check if this chunk starts a message.
    pub fn is_first(&self) -> bool {
        self.total_length.is_some()
    }
}

impl PacketCodec for FragmentChunk {
    fn encode(&self, buf: &mut PacketWriter) {
        buf.write_bool(self.is_first());
        if let Some(total) = self.total_length {
            buf.write_u32(total);
        }
        buf.write_u32(self.offset);
        buf.write_u32(self.data.len() as u32);
        buf.write_raw(&self.data);
    }

    fn decode(buf: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let is_first = buf.read_bool()?;
        let total_length = if is_first {
            Some(buf.read_len()? as u32)
        } else {
            None
        };
        let offset = buf.read_len()? as u32;
        let len = buf.read_len()?;
        let data = buf.read_raw(len)?.to_vec();
        Ok(Self {
            total_length,
            offset,
            data,
        })
    }
}

/// Splits payloads into fixed-size chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragmenter {
    chunk_size: usize,
}

impl Fragmenter {
    /// Create a fragmenter. A zero chunk size is raised to one byte.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_FRAGMENTED_PAYLOAD),
        }
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Check if a payload of `len` bytes exceeds one chunk.
    pub fn needs_fragmenting(&self, len: usize) -> bool {
        len > self.chunk_size
    }

    /// Number of chunks [`split`](Self::split) emits for `len` bytes.
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }

    /// Split a payload into ordered chunks.
    ///
    /// The first chunk carries the total length; offsets increase by exactly
    /// the previous chunk's length.
    pub fn split(&self, payload: &[u8]) -> Result<Vec<FragmentChunk>, ProtocolError> {
        if payload.len() > MAX_FRAGMENTED_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_FRAGMENTED_PAYLOAD,
            });
        }

        let total = payload.len() as u32;
        let chunks = payload
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(index, data)| FragmentChunk {
                total_length: (index == 0).then_some(total),
                offset: (index * self.chunk_size) as u32,
                data: data.to_vec(),
            })
            .collect();
        Ok(chunks)
    }
}

/// Reassembly state of one in-flight message.
#[derive(Debug)]
struct Reassembly {
    total: usize,
    buffer: Vec<u8>,
}

/// Per-session reassembly of fragmented messages.
///
/// Keeps at most one in-flight message per channel.
#[derive(Debug)]
pub struct Reassembler {
    in_flight: HashMap<Channel, Reassembly>,
    max_message_size: usize,
}

impl Reassembler {
    /// Create a reassembler refusing messages above `max_message_size`.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            in_flight: HashMap::new(),
            max_message_size,
        }
    }

    /// Number of messages currently being reassembled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Bytes buffered across every in-flight message.
    pub fn buffered_bytes(&self) -> usize {
        self.in_flight.values().map(|r| r.buffer.len()).sum()
    }

    /// Drop every partial message.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    /// Accept the next chunk received on `channel`.
    ///
    /// Returns the complete payload once the last chunk arrives.
    pub fn accept(
        &mut self,
        channel: Channel,
        chunk: FragmentChunk,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let malformed =
            |reason: String| ProtocolError::malformed(Some(FRAGMENT_PACKET_ID), DecodeError::Invalid(reason));

        if let Some(total) = chunk.total_length {
            if let Some(current) = self.in_flight.get(&channel) {
                // A second start while a message is in flight.
                return Err(ProtocolError::FragmentationOrderViolation {
                    expected: current.buffer.len() as u32,
                    actual: chunk.offset,
                });
            }
            if chunk.offset != 0 {
                return Err(ProtocolError::FragmentationOrderViolation {
                    expected: 0,
                    actual: chunk.offset,
                });
            }
            let total = total as usize;
            if total == 0 {
                return Err(malformed("zero total length".to_string()));
            }
            if total > self.max_message_size {
                return Err(ProtocolError::PayloadTooLarge {
                    size: total,
                    limit: self.max_message_size,
                });
            }
            trace!(%channel, total, "fragmented message started");
            self.in_flight.insert(
                channel,
                Reassembly {
                    total,
                    buffer: Vec::with_capacity(total),
                },
            );
        }

        let Some(reassembly) = self.in_flight.get_mut(&channel) else {
            // Continuation with nothing in flight: the start was never seen.
            return Err(ProtocolError::FragmentationOrderViolation {
                expected: 0,
                actual: chunk.offset,
            });
        };

        let expected = reassembly.buffer.len();
        if chunk.offset as usize != expected {
            return Err(ProtocolError::FragmentationOrderViolation {
                expected: expected as u32,
                actual: chunk.offset,
            });
        }
        if expected + chunk.data.len() > reassembly.total {
            return Err(malformed(format!(
                "chunk overflows total length {}",
                reassembly.total
            )));
        }

        reassembly.buffer.extend_from_slice(&chunk.data);
        if reassembly.buffer.len() < reassembly.total {
            return Ok(None);
        }

        let payload = self
            .in_flight
            .remove(&channel)
            .map(|r| r.buffer)
            .unwrap_or_default();
        trace!(%channel, len = payload.len(), "fragmented message complete");
        Ok(Some(payload))
    }
}
