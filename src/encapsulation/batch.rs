//! Batch envelope
//!
//! Combines several single-packet frames into one transport write to cut
//! per-frame overhead for bursts of small packets.
//!
//! Wire format (after the reserved packet id):
//! ```text
//! +0  Frame count (4 bytes BE32)
//! +4  For each frame:
//!     +0  Frame length (4 bytes BE32)
//!     +4  Frame data: [varint packetId][fields]
//! ```
//!
//! Decoding is all-or-nothing: a truncated envelope yields no frames at all.

use crate::codec::{PacketReader, PacketWriter};
use crate::core::{
    BATCH_ENTRY_HEADER_SIZE, BATCH_HEADER_SIZE, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_SIZE,
    DecodeError, PacketCodec,
};

/// Limits applied to one batch envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchingConfig {
    /// Maximum number of frames per envelope
    pub max_batch_size: usize,
    /// Maximum encoded bytes per envelope, headers included
    pub max_batch_bytes: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

impl BatchingConfig {
    /// Create config optimized for low latency (small envelopes)
    pub fn low_latency() -> Self {
        Self {
            max_batch_size: 8,
            max_batch_bytes: 4096,
        }
    }

    /// Create config optimized for high throughput (large envelopes)
    pub fn high_throughput() -> Self {
        Self {
            max_batch_size: 1024,
            max_batch_bytes: 1024 * 1024,
        }
    }
}

/// An ordered list of single-packet frames sent as one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    frames: Vec<Vec<u8>>,
    encoded_len: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    /// Create an empty envelope.
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            encoded_len: BATCH_HEADER_SIZE,
        }
    }

    /// Create an envelope with room for `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            encoded_len: BATCH_HEADER_SIZE,
        }
    }

    /// Pack frames into as few envelopes as `config` allows, keeping order.
    ///
    /// A frame larger than `max_batch_bytes` travels alone in its own
    /// envelope. An empty input yields no envelopes.
    pub fn pack<I>(frames: I, config: &BatchingConfig) -> Vec<Batch>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut batches = Vec::new();
        let mut current = Batch::new();
        for frame in frames {
            if let Err(frame) = current.try_add(frame, config) {
                batches.push(std::mem::take(&mut current));
                current.push(frame);
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// Number of frames in the batch
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if the envelope holds no frame.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Encoded size of the envelope body, headers included
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }

    /// Check if a frame of `frame_len` bytes fits under `config`.
    ///
    /// An empty batch accepts any single frame.
    pub fn fits(&self, frame_len: usize, config: &BatchingConfig) -> bool {
        if self.is_empty() {
            return true;
        }
        self.frames.len() < config.max_batch_size
            && self.encoded_len + BATCH_ENTRY_HEADER_SIZE + frame_len <= config.max_batch_bytes
    }

    /// Add a frame if it fits, handing it back otherwise.
    pub fn try_add(&mut self, frame: Vec<u8>, config: &BatchingConfig) -> Result<(), Vec<u8>> {
        if !self.fits(frame.len(), config) {
            return Err(frame);
        }
        self.push(frame);
        Ok(())
    }

    /// Append a frame without checking any limit.
    pub fn push(&mut self, frame: Vec<u8>) {
        self.encoded_len += BATCH_ENTRY_HEADER_SIZE + frame.len();
        self.frames.push(frame);
    }

    /// Iterate over frames
    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        self.frames.iter().map(|v| v.as_slice())
    }

    /// Consume batch and return frames
    pub fn into_frames(self) -> Vec<Vec<u8>> {
        self.frames
    }

    /// Clear the batch
    pub fn clear(&mut self) {
        self.frames.clear();
        self.encoded_len = BATCH_HEADER_SIZE;
    }
}

impl PacketCodec for Batch {
    fn encode(&self, buf: &mut PacketWriter) {
        buf.write_u32(self.frames.len() as u32);
        for frame in &self.frames {
            buf.write_u32(frame.len() as u32);
            buf.write_raw(frame);
        }
    }

    fn decode(buf: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let count = buf.read_len()?;
        // Every entry needs at least its length prefix.
        let mut batch = Batch::with_capacity(count.min(buf.remaining() / BATCH_ENTRY_HEADER_SIZE));
        for _ in 0..count {
            let len = buf.read_len()?;
            batch.push(buf.read_raw(len)?.to_vec());
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode(bytes: &[u8]) -> Result<Batch, DecodeError> {
        let mut reader = PacketReader::new(bytes);
        let batch = Batch::decode(&mut reader)?;
        reader.finish()?;
        Ok(batch)
    }

    fn encode(batch: &Batch) -> Vec<u8> {
        let mut buf = PacketWriter::new();
        batch.encode(&mut buf);
        buf.into_inner()
    }

    #[test]
    fn test_default_limits() {
        let config = BatchingConfig::default();
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.max_batch_bytes, DEFAULT_MAX_BATCH_BYTES);
    }

    #[test]
    fn test_push_and_encode() {
        let config = BatchingConfig::default();
        let mut batch = Batch::new();

        assert!(batch.try_add(vec![1, 2, 3], &config).is_ok());
        assert!(batch.try_add(vec![4, 5], &config).is_ok());
        assert_eq!(batch.len(), 2);

        let encoded = encode(&batch);
        assert_eq!(encoded.len(), batch.encoded_len());
        assert_eq!(&encoded[..8], &[0, 0, 0, 2, 0, 0, 0, 3]);

        let decoded = decode(&encoded).unwrap();
        let frames: Vec<_> = decoded.frames().collect();
        assert_eq!(frames, vec![&[1, 2, 3][..], &[4, 5][..]]);
    }

    #[test]
    fn test_count_limit_splits() {
        let config = BatchingConfig {
            max_batch_size: 2,
            max_batch_bytes: 1000,
        };
        let mut batch = Batch::new();

        assert!(batch.try_add(vec![1], &config).is_ok());
        assert!(batch.try_add(vec![2], &config).is_ok());
        assert_eq!(batch.try_add(vec![3], &config), Err(vec![3]));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_byte_limit_splits() {
        let config = BatchingConfig {
            max_batch_size: 100,
            max_batch_bytes: 16,
        };
        let mut batch = Batch::new();

        // 4 (count) + 4 + 3 = 11 bytes
        assert!(batch.try_add(vec![1, 2, 3], &config).is_ok());
        assert!(batch.try_add(vec![1, 2], &config).is_err());
        assert!(batch.try_add(vec![1], &config).is_ok());
        assert_eq!(batch.encoded_len(), 16);
    }

    #[test]
    fn test_oversized_frame_travels_alone() {
        let config = BatchingConfig {
            max_batch_size: 10,
            max_batch_bytes: 8,
        };
        let batches = Batch::pack(vec![vec![1], vec![0; 32], vec![2]], &config);
        let lens: Vec<_> = batches.iter().map(Batch::len).collect();
        assert_eq!(lens, vec![1, 1, 1]);
    }

    #[test]
    fn test_batch_empty() {
        let batch = Batch::new();
        assert!(batch.is_empty());

        let decoded = decode(&encode(&batch)).unwrap();
        assert!(decoded.is_empty());
        assert!(Batch::pack(Vec::new(), &BatchingConfig::default()).is_empty());
    }

    #[test]
    fn test_truncated_envelope() {
        // Too short for header
        assert!(matches!(decode(&[0]), Err(DecodeError::UnexpectedEof { .. })));

        // Claims 1 frame but no data
        assert!(matches!(
            decode(&[0, 0, 0, 1]),
            Err(DecodeError::UnexpectedEof { .. })
        ));

        // Claims 1 frame of length 5 but only 2 bytes of data
        assert!(matches!(
            decode(&[0, 0, 0, 1, 0, 0, 0, 5, 1, 2]),
            Err(DecodeError::UnexpectedEof { .. })
        ));

        // Negative count
        assert!(matches!(
            decode(&[0xff, 0xff, 0xff, 0xff]),
            Err(DecodeError::NegativeLength(-1))
        ));
    }

    #[test]
    fn test_presets() {
        let latency = BatchingConfig::low_latency();
        let throughput = BatchingConfig::high_throughput();

        assert!(latency.max_batch_size < throughput.max_batch_size);
        assert!(latency.max_batch_bytes < throughput.max_batch_bytes);
    }

    proptest! {
        #[test]
        fn prop_pack_preserves_every_frame(
            frames in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..200),
            max_batch_size in 1usize..32,
            max_batch_bytes in 1usize..512,
        ) {
            let config = BatchingConfig { max_batch_size, max_batch_bytes };
            let batches = Batch::pack(frames.clone(), &config);

            let mut received = Vec::new();
            for batch in &batches {
                prop_assert!(!batch.is_empty());
                prop_assert!(batch.len() <= max_batch_size);
                prop_assert!(batch.len() == 1 || batch.encoded_len() <= max_batch_bytes);
                let decoded = decode(&encode(batch)).unwrap();
                received.extend(decoded.into_frames());
            }
            prop_assert_eq!(received, frames);
        }
    }
}
