//! zstd compression listener
//!
//! Compresses outbound frames and decompresses inbound ones. Both peers must
//! install it at the same position.
//!
//! Wire format of a frame after this stage:
//! ```text
//! +0  Flag (1 byte): 0x00 = stored as-is, 0x01 = zstd
//! +1  Payload
//! ```

use std::io::Read;

use thiserror::Error;
use tracing::trace;

use super::listener::{InboundListener, ListenerContext, Message, OutboundListener, OutputCollector};
use crate::core::{DecodeError, ProtocolError};

/// Frames shorter than this are stored as-is.
pub const MIN_COMPRESS_SIZE: usize = 64;

/// zstd level used unless configured otherwise.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const FLAG_STORED: u8 = 0x00;
const FLAG_ZSTD: u8 = 0x01;

/// Failures of the compression stage.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The zstd encoder reported an error.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// The zstd stream is corrupt.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Frame is missing its flag byte or carries an unknown flag.
    #[error("invalid compression flag")]
    InvalidFlag,

    /// The frame inflates past `max_decompressed_size`.
    #[error("inflated frame too large: {size} > {limit}")]
    SizeExceeded {
        /// Decompressed bytes read before giving up.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },
}

impl From<CompressionError> for ProtocolError {
    fn from(err: CompressionError) -> Self {
        match err {
            CompressionError::SizeExceeded { size, limit } => {
                ProtocolError::PayloadTooLarge { size, limit }
            }
            other => ProtocolError::malformed(None, DecodeError::Invalid(other.to_string())),
        }
    }
}

/// Settings of a [`CompressionListener`].
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Smallest frame worth compressing.
    pub min_size: usize,
    /// zstd level, clamped to 1..=22.
    pub level: i32,
    /// Upper bound on one inflated frame.
    pub max_decompressed_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size: MIN_COMPRESS_SIZE,
            level: DEFAULT_COMPRESSION_LEVEL,
            max_decompressed_size: 1024 * 1024,
        }
    }
}

/// Pipeline stage applying zstd to frames in both directions.
#[derive(Debug, Clone, Default)]
pub struct CompressionListener {
    config: CompressionConfig,
}

impl CompressionListener {
    /// Create a listener with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a listener with custom config
    pub fn with_config(mut config: CompressionConfig) -> Self {
        config.level = config.level.clamp(1, 22);
        Self { config }
    }

    /// Get the active configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Encode a frame, compressing it when that saves space.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if data.len() >= self.config.min_size {
            let compressed = zstd::encode_all(data, self.config.level)
                .map_err(|err| CompressionError::CompressionFailed(err.to_string()))?;

            // Stored wins ties.
            if compressed.len() < data.len() {
                let mut out = Vec::with_capacity(1 + compressed.len());
                out.push(FLAG_ZSTD);
                out.extend_from_slice(&compressed);
                return Ok(out);
            }
        }

        let mut out = Vec::with_capacity(1 + data.len());
        out.push(FLAG_STORED);
        out.extend_from_slice(data);
        Ok(out)
    }

    /// Decode a frame produced by [`compress`](Self::compress).
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let (&flag, body) = data.split_first().ok_or(CompressionError::InvalidFlag)?;
        match flag {
            FLAG_STORED => Ok(body.to_vec()),
            FLAG_ZSTD => self.inflate(body),
            _ => Err(CompressionError::InvalidFlag),
        }
    }

    fn inflate(&self, body: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let limit = self.config.max_decompressed_size;
        let decoder = zstd::Decoder::new(body)
            .map_err(|err| CompressionError::DecompressionFailed(err.to_string()))?;

        // Read one byte past the limit to detect overflow without inflating
        // the whole payload.
        let mut inflated = Vec::new();
        decoder
            .take(limit as u64 + 1)
            .read_to_end(&mut inflated)
            .map_err(|err| CompressionError::DecompressionFailed(err.to_string()))?;

        if inflated.len() > limit {
            return Err(CompressionError::SizeExceeded {
                size: inflated.len(),
                limit,
            });
        }
        Ok(inflated)
    }
}

impl OutboundListener for CompressionListener {
    fn on_sending(
        &self,
        ctx: &ListenerContext<'_>,
        message: Message,
        out: &mut OutputCollector,
    ) -> Result<(), ProtocolError> {
        match message {
            Message::Bytes(bytes) => {
                let encoded = self.compress(&bytes)?;
                trace!(
                    session = %ctx.session().id(),
                    original = bytes.len(),
                    encoded = encoded.len(),
                    "frame compressed"
                );
                out.push(encoded);
            }
            packet => out.push(packet),
        }
        Ok(())
    }
}

impl InboundListener for CompressionListener {
    fn on_received(
        &self,
        _ctx: &ListenerContext<'_>,
        message: Message,
    ) -> Result<Option<Message>, ProtocolError> {
        match message {
            Message::Bytes(bytes) => Ok(Some(Message::Bytes(self.decompress(&bytes)?))),
            packet => Ok(Some(packet)),
        }
    }
}
