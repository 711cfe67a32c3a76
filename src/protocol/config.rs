//! Protocol configuration.

use crate::core::{
    Channel, DEFAULT_FRAGMENT_THRESHOLD, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE, Error,
    FIRST_FRAGMENT_HEADER_SIZE, MAX_VARINT_LEN, WIRE_FRAME_HEADER_SIZE,
};
use crate::encapsulation::BatchingConfig;

/// Bytes an outbound listener may add to a frame, such as the compression
/// flag byte.
pub const LISTENER_HEADROOM: usize = 1;

/// Worst-case bytes a fragment chunk adds on top of its data.
pub const FRAGMENT_OVERHEAD: usize =
    MAX_VARINT_LEN + FIRST_FRAGMENT_HEADER_SIZE + LISTENER_HEADROOM + WIRE_FRAME_HEADER_SIZE;

/// Settings shared by every session of a protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Logical frames larger than this are fragmented.
    pub fragment_threshold: usize,

    /// Largest logical frame accepted in either direction.
    pub max_message_size: usize,

    /// Largest transport frame the stream bindings accept.
    pub max_frame_size: usize,

    /// Limits for one batch envelope.
    pub batching: BatchingConfig,

    /// Channel Disconnect packets are sent on.
    pub control_channel: Channel,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            fragment_threshold: DEFAULT_FRAGMENT_THRESHOLD,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            batching: BatchingConfig::default(),
            control_channel: Channel::DEFAULT,
        }
    }
}

impl ProtocolConfig {
    /// Start from the defaults.
    pub fn builder() -> ProtocolConfigBuilder {
        ProtocolConfigBuilder::new()
    }

    /// Check the settings are consistent.
    pub fn validate(&self) -> Result<(), Error> {
        if self.fragment_threshold == 0 {
            return Err(Error::Config("fragment_threshold must be positive".into()));
        }
        if self.max_message_size == 0 {
            return Err(Error::Config("max_message_size must be positive".into()));
        }
        if self.max_frame_size < self.fragment_threshold + FRAGMENT_OVERHEAD {
            return Err(Error::Config(format!(
                "max_frame_size {} cannot carry a {} byte fragment",
                self.max_frame_size, self.fragment_threshold
            )));
        }
        if self.batching.max_batch_size == 0 {
            return Err(Error::Config("batching.max_batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for [`ProtocolConfig`].
#[derive(Debug, Default)]
pub struct ProtocolConfigBuilder {
    config: ProtocolConfig,
}

impl ProtocolConfigBuilder {
    /// Create a builder holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fragmentation threshold (and chunk size).
    pub fn fragment_threshold(mut self, bytes: usize) -> Self {
        self.config.fragment_threshold = bytes;
        self
    }

    /// Set the largest logical frame.
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = bytes;
        self
    }

    /// Set the largest transport frame.
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Set the batch envelope limits.
    pub fn batching(mut self, batching: BatchingConfig) -> Self {
        self.config.batching = batching;
        self
    }

    /// Set the channel used for Disconnect packets.
    pub fn control_channel(mut self, channel: Channel) -> Self {
        self.config.control_channel = channel;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ProtocolConfig, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}
