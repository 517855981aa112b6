//! Error types for the codec
//!
//! This module defines all error types used throughout the encoder and
//! decoder, separating caller mistakes (bad configuration, malformed
//! packets) from internal invariant violations that indicate a bug.

use thiserror::Error;

/// Main error type for the codec
#[derive(Debug, Error)]
pub enum CodecError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input data validation errors
    #[error("Input data error: {0}")]
    InputData(#[from] InputDataError),

    /// Internal state consistency errors; these indicate an implementation
    /// bug, never bad input
    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Frame size is not one of the supported block lengths
    #[error("Unsupported frame size: {0} samples")]
    UnsupportedFrameSize(usize),

    /// Invalid channel configuration
    #[error("Invalid channel count: {0} (supported: 1 or 2)")]
    InvalidChannels(usize),

    /// Target packet size cannot hold even the frame header
    #[error("Target packet size too small: {bytes} bytes for frame size {frame_size}")]
    PacketTooSmall { bytes: usize, frame_size: usize },

    /// Target packet size exceeds the coder's addressable range
    #[error("Target packet size too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// Input data validation errors
#[derive(Debug, Error)]
pub enum InputDataError {
    /// Invalid PCM data length
    #[error("Invalid PCM length: expected {expected} samples, got {actual}")]
    InvalidPcmLength { expected: usize, actual: usize },

    /// Empty packet where at least one byte is required
    #[error("Empty packet")]
    EmptyPacket,

    /// Packet length inconsistent with the declared frame configuration
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

/// Specialized result types for different modules
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type CodecResult<T> = std::result::Result<T, CodecError>;
