//! Frame-size classes and band geometry
//!
//! Everything downstream of the transform is parameterized by the
//! frame-size class `LM` (0..=3 for 120/240/480/960 samples at 48 kHz).
//! This module validates caller-supplied sizes and exposes the scaled
//! band boundaries for a given class.

use crate::error::{ConfigError, ConfigResult};
use crate::tables::{EBANDS, MAX_BANDS};

/// Samples per second; the only rate the band layout is defined for.
pub const SAMPLE_RATE: usize = 48000;

/// Signal scale applied to normalized PCM before analysis.
pub const SIG_SCALE: f32 = 32768.0;

/// Shortest supported block, also the inter-frame overlap length.
pub const SHORT_BLOCK_SIZE: usize = 120;

/// Geometry for one frame-size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    /// Frame size in samples per channel.
    pub frame_size: usize,
    /// Frame-size class: frame_size == 120 << lm.
    pub lm: usize,
    /// Number of short blocks a transient frame splits into (1 << lm).
    pub short_blocks: usize,
}

impl Mode {
    /// Resolves a frame size to its class, rejecting unsupported sizes.
    pub fn from_frame_size(frame_size: usize) -> ConfigResult<Self> {
        let lm = match frame_size {
            120 => 0,
            240 => 1,
            480 => 2,
            960 => 3,
            _ => return Err(ConfigError::UnsupportedFrameSize(frame_size)),
        };
        Ok(Mode {
            frame_size,
            lm,
            short_blocks: 1 << lm,
        })
    }

    /// Start bin of a band at this frame size.
    pub fn band_start(&self, band: usize) -> usize {
        EBANDS[band] << self.lm
    }

    /// Width of a band in bins at this frame size.
    pub fn band_width(&self, band: usize) -> usize {
        (EBANDS[band + 1] - EBANDS[band]) << self.lm
    }

    /// Total coded bins (the last band boundary scaled up).
    pub fn num_bins(&self) -> usize {
        EBANDS[MAX_BANDS] << self.lm
    }
}

/// Validates a channel count.
pub fn validate_channels(channels: usize) -> ConfigResult<()> {
    if channels == 1 || channels == 2 {
        Ok(())
    } else {
        Err(ConfigError::InvalidChannels(channels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_four_classes_resolve() {
        for (size, lm) in [(120, 0), (240, 1), (480, 2), (960, 3)] {
            let mode = Mode::from_frame_size(size).unwrap();
            assert_eq!(mode.lm, lm);
            assert_eq!(mode.short_blocks, 1 << lm);
            assert_eq!(mode.frame_size, 120 << lm);
        }
    }

    #[test]
    fn unsupported_sizes_rejected() {
        for size in [0, 100, 128, 441, 1920] {
            assert!(Mode::from_frame_size(size).is_err());
        }
    }

    #[test]
    fn band_geometry_scales_with_class() {
        let base = Mode::from_frame_size(120).unwrap();
        for lm in 1..4 {
            let mode = Mode::from_frame_size(120 << lm).unwrap();
            for band in 0..MAX_BANDS {
                assert_eq!(mode.band_start(band), base.band_start(band) << lm);
                assert_eq!(mode.band_width(band), base.band_width(band) << lm);
            }
            assert_eq!(mode.num_bins(), 100 << lm);
        }
    }

    #[test]
    fn channel_validation() {
        assert!(validate_channels(1).is_ok());
        assert!(validate_channels(2).is_ok());
        assert!(validate_channels(0).is_err());
        assert!(validate_channels(3).is_err());
    }
}
