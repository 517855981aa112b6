//! Frame decoder
//!
//! Replays the encoder's field order from the packet: every budget gate
//! is measured with the same `tell`/`tell_frac` arithmetic, so encoder
//! and decoder stay in lockstep without any side information. Reading
//! past the end of a packet yields zeros, which degrades to silence
//! rather than failing.

use log::debug;

use crate::alloc::{compute_allocation_decode, decode_boosts, init_caps};
use crate::bands::{denormalize_bands, quant_all_bands_decode};
use crate::energy::{unquant_coarse_energy, unquant_energy_finalise, unquant_fine_energy};
use crate::error::{CodecResult, ConfigResult, InputDataError};
use crate::mdct::mdct_inverse;
use crate::modes::{validate_channels, Mode, SIG_SCALE};
use crate::range::RangeDecoder;
use crate::spread::SPREAD_NORMAL;
use crate::tables::{MAX_BANDS, OVERLAP, SPREAD_ICDF, TAPSET_ICDF, TRIM_ICDF};
use crate::tf::tf_decode;

use crate::encoder::MAX_PACKET_BYTES;

/// Decoder settings; must match the stream's encoder.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub frame_size: usize,
    pub channels: usize,
}

/// One decoder instance; owns the synthesis state for a single stream.
pub struct Decoder {
    mode: Mode,
    channels: usize,
    old_band_e: Vec<f32>,
    /// Overlap-add tail per channel, scaled domain.
    overlap_mem: Vec<f32>,
}

impl Decoder {
    pub fn new(config: &DecoderConfig) -> ConfigResult<Self> {
        let mode = Mode::from_frame_size(config.frame_size)?;
        validate_channels(config.channels)?;
        Ok(Decoder {
            mode,
            channels: config.channels,
            old_band_e: vec![0.0; config.channels * MAX_BANDS],
            overlap_mem: vec![0.0; config.channels * OVERLAP],
        })
    }

    pub fn frame_size(&self) -> usize {
        self.mode.frame_size
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Runs the synthesis filterbank over one frame of spectrum and
    /// interleaves the output back to ±1.0 PCM.
    fn synthesize(&mut self, freq: &[f32], short_blocks: usize) -> Vec<f32> {
        let frame_size = self.mode.frame_size;
        let channels = self.channels;
        let mut pcm = vec![0.0f32; frame_size * channels];
        let mut time = vec![0.0f32; frame_size];
        for c in 0..channels {
            mdct_inverse(
                &freq[c * frame_size..(c + 1) * frame_size],
                &mut time,
                &mut self.overlap_mem[c * OVERLAP..(c + 1) * OVERLAP],
                short_blocks,
            );
            for i in 0..frame_size {
                pcm[i * channels + c] = time[i] / SIG_SCALE;
            }
        }
        pcm
    }

    /// Decodes one packet into interleaved `f32` PCM.
    pub fn decode(&mut self, packet: &[u8]) -> CodecResult<Vec<f32>> {
        if packet.is_empty() {
            return Err(InputDataError::EmptyPacket.into());
        }
        if packet.len() > MAX_PACKET_BYTES {
            return Err(InputDataError::MalformedPacket(format!(
                "{} bytes exceeds the coder range",
                packet.len()
            ))
            .into());
        }

        let frame_size = self.mode.frame_size;
        let channels = self.channels;
        let lm = self.mode.lm;
        let n0 = self.mode.num_bins();
        let total_bits = (packet.len() * 8) as i32;

        let mut dec = RangeDecoder::new(packet);

        if dec.decode_bit(15) == 1 {
            debug!("silence frame");
            for e in self.old_band_e.iter_mut() {
                *e = -28.0;
            }
            let freq = vec![0.0f32; channels * frame_size];
            return Ok(self.synthesize(&freq, 1));
        }

        // Postfilter parameters are carried by the bitstream but the
        // filter itself is out of scope; parse and discard.
        if dec.tell() + 16 <= total_bits && dec.decode_bit(1) == 1 {
            let octave = dec.decode_uniform(6);
            let _period = (16u32 << octave) + dec.decode_raw_bits(4 + octave) - 1;
            let _gain = 0.09375 * (dec.decode_raw_bits(3) + 1) as f32;
            if dec.tell() + 2 <= total_bits {
                let _tapset = dec.decode_icdf(&TAPSET_ICDF, 2);
            }
        }

        let is_transient = lm > 0 && dec.tell() + 3 <= total_bits && dec.decode_bit(3) == 1;
        let short_blocks = if is_transient {
            self.mode.short_blocks
        } else {
            1
        };

        let intra = dec.tell() + 3 <= total_bits && dec.decode_bit(3) == 1;
        unquant_coarse_energy(
            &mut dec,
            &mut self.old_band_e,
            intra,
            lm,
            channels,
            total_bits,
        );

        let mut tf_res = [0i32; MAX_BANDS];
        tf_decode(&mut dec, is_transient, &mut tf_res, lm);

        let spread = if dec.tell() + 4 <= total_bits {
            dec.decode_icdf(&SPREAD_ICDF, 5)
        } else {
            SPREAD_NORMAL
        };

        let caps = init_caps(&self.mode, channels);
        let (boosts, tot_boost) =
            decode_boosts(&mut dec, &self.mode, channels, &caps, total_bits << 3);

        let trim = if dec.tell_frac() + (6 << 3) <= (total_bits << 3) - tot_boost {
            dec.decode_icdf(&TRIM_ICDF, 7) as i32
        } else {
            5
        };

        let alloc_total = (total_bits << 3) - dec.tell_frac() - 1;
        let alloc = compute_allocation_decode(
            &mut dec,
            &self.mode,
            channels,
            &boosts,
            &caps,
            trim,
            alloc_total,
        );
        debug!(
            "frame: transient={} intra={} spread={} trim={} coded_bands={}",
            is_transient, intra, spread, trim, alloc.coded_bands
        );

        unquant_fine_energy(&mut dec, &mut self.old_band_e, &alloc.fine_bits, channels);

        let mut norm = vec![0.0f32; channels * n0];
        quant_all_bands_decode(
            &mut dec,
            &self.mode,
            &mut norm,
            &alloc,
            &tf_res,
            spread,
            short_blocks,
            total_bits << 3,
            channels,
        );

        let bits_left = (total_bits - dec.tell()).max(0);
        unquant_energy_finalise(
            &mut dec,
            &mut self.old_band_e,
            &alloc.fine_bits,
            &alloc.fine_priority,
            bits_left,
            channels,
        );

        let mut freq = vec![0.0f32; channels * frame_size];
        for c in 0..channels {
            denormalize_bands(
                &self.mode,
                &norm[c * n0..(c + 1) * n0],
                &self.old_band_e[c * MAX_BANDS..(c + 1) * MAX_BANDS],
                &mut freq[c * frame_size..c * frame_size + n0],
            );
        }

        Ok(self.synthesize(&freq, short_blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, EncoderConfig};

    #[test]
    fn empty_and_oversized_packets_rejected() {
        let mut dec = Decoder::new(&DecoderConfig {
            frame_size: 960,
            channels: 1,
        })
        .unwrap();
        assert!(dec.decode(&[]).is_err());
        assert!(dec.decode(&vec![0u8; 2000]).is_err());
    }

    #[test]
    fn garbage_packet_still_produces_a_frame() {
        // Nothing in a packet is trusted; arbitrary bytes must decode to
        // some frame without panicking.
        let mut dec = Decoder::new(&DecoderConfig {
            frame_size: 480,
            channels: 2,
        })
        .unwrap();
        let packet: Vec<u8> = (0..60u32).map(|i| (i * 37 + 101) as u8).collect();
        let pcm = dec.decode(&packet).unwrap();
        assert_eq!(pcm.len(), 960);
        assert!(pcm.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn decode_tracks_encoder_band_energies() {
        let cfg = EncoderConfig {
            frame_size: 960,
            channels: 1,
            bitrate: 64000,
        };
        let mut enc = Encoder::new(&cfg).unwrap();
        let mut dec = Decoder::new(&DecoderConfig {
            frame_size: 960,
            channels: 1,
        })
        .unwrap();
        for k in 0..5 {
            let pcm: Vec<f32> = (0..960)
                .map(|i| 0.3 * ((k * 960 + i) as f32 * 2.0 * std::f32::consts::PI * 440.0
                    / 48000.0)
                    .sin())
                .collect();
            let packet = enc.encode(&pcm).unwrap();
            let out = dec.decode(&packet).unwrap();
            assert_eq!(out.len(), 960);
            assert!(out.iter().all(|x| x.is_finite()));
        }
    }
}
