//! Frame encoder
//!
//! Drives one analysis/coding pass per frame: transient detection, MDCT,
//! band energies, then the coded fields in bitstream order (silence,
//! postfilter gate, transient flag, coarse energies, TF flags, spread,
//! dynalloc boosts, trim, allocation, fine energy, band shapes, energy
//! finalise). All budget gates use `tell`/`tell_frac` so the decoder can
//! replay every decision from the packet alone.

use log::debug;

use crate::alloc::{
    alloc_trim_analysis, compute_allocation_encode, compute_equiv_rate, dynalloc_analysis,
    encode_boosts, init_caps,
};
use crate::bands::{
    amplitudes_to_log, compute_band_amplitudes, normalize_bands, quant_all_bands_encode,
};
use crate::energy::{
    quant_coarse_energy, quant_energy_finalise, quant_fine_energy, CoarseParams,
};
use crate::error::{CodecError, CodecResult, ConfigError, ConfigResult, InputDataError};
use crate::mdct::mdct_forward;
use crate::modes::{validate_channels, Mode, SAMPLE_RATE, SIG_SCALE};
use crate::range::RangeEncoder;
use crate::spread::{
    compute_spread_weights, spreading_decision, SpreadState, SPREAD_NORMAL,
};
use crate::tables::{MAX_BANDS, OVERLAP, SPREAD_ICDF, TRIM_ICDF};
use crate::tf::tf_encode;
use crate::transient::transient_analysis;

/// Largest packet the range coder can address.
pub const MAX_PACKET_BYTES: usize = 1275;

/// Encoder settings, validated at construction.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Samples per frame per channel: 120, 240, 480 or 960.
    pub frame_size: usize,
    /// 1 or 2.
    pub channels: usize,
    /// Target bitrate in bits per second; frames are constant size.
    pub bitrate: u32,
}

impl EncoderConfig {
    /// Bytes every packet of this configuration occupies.
    pub fn bytes_per_frame(&self) -> usize {
        (self.bitrate as usize * self.frame_size) / (SAMPLE_RATE * 8)
    }
}

/// One encoder instance; owns all cross-frame state for a single stream.
pub struct Encoder {
    mode: Mode,
    channels: usize,
    bytes_per_frame: usize,
    /// Previous frame tail per channel, scaled domain, feeds the MDCT.
    overlap: Vec<f32>,
    /// Quantized band energies as the decoder tracks them.
    old_band_e: Vec<f32>,
    /// Post-finalise residual, clipped, compensated on the next frame.
    energy_error: Vec<f32>,
    delayed_intra: f32,
    spread_state: SpreadState,
    prev_coded_bands: usize,
    lsb_depth: i32,
}

impl Encoder {
    pub fn new(config: &EncoderConfig) -> ConfigResult<Self> {
        let mode = Mode::from_frame_size(config.frame_size)?;
        validate_channels(config.channels)?;
        let bytes = config.bytes_per_frame();
        if bytes < 2 {
            return Err(ConfigError::PacketTooSmall {
                bytes,
                frame_size: config.frame_size,
            });
        }
        if bytes > MAX_PACKET_BYTES {
            return Err(ConfigError::PacketTooLarge(bytes));
        }
        Ok(Encoder {
            mode,
            channels: config.channels,
            bytes_per_frame: bytes,
            overlap: vec![0.0; config.channels * OVERLAP],
            old_band_e: vec![0.0; config.channels * MAX_BANDS],
            energy_error: vec![0.0; config.channels * MAX_BANDS],
            delayed_intra: 1.0,
            spread_state: SpreadState::default(),
            prev_coded_bands: MAX_BANDS,
            lsb_depth: 16,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.mode.frame_size
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Encodes one frame of interleaved `f32` PCM in ±1.0 and returns the
    /// fixed-size packet.
    pub fn encode(&mut self, pcm: &[f32]) -> CodecResult<Vec<u8>> {
        let frame_size = self.mode.frame_size;
        let channels = self.channels;
        if pcm.len() != frame_size * channels {
            return Err(InputDataError::InvalidPcmLength {
                expected: frame_size * channels,
                actual: pcm.len(),
            }
            .into());
        }

        let nb_bytes = self.bytes_per_frame;
        let total_bits = (nb_bytes * 8) as i32;
        let lm = self.mode.lm;
        let n0 = self.mode.num_bins();

        let mut enc = RangeEncoder::new(nb_bytes);
        enc.shrink(nb_bytes);

        // Scale into the analysis domain the energy tables are trained on.
        let scaled: Vec<f32> = pcm.iter().map(|&x| x * SIG_SCALE).collect();

        let transient = transient_analysis(&scaled, channels);
        let is_transient = lm > 0 && total_bits >= 6 && transient.is_transient;
        let short_blocks = if is_transient {
            self.mode.short_blocks
        } else {
            1
        };

        // Transform with the frame's overlap history prefixed. Transient
        // frames additionally run a single long block over the same input;
        // its energies stabilize the dynalloc envelope below.
        let mut freq = vec![0.0f32; channels * frame_size];
        let mut long_freq = if is_transient {
            Some(vec![0.0f32; channels * frame_size])
        } else {
            None
        };
        for c in 0..channels {
            let mut input = vec![0.0f32; OVERLAP + frame_size];
            input[..OVERLAP].copy_from_slice(&self.overlap[c * OVERLAP..(c + 1) * OVERLAP]);
            for i in 0..frame_size {
                input[OVERLAP + i] = scaled[i * channels + c];
            }
            if let Some(long) = long_freq.as_mut() {
                mdct_forward(&input, &mut long[c * frame_size..(c + 1) * frame_size], 1);
            }
            mdct_forward(
                &input,
                &mut freq[c * frame_size..(c + 1) * frame_size],
                short_blocks,
            );
            self.overlap[c * OVERLAP..(c + 1) * OVERLAP]
                .copy_from_slice(&input[frame_size..]);
        }

        let mut band_e = vec![0.0f32; channels * MAX_BANDS];
        let mut band_log_e = vec![0.0f32; channels * MAX_BANDS];
        for c in 0..channels {
            compute_band_amplitudes(
                &self.mode,
                &freq[c * frame_size..(c + 1) * frame_size],
                &mut band_e[c * MAX_BANDS..(c + 1) * MAX_BANDS],
            );
            amplitudes_to_log(
                &band_e[c * MAX_BANDS..(c + 1) * MAX_BANDS],
                &mut band_log_e[c * MAX_BANDS..(c + 1) * MAX_BANDS],
            );
        }

        // Secondary energies for dynalloc, taken before the error feedback
        // below touches `band_log_e`. On transient frames these come from
        // the long block, lifted by 0.5 per LM step to compensate for the
        // short-transform gain.
        let band_log_e2 = match &long_freq {
            Some(long) => {
                let mut amp = [0.0f32; MAX_BANDS];
                let mut e2 = vec![0.0f32; channels * MAX_BANDS];
                for c in 0..channels {
                    compute_band_amplitudes(
                        &self.mode,
                        &long[c * frame_size..(c + 1) * frame_size],
                        &mut amp,
                    );
                    amplitudes_to_log(&amp, &mut e2[c * MAX_BANDS..(c + 1) * MAX_BANDS]);
                }
                for v in e2.iter_mut() {
                    *v += 0.5 * lm as f32;
                }
                e2
            }
            None => band_log_e.clone(),
        };

        // Silence flag, one very skewed bit.
        let silence = band_log_e.iter().all(|&e| e < -28.0);
        enc.encode_bit(i32::from(silence), 15);
        if silence {
            debug!("silence frame, {nb_bytes} byte packet");
            for e in self.old_band_e.iter_mut() {
                *e = -28.0;
            }
            self.energy_error.iter_mut().for_each(|e| *e = 0.0);
            return enc.done().map_err(|e| CodecError::Internal(e.to_string()));
        }

        // Postfilter is never applied; the gate bit keeps the layout.
        if enc.tell() + 16 <= total_bits {
            enc.encode_bit(0, 1);
        }

        if lm > 0 && enc.tell() + 3 <= total_bits {
            enc.encode_bit(i32::from(is_transient), 3);
        }

        // Next-frame stabilization: fold the previous frame's residual
        // back in where the energy is steady.
        for i in 0..channels * MAX_BANDS {
            if (band_log_e[i] - self.old_band_e[i]).abs() < 2.0 {
                band_log_e[i] -= 0.25 * self.energy_error[i];
            }
        }

        let mut error = vec![0.0f32; channels * MAX_BANDS];
        let coarse = quant_coarse_energy(
            &mut enc,
            &band_log_e,
            &mut self.old_band_e,
            &mut error,
            &mut self.delayed_intra,
            &CoarseParams {
                lm,
                channels,
                budget: total_bits,
                nb_available_bytes: nb_bytes as i32,
                force_intra: false,
                two_pass: true,
                loss_rate: 0,
            },
        );

        let mut tf_res = [0i32; MAX_BANDS];
        tf_encode(&mut enc, is_transient, &mut tf_res, lm);

        let mut norm = vec![0.0f32; channels * n0];
        for c in 0..channels {
            normalize_bands(
                &self.mode,
                &freq[c * frame_size..(c + 1) * frame_size],
                &band_e[c * MAX_BANDS..(c + 1) * MAX_BANDS],
                &mut norm[c * n0..(c + 1) * n0],
            );
        }

        let spread = if enc.tell() + 4 <= total_bits {
            let decision = if is_transient {
                SPREAD_NORMAL
            } else {
                let weights = compute_spread_weights(&band_log_e, channels, self.lsb_depth);
                spreading_decision(
                    &self.mode,
                    &norm,
                    &mut self.spread_state,
                    channels,
                    &weights,
                    true,
                )
            };
            enc.encode_icdf(decision, &SPREAD_ICDF, 5);
            decision
        } else {
            SPREAD_NORMAL
        };

        let caps = init_caps(&self.mode, channels);
        let dynalloc = dynalloc_analysis(
            &self.mode,
            &band_log_e,
            &band_log_e2,
            &self.old_band_e,
            channels,
            self.lsb_depth,
            nb_bytes as i32,
            is_transient,
        );
        let (boosts, tot_boost) = encode_boosts(
            &mut enc,
            &self.mode,
            channels,
            &dynalloc.offsets,
            &caps,
            total_bits << 3,
        );

        let equiv_rate = compute_equiv_rate(nb_bytes as i32, channels, lm);
        let mut trim = alloc_trim_analysis(
            &self.mode,
            &norm,
            &band_log_e,
            channels,
            transient.tf_estimate,
            equiv_rate,
        );
        if enc.tell_frac() + (6 << 3) <= (total_bits << 3) - tot_boost {
            enc.encode_icdf(trim as usize, &TRIM_ICDF, 7);
        } else {
            trim = 5;
        }

        let alloc_total = (total_bits << 3) - enc.tell_frac() - 1;
        let alloc = compute_allocation_encode(
            &mut enc,
            &self.mode,
            channels,
            &boosts,
            &caps,
            trim,
            MAX_BANDS,
            false,
            alloc_total,
            self.prev_coded_bands,
        );
        debug!(
            "frame: transient={} intra={} spread={} trim={} coded_bands={}",
            is_transient, coarse.intra, spread, trim, alloc.coded_bands
        );

        quant_fine_energy(
            &mut enc,
            &mut self.old_band_e,
            &mut error,
            &alloc.fine_bits,
            channels,
        );

        quant_all_bands_encode(
            &mut enc,
            &self.mode,
            &mut norm,
            &alloc,
            &tf_res,
            spread,
            short_blocks,
            total_bits << 3,
            channels,
        );

        let bits_left = (total_bits - enc.tell()).max(0);
        quant_energy_finalise(
            &mut enc,
            &mut self.old_band_e,
            &mut error,
            &alloc.fine_bits,
            &alloc.fine_priority,
            bits_left,
            channels,
        );

        for (dst, &e) in self.energy_error.iter_mut().zip(error.iter()) {
            *dst = e.clamp(-0.5, 0.5);
        }
        self.prev_coded_bands = alloc.coded_bands;

        enc.done().map_err(|e| CodecError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(frame_size: usize, channels: usize, bitrate: u32) -> EncoderConfig {
        EncoderConfig {
            frame_size,
            channels,
            bitrate,
        }
    }

    #[test]
    fn packets_are_constant_size() {
        let cfg = config(960, 1, 64000);
        let mut enc = Encoder::new(&cfg).unwrap();
        let expected = cfg.bytes_per_frame();
        for k in 0..4 {
            let pcm: Vec<f32> = (0..960)
                .map(|i| 0.4 * ((i + k * 960) as f32 * 0.05).sin())
                .collect();
            let packet = enc.encode(&pcm).unwrap();
            assert_eq!(packet.len(), expected);
        }
    }

    #[test]
    fn wrong_pcm_length_rejected() {
        let mut enc = Encoder::new(&config(480, 2, 96000)).unwrap();
        let pcm = vec![0.0f32; 480];
        assert!(enc.encode(&pcm).is_err());
    }

    #[test]
    fn impossible_rates_rejected() {
        // 1 kb/s cannot hold a 2.5 ms frame header.
        assert!(Encoder::new(&config(120, 1, 1000)).is_err());
        assert!(Encoder::new(&config(960, 2, 600_000)).is_err());
        assert!(Encoder::new(&config(960, 3, 64000)).is_err());
        assert!(Encoder::new(&config(1000, 1, 64000)).is_err());
    }

    #[test]
    fn silence_encodes_and_size_holds() {
        let cfg = config(240, 1, 48000);
        let mut enc = Encoder::new(&cfg).unwrap();
        let packet = enc.encode(&vec![0.0f32; 240]).unwrap();
        assert_eq!(packet.len(), cfg.bytes_per_frame());
    }
}
