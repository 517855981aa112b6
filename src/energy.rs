//! Coarse, fine and final energy coding
//!
//! Band log-energies are coded in three layers. The coarse layer codes
//! integer residuals (6 dB steps) against a two-dimensional prediction:
//! across frames with a per-frame-size coefficient, and across bands with
//! a leaky integrator. Residuals go through the Laplace coder, falling
//! back to a tiny zigzag alphabet and then a single bit as the budget
//! runs out. The fine layer spends allocated bits on uniform refinement,
//! and the finalise layer spreads any bits left at the end of the frame
//! one bit per band by priority.
//!
//! Intra frames drop the inter-frame predictor so a lost packet cannot
//! poison future energies; the encoder tries both and keeps the cheaper.

use crate::laplace::{decode_laplace, encode_laplace};
use crate::range::{EncoderState, RangeDecoder, RangeEncoder};
use crate::tables::{
    ALPHA_COEF, BETA_COEF, BETA_INTRA, E_PROB_MODEL, MAX_BANDS, SMALL_ENERGY_ICDF,
};

pub const MAX_FINE_BITS: i32 = 8;

/// Tuning knobs for the coarse layer.
pub struct CoarseParams {
    pub lm: usize,
    pub channels: usize,
    /// Total frame budget in bits.
    pub budget: i32,
    pub nb_available_bytes: i32,
    pub force_intra: bool,
    pub two_pass: bool,
    /// Expected packet loss in percent, biases the intra decision.
    pub loss_rate: i32,
}

/// Outcome of coarse quantization.
pub struct CoarseResult {
    pub intra: bool,
}

#[allow(clippy::too_many_arguments)]
fn quant_coarse_impl(
    enc: &mut RangeEncoder,
    band_log_e: &[f32],
    old_e: &mut [f32],
    error: &mut [f32],
    prob_model: &[u8; 42],
    channels: usize,
    lm: usize,
    budget: i32,
    intra: bool,
    max_decay: f32,
) -> i32 {
    if enc.tell() + 3 <= budget {
        enc.encode_bit(i32::from(intra), 3);
    }
    let (coef, beta) = if intra {
        (0.0, BETA_INTRA)
    } else {
        (ALPHA_COEF[lm], BETA_COEF[lm])
    };
    let mut prev = [0.0f32; 2];
    let mut badness = 0;

    for i in 0..MAX_BANDS {
        for c in 0..channels {
            let idx = c * MAX_BANDS + i;
            let x = band_log_e[idx];
            let old = old_e[idx].max(-9.0);
            let f = x - coef * old - prev[c];
            let mut qi = (f + 0.5).floor() as i32;

            // Keep band energy from collapsing faster than the decoder
            // could track through a loss.
            let decay_bound = old_e[idx].max(-28.0) - max_decay;
            if qi < 0 && x < decay_bound {
                qi += (decay_bound - x) as i32;
                qi = qi.min(0);
            }
            let qi0 = qi;

            let bits_left = budget - enc.tell() - 3 * (channels as i32) * (MAX_BANDS - i) as i32;
            if i != 0 && bits_left < 30 {
                if bits_left < 24 {
                    qi = qi.min(1);
                }
                if bits_left < 16 {
                    qi = qi.max(-1);
                }
            }

            let remaining = budget - enc.tell();
            if remaining >= 15 {
                let pi = (2 * i).min(40);
                let fs = i32::from(prob_model[pi]) << 7;
                let decay = i32::from(prob_model[pi + 1]) << 6;
                qi = encode_laplace(enc, qi, fs, decay);
            } else if remaining >= 2 {
                qi = qi.clamp(-1, 1);
                let s = (2 * qi.abs() - i32::from(qi < 0)) as usize;
                enc.encode_icdf(s, &SMALL_ENERGY_ICDF, 2);
            } else if remaining >= 1 {
                qi = qi.min(0);
                enc.encode_bit(-qi, 1);
            } else {
                qi = -1;
            }

            error[idx] = f - qi as f32;
            badness += (qi0 - qi).abs();

            let q = qi as f32;
            old_e[idx] = coef * old + prev[c] + q;
            prev[c] = prev[c] + q - beta * q;
        }
    }
    badness
}

/// Quantizes and encodes coarse energies. `old_e` carries the quantized
/// energies across frames and is updated in place; `error` receives the
/// residual for the fine layers. Returns the intra decision.
pub fn quant_coarse_energy(
    enc: &mut RangeEncoder,
    band_log_e: &[f32],
    old_e: &mut [f32],
    error: &mut [f32],
    delayed_intra: &mut f32,
    params: &CoarseParams,
) -> CoarseResult {
    let channels = params.channels;
    let budget = params.budget;
    let tell = enc.tell();
    let lm = params.lm.min(3);
    let mut two_pass = params.two_pass;
    let mut intra = params.force_intra;
    if !two_pass && !intra {
        intra = *delayed_intra > 2.0 * (channels * MAX_BANDS) as f32
            && params.nb_available_bytes > (MAX_BANDS * channels) as i32;
    }
    if tell + 3 > budget {
        two_pass = false;
        intra = false;
    }

    let mut max_decay = 16.0f32;
    if MAX_BANDS > 10 {
        max_decay = max_decay.min(0.125 * params.nb_available_bytes as f32);
    }

    let new_distortion = loss_distortion(band_log_e, old_e, channels);

    let prob_intra = &E_PROB_MODEL[lm][1];
    let prob_inter = &E_PROB_MODEL[lm][0];

    if two_pass || intra {
        let mut start_state = EncoderState::default();
        enc.save_state(&mut start_state);

        let mut old_e_intra = old_e.to_vec();
        let mut error_intra = vec![0.0f32; channels * MAX_BANDS];
        let badness1 = quant_coarse_impl(
            enc,
            band_log_e,
            &mut old_e_intra,
            &mut error_intra,
            prob_intra,
            channels,
            lm,
            budget,
            true,
            max_decay,
        );

        if !intra {
            let tell_intra = enc.tell_frac();
            let mut intra_state = EncoderState::default();
            enc.save_state(&mut intra_state);
            enc.restore_state(&start_state);

            let badness2 = quant_coarse_impl(
                enc,
                band_log_e,
                old_e,
                error,
                prob_inter,
                channels,
                lm,
                budget,
                false,
                max_decay,
            );

            let intra_bias = ((budget as f32) * *delayed_intra * params.loss_rate as f32
                / (channels as f32 * 512.0)) as i32;
            let tell_inter = enc.tell_frac();
            if badness1 < badness2 || (badness1 == badness2 && tell_inter + intra_bias > tell_intra)
            {
                enc.restore_state(&intra_state);
                old_e.copy_from_slice(&old_e_intra);
                error.copy_from_slice(&error_intra);
                intra = true;
            }
        } else {
            old_e.copy_from_slice(&old_e_intra);
            error.copy_from_slice(&error_intra);
        }
    } else {
        quant_coarse_impl(
            enc,
            band_log_e,
            old_e,
            error,
            prob_inter,
            channels,
            lm,
            budget,
            false,
            max_decay,
        );
    }

    if intra {
        *delayed_intra = new_distortion;
    } else {
        let alpha = ALPHA_COEF[lm] * ALPHA_COEF[lm];
        *delayed_intra = alpha * *delayed_intra + new_distortion;
    }

    CoarseResult { intra }
}

/// Squared log-energy distance between the frame and the decoder's last
/// known state, clamped; drives the delayed-intra heuristic.
fn loss_distortion(band_log_e: &[f32], old_e: &[f32], channels: usize) -> f32 {
    let mut dist = 0.0f32;
    for c in 0..channels {
        for i in 0..MAX_BANDS {
            let d = band_log_e[c * MAX_BANDS + i] - old_e[c * MAX_BANDS + i];
            dist += d * d;
        }
    }
    (dist / 128.0).min(200.0)
}

/// Decodes coarse energies into `old_e`, mirroring the encoder's
/// prediction chain.
pub fn unquant_coarse_energy(
    dec: &mut RangeDecoder,
    old_e: &mut [f32],
    intra: bool,
    lm: usize,
    channels: usize,
    budget: i32,
) {
    let prob_model = &E_PROB_MODEL[lm.min(3)][usize::from(intra)];
    let (coef, beta) = if intra {
        (0.0, BETA_INTRA)
    } else {
        (ALPHA_COEF[lm.min(3)], BETA_COEF[lm.min(3)])
    };
    let mut prev = [0.0f32; 2];

    for i in 0..MAX_BANDS {
        for c in 0..channels {
            let idx = c * MAX_BANDS + i;
            let remaining = budget - dec.tell();
            let qi = if remaining >= 15 {
                let pi = (2 * i).min(40);
                let fs = i32::from(prob_model[pi]) << 7;
                let decay = i32::from(prob_model[pi + 1]) << 6;
                decode_laplace(dec, fs, decay)
            } else if remaining >= 2 {
                let s = dec.decode_icdf(&SMALL_ENERGY_ICDF, 2) as i32;
                (s >> 1) ^ -(s & 1)
            } else if remaining >= 1 {
                -dec.decode_bit(1)
            } else {
                -1
            };

            let q = qi as f32;
            let old = old_e[idx].max(-9.0);
            old_e[idx] = coef * old + prev[c] + q;
            prev[c] = prev[c] + q - beta * q;
        }
    }
}

/// Encodes fine energy refinement using the allocated bits per band.
pub fn quant_fine_energy(
    enc: &mut RangeEncoder,
    old_e: &mut [f32],
    error: &mut [f32],
    fine_quant: &[i32],
    channels: usize,
) {
    for i in 0..MAX_BANDS {
        let extra = fine_quant[i];
        if extra <= 0 {
            continue;
        }
        let levels = 1i32 << extra;
        for c in 0..channels {
            let idx = c * MAX_BANDS + i;
            let q2 = (((error[idx] + 0.5) * levels as f32).floor() as i32).clamp(0, levels - 1);
            enc.encode_raw_bits(q2 as u32, extra as u32);
            let offset = (q2 as f32 + 0.5) / levels as f32 - 0.5;
            old_e[idx] += offset;
            error[idx] -= offset;
        }
    }
}

/// Decodes fine energy refinement.
pub fn unquant_fine_energy(
    dec: &mut RangeDecoder,
    old_e: &mut [f32],
    fine_quant: &[i32],
    channels: usize,
) {
    for i in 0..MAX_BANDS {
        let extra = fine_quant[i];
        if extra <= 0 {
            continue;
        }
        let levels = 1i32 << extra;
        for c in 0..channels {
            let idx = c * MAX_BANDS + i;
            let q2 = dec.decode_raw_bits(extra as u32) as i32;
            let offset = (q2 as f32 + 0.5) / levels as f32 - 0.5;
            old_e[idx] += offset;
        }
    }
}

/// Spends leftover whole bits on one more refinement bit per band, lower
/// priority bands second.
pub fn quant_energy_finalise(
    enc: &mut RangeEncoder,
    old_e: &mut [f32],
    error: &mut [f32],
    fine_quant: &[i32],
    fine_priority: &[bool],
    mut bits_left: i32,
    channels: usize,
) {
    for prio in [false, true] {
        let mut i = 0;
        while i < MAX_BANDS && bits_left >= channels as i32 {
            if fine_quant[i] >= MAX_FINE_BITS || fine_priority[i] != prio {
                i += 1;
                continue;
            }
            for c in 0..channels {
                if bits_left <= 0 {
                    break;
                }
                let idx = c * MAX_BANDS + i;
                let q2 = i32::from(error[idx] >= 0.0);
                enc.encode_raw_bits(q2 as u32, 1);
                let offset = (q2 as f32 - 0.5) * (0.5f32).powi(fine_quant[i] + 1);
                old_e[idx] += offset;
                error[idx] -= offset;
                bits_left -= 1;
            }
            i += 1;
        }
    }
}

/// Decoder half of [`quant_energy_finalise`].
pub fn unquant_energy_finalise(
    dec: &mut RangeDecoder,
    old_e: &mut [f32],
    fine_quant: &[i32],
    fine_priority: &[bool],
    mut bits_left: i32,
    channels: usize,
) {
    for prio in [false, true] {
        let mut i = 0;
        while i < MAX_BANDS && bits_left >= channels as i32 {
            if fine_quant[i] >= MAX_FINE_BITS || fine_priority[i] != prio {
                i += 1;
                continue;
            }
            for c in 0..channels {
                if bits_left <= 0 {
                    break;
                }
                let idx = c * MAX_BANDS + i;
                let q2 = dec.decode_raw_bits(1) as i32;
                let offset = (q2 as f32 - 0.5) * (0.5f32).powi(fine_quant[i] + 1);
                old_e[idx] += offset;
                bits_left -= 1;
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_energies(channels: usize) -> Vec<f32> {
        (0..channels * MAX_BANDS)
            .map(|i| 3.0 * ((i as f32) * 0.7).sin() - 2.0)
            .collect()
    }

    fn coarse_params(budget: i32, channels: usize) -> CoarseParams {
        CoarseParams {
            lm: 3,
            channels,
            budget,
            nb_available_bytes: budget / 8,
            force_intra: false,
            two_pass: true,
            loss_rate: 0,
        }
    }

    #[test]
    fn coarse_round_trip_matches_quantized_energies() {
        for channels in [1usize, 2] {
            let band_log_e = demo_energies(channels);
            let mut old_e_enc = vec![0.0f32; channels * MAX_BANDS];
            let mut error = vec![0.0f32; channels * MAX_BANDS];
            let mut delayed_intra = 0.0f32;
            let mut enc = RangeEncoder::new(200);
            let res = quant_coarse_energy(
                &mut enc,
                &band_log_e,
                &mut old_e_enc,
                &mut error,
                &mut delayed_intra,
                &coarse_params(1600, channels),
            );
            let packet = enc.done().unwrap();

            let mut dec = RangeDecoder::new(&packet);
            let intra = dec.decode_bit(3) == 1;
            assert_eq!(intra, res.intra);
            let mut old_e_dec = vec![0.0f32; channels * MAX_BANDS];
            unquant_coarse_energy(&mut dec, &mut old_e_dec, intra, 3, channels, 1600);
            for (a, b) in old_e_enc.iter().zip(old_e_dec.iter()) {
                assert!((a - b).abs() < 1e-4, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn coarse_error_is_bounded_by_half_step() {
        let band_log_e = demo_energies(1);
        let mut old_e = vec![0.0f32; MAX_BANDS];
        let mut error = vec![0.0f32; MAX_BANDS];
        let mut delayed_intra = 0.0f32;
        let mut enc = RangeEncoder::new(200);
        quant_coarse_energy(
            &mut enc,
            &band_log_e,
            &mut old_e,
            &mut error,
            &mut delayed_intra,
            &coarse_params(1600, 1),
        );
        for &e in &error {
            assert!(e.abs() <= 0.5 + 1e-5, "residual {e}");
        }
    }

    #[test]
    fn fine_refinement_round_trips_and_tightens_error() {
        let band_log_e = demo_energies(1);
        let mut old_e_enc = vec![0.0f32; MAX_BANDS];
        let mut error = vec![0.0f32; MAX_BANDS];
        let mut delayed_intra = 0.0f32;
        let mut enc = RangeEncoder::new(300);
        let res = quant_coarse_energy(
            &mut enc,
            &band_log_e,
            &mut old_e_enc,
            &mut error,
            &mut delayed_intra,
            &coarse_params(2400, 1),
        );
        let fine_quant: Vec<i32> = (0..MAX_BANDS).map(|i| (i % 4) as i32).collect();
        let before: f32 = error.iter().map(|e| e.abs()).sum();
        quant_fine_energy(&mut enc, &mut old_e_enc, &mut error, &fine_quant, 1);
        let after: f32 = error.iter().map(|e| e.abs()).sum();
        assert!(after <= before);
        let packet = enc.done().unwrap();

        let mut dec = RangeDecoder::new(&packet);
        let intra = dec.decode_bit(3) == 1;
        assert_eq!(intra, res.intra);
        let mut old_e_dec = vec![0.0f32; MAX_BANDS];
        unquant_coarse_energy(&mut dec, &mut old_e_dec, intra, 3, 1, 2400);
        unquant_fine_energy(&mut dec, &mut old_e_dec, &fine_quant, 1);
        for (a, b) in old_e_enc.iter().zip(old_e_dec.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn finalise_round_trips() {
        let fine_quant = vec![1i32; MAX_BANDS];
        let fine_priority = vec![false; MAX_BANDS];
        let mut old_e_enc = vec![0.0f32; MAX_BANDS];
        let mut error: Vec<f32> = (0..MAX_BANDS).map(|i| 0.3 - 0.02 * i as f32).collect();
        let mut enc = RangeEncoder::new(64);
        enc.encode_bit(0, 1);
        quant_energy_finalise(
            &mut enc,
            &mut old_e_enc,
            &mut error,
            &fine_quant,
            &fine_priority,
            10,
            1,
        );
        let packet = enc.done().unwrap();
        let mut dec = RangeDecoder::new(&packet);
        dec.decode_bit(1);
        let mut old_e_dec = vec![0.0f32; MAX_BANDS];
        unquant_energy_finalise(
            &mut dec,
            &mut old_e_dec,
            &fine_quant,
            &fine_priority,
            10,
            1,
        );
        for (a, b) in old_e_enc.iter().zip(old_e_dec.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn starved_budget_still_decodes_consistently() {
        let band_log_e = demo_energies(1);
        let mut old_e_enc = vec![0.0f32; MAX_BANDS];
        let mut error = vec![0.0f32; MAX_BANDS];
        let mut delayed_intra = 0.0f32;
        let budget = 40;
        let mut enc = RangeEncoder::new((budget / 8) as usize);
        let res = quant_coarse_energy(
            &mut enc,
            &band_log_e,
            &mut old_e_enc,
            &mut error,
            &mut delayed_intra,
            &coarse_params(budget, 1),
        );
        let packet = enc.done().unwrap();
        let mut dec = RangeDecoder::new(&packet);
        let intra = dec.decode_bit(3) == 1;
        assert_eq!(intra, res.intra);
        let mut old_e_dec = vec![0.0f32; MAX_BANDS];
        unquant_coarse_energy(&mut dec, &mut old_e_dec, intra, 3, 1, budget);
        for (a, b) in old_e_enc.iter().zip(old_e_dec.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
