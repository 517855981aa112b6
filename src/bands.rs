//! Band energy computation, normalization and denormalization
//!
//! Splits the MDCT spectrum into critical bands, measures each band's
//! amplitude, and converts between the unit-norm shape vectors the PVQ
//! layer codes and the full-scale spectrum the transform produces. Band
//! energies travel separately in log2 units with per-band means removed.

use crate::alloc::Allocation;
use crate::modes::Mode;
use crate::pvq::{alg_quant, alg_unquant, haar1};
use crate::range::{RangeDecoder, RangeEncoder};
use crate::tables::{bits_to_pulses, get_pulses, E_MEANS, MAX_BANDS};

/// Amplitude floor, matching the epsilon folded into every sum of squares.
const EPSILON: f32 = 1e-27;

/// Per-band L2 amplitudes of one channel's spectrum.
pub fn compute_band_amplitudes(mode: &Mode, coeffs: &[f32], band_e: &mut [f32]) {
    for band in 0..MAX_BANDS {
        let start = mode.band_start(band);
        let width = mode.band_width(band);
        let mut sum = EPSILON;
        for &x in &coeffs[start..start + width] {
            sum += x * x;
        }
        band_e[band] = sum.sqrt();
    }
}

/// Converts linear amplitudes to the mean-removed log2 domain used by the
/// energy coder.
pub fn amplitudes_to_log(band_e: &[f32], band_log_e: &mut [f32]) {
    for band in 0..MAX_BANDS {
        band_log_e[band] = band_e[band].log2() - E_MEANS[band];
    }
}

/// Scales each band to unit L2 norm in place of `norm`.
pub fn normalize_bands(mode: &Mode, coeffs: &[f32], band_e: &[f32], norm: &mut [f32]) {
    for band in 0..MAX_BANDS {
        let start = mode.band_start(band);
        let width = mode.band_width(band);
        let g = 1.0 / band_e[band].max(EPSILON);
        for j in start..start + width {
            norm[j] = coeffs[j] * g;
        }
    }
}

/// Rebuilds the spectrum from unit-norm shapes and log energies. The gain
/// exponent is capped at 32 to keep corrupt packets from overflowing.
pub fn denormalize_bands(mode: &Mode, norm: &[f32], band_log_e: &[f32], coeffs: &mut [f32]) {
    for band in 0..MAX_BANDS {
        let start = mode.band_start(band);
        let width = mode.band_width(band);
        let e = (band_log_e[band] + E_MEANS[band]).min(32.0);
        let gain = e.exp2();
        for j in start..start + width {
            coeffs[j] = norm[j] * gain;
        }
    }
}

fn renormalize(x: &mut [f32]) {
    let e: f32 = x.iter().map(|v| v * v).sum();
    let g = 1.0 / (EPSILON + e.sqrt());
    for v in x.iter_mut() {
        *v *= g;
    }
}

/// Time-frequency remap ahead of shape coding. Positive `tf_change`
/// merges short blocks for finer frequency resolution, negative splits a
/// long block for finer time resolution. Returns the effective block
/// count plus the step counts needed to undo the remap.
fn tf_remap_forward(x: &mut [f32], blocks: usize, tf_change: i32) -> (usize, usize, usize) {
    let n = x.len();
    let mut b = blocks;
    let mut n_b = n / blocks;
    let mut recombine = 0usize;
    if tf_change > 0 {
        recombine = (tf_change as usize).min(b.trailing_zeros() as usize);
        for k in 0..recombine {
            if n >> k < 2 {
                recombine = k;
                break;
            }
            haar1(x, n >> k, 1 << k);
        }
        b >>= recombine;
        n_b <<= recombine;
    }
    let mut time_divide = 0usize;
    let mut tc = tf_change.min(0);
    while n_b & 1 == 0 && tc < 0 {
        haar1(x, n_b, b);
        b <<= 1;
        n_b >>= 1;
        tc += 1;
        time_divide += 1;
    }
    (b, time_divide, recombine)
}

/// Undoes [`tf_remap_forward`]; each butterfly is its own inverse, so the
/// steps replay in reverse order.
fn tf_remap_inverse(x: &mut [f32], blocks_after: usize, time_divide: usize, recombine: usize) {
    let n = x.len();
    let mut b = blocks_after;
    let mut n_b = n / b;
    for _ in 0..time_divide {
        b >>= 1;
        n_b <<= 1;
        haar1(x, n_b, b);
    }
    for k in (0..recombine).rev() {
        haar1(x, n >> k, 1 << k);
    }
}

fn band_pulses(band: usize, lm: usize, bits_q3: i32) -> i32 {
    get_pulses(bits_to_pulses(band, lm, bits_q3))
}

fn quant_band_encode(
    enc: &mut RangeEncoder,
    band: usize,
    x: &mut [f32],
    bits_q3: i32,
    blocks: usize,
    spread: usize,
    tf_change: i32,
    lm: usize,
) {
    if x.len() == 1 {
        // Single-bin band: the shape is just a sign.
        if bits_q3 >= 1 << 3 {
            let y = [if x[0] < 0.0 { -1i32 } else { 1 }];
            crate::cwrs::encode_pulses(enc, &y, 1);
            x[0] = y[0] as f32;
        } else {
            x[0] = 0.0;
        }
        return;
    }
    let (b, time_divide, recombine) = tf_remap_forward(x, blocks, tf_change);
    let k = band_pulses(band, lm, bits_q3);
    if k > 0 {
        alg_quant(enc, x, k as usize, spread, b, 1.0);
    } else {
        x.fill(0.0);
    }
    tf_remap_inverse(x, b, time_divide, recombine);
}

fn quant_band_decode(
    dec: &mut RangeDecoder,
    band: usize,
    x: &mut [f32],
    bits_q3: i32,
    blocks: usize,
    spread: usize,
    tf_change: i32,
    lm: usize,
) {
    if x.len() == 1 {
        if bits_q3 >= 1 << 3 {
            let mut y = [0i32];
            crate::cwrs::decode_pulses(dec, &mut y, 1);
            x[0] = y[0] as f32;
        } else {
            x[0] = 0.0;
        }
        return;
    }
    let (b, time_divide, recombine) = tf_remap_forward(x, blocks, tf_change);
    let k = band_pulses(band, lm, bits_q3);
    if k > 0 {
        alg_unquant(dec, x, k as usize, spread, b, 1.0);
    } else {
        x.fill(0.0);
    }
    tf_remap_inverse(x, b, time_divide, recombine);
}

/// Per-band bit budget inside the shape loop: the allocated bits plus a
/// share of the running balance, clamped to what the coder can still
/// spend.
fn band_bits(alloc: &Allocation, band: usize, balance: i32, remaining_q3: i32) -> i32 {
    if band >= alloc.coded_bands {
        return 0;
    }
    let curr = balance / 3.min(alloc.coded_bands - band) as i32;
    (alloc.band_bits[band] + curr)
        .min(remaining_q3 + 1)
        .clamp(0, 16383)
}

/// Codes every band's shape. `norm` holds `channels` planes of normalized
/// coefficients and is rewritten with the quantized shapes the decoder
/// will see. Stereo codes the channels separately on half budgets below
/// the intensity threshold and a single shared shape above it.
#[allow(clippy::too_many_arguments)]
pub fn quant_all_bands_encode(
    enc: &mut RangeEncoder,
    mode: &Mode,
    norm: &mut [f32],
    alloc: &Allocation,
    tf_res: &[i32; MAX_BANDS],
    spread: usize,
    short_blocks: usize,
    total_bits_q3: i32,
    channels: usize,
) {
    let n0 = mode.num_bins();
    let lm = mode.lm;
    let mut balance = alloc.balance;
    for i in 0..MAX_BANDS {
        let start = mode.band_start(i);
        let width = mode.band_width(i);
        let tell = enc.tell_frac();
        if i != 0 {
            balance -= tell;
        }
        let remaining = total_bits_q3 - tell - 1;
        let b = band_bits(alloc, i, balance, remaining);

        if i >= alloc.coded_bands {
            for c in 0..channels {
                norm[c * n0 + start..c * n0 + start + width].fill(0.0);
            }
        } else if channels == 2 && alloc.intensity > 0 && i >= alloc.intensity {
            let (left, right) = norm.split_at_mut(n0);
            let x = &mut left[start..start + width];
            let y = &mut right[start..start + width];
            for (xv, yv) in x.iter_mut().zip(y.iter()) {
                *xv += *yv;
            }
            renormalize(x);
            quant_band_encode(enc, i, x, b, short_blocks, spread, tf_res[i], lm);
            y.copy_from_slice(x);
        } else if channels == 2 {
            let (left, right) = norm.split_at_mut(n0);
            let x = &mut left[start..start + width];
            let y = &mut right[start..start + width];
            quant_band_encode(enc, i, x, b / 2, short_blocks, spread, tf_res[i], lm);
            quant_band_encode(enc, i, y, b / 2, short_blocks, spread, tf_res[i], lm);
        } else {
            let x = &mut norm[start..start + width];
            quant_band_encode(enc, i, x, b, short_blocks, spread, tf_res[i], lm);
        }

        balance += alloc.band_bits[i] + tell;
    }
}

/// Decoder half of [`quant_all_bands_encode`]; reconstructs the unit-norm
/// shapes into `norm`.
#[allow(clippy::too_many_arguments)]
pub fn quant_all_bands_decode(
    dec: &mut RangeDecoder,
    mode: &Mode,
    norm: &mut [f32],
    alloc: &Allocation,
    tf_res: &[i32; MAX_BANDS],
    spread: usize,
    short_blocks: usize,
    total_bits_q3: i32,
    channels: usize,
) {
    let n0 = mode.num_bins();
    let lm = mode.lm;
    let mut balance = alloc.balance;
    for i in 0..MAX_BANDS {
        let start = mode.band_start(i);
        let width = mode.band_width(i);
        let tell = dec.tell_frac();
        if i != 0 {
            balance -= tell;
        }
        let remaining = total_bits_q3 - tell - 1;
        let b = band_bits(alloc, i, balance, remaining);

        if i >= alloc.coded_bands {
            for c in 0..channels {
                norm[c * n0 + start..c * n0 + start + width].fill(0.0);
            }
        } else if channels == 2 && alloc.intensity > 0 && i >= alloc.intensity {
            let (left, right) = norm.split_at_mut(n0);
            let x = &mut left[start..start + width];
            quant_band_decode(dec, i, x, b, short_blocks, spread, tf_res[i], lm);
            right[start..start + width].copy_from_slice(x);
        } else if channels == 2 {
            let (left, right) = norm.split_at_mut(n0);
            let x = &mut left[start..start + width];
            let y = &mut right[start..start + width];
            quant_band_decode(dec, i, x, b / 2, short_blocks, spread, tf_res[i], lm);
            quant_band_decode(dec, i, y, b / 2, short_blocks, spread, tf_res[i], lm);
        } else {
            let x = &mut norm[start..start + width];
            quant_band_decode(dec, i, x, b, short_blocks, spread, tf_res[i], lm);
        }

        balance += alloc.band_bits[i] + tell;
    }
}
