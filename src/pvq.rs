//! PVQ shape quantization
//!
//! Band shapes are unit vectors quantized to integer pulse vectors with a
//! fixed L1 norm, indexed by [`crate::cwrs`]. A pre-rotation spreads the
//! pulses across the band before the search so that tonal bands do not
//! collapse onto single bins; the decoder applies the inverse rotation
//! after reconstruction.

use crate::cwrs::{decode_pulses, encode_pulses};
use crate::range::{RangeDecoder, RangeEncoder};
use crate::spread::SPREAD_NONE;

/// One pass of Givens rotations at the given stride. The forward sweep
/// runs front to back, the second sweep back to front, matching the
/// inverse pass exactly when called with the opposite angle.
fn exp_rotation1(x: &mut [f32], stride: usize, c: f32, s: f32) {
    let len = x.len();
    if len <= stride {
        return;
    }
    let ms = -s;
    for i in 0..len - stride {
        let x1 = x[i];
        let x2 = x[i + stride];
        x[i + stride] = c * x2 + s * x1;
        x[i] = c * x1 + ms * x2;
    }
    for i in (0..len.saturating_sub(2 * stride)).rev() {
        let x1 = x[i];
        let x2 = x[i + stride];
        x[i + stride] = c * x2 + s * x1;
        x[i] = c * x1 + ms * x2;
    }
}

/// Spreading rotation. `dir` is +1 before quantization and -1 after
/// reconstruction; the two directions are exact inverses. `blocks` is the
/// number of interleaved short blocks in the band.
pub fn exp_rotation(x: &mut [f32], dir: i32, blocks: usize, k: usize, spread: usize) {
    let len = x.len();
    if 2 * k >= len || spread == SPREAD_NONE || len == 0 || blocks == 0 {
        return;
    }
    let factor = [15usize, 10, 5][spread - 1];
    let gain = len as f32 / (len + factor * k) as f32;
    let theta = 0.5 * gain * gain;
    let c = (0.5 * std::f32::consts::PI * theta).cos();
    let s = (0.5 * std::f32::consts::PI * theta).sin();

    // Extra long-stride pass for wide bands so energy leaks across the
    // interleaved blocks too.
    let mut stride2 = 0usize;
    if len >= 8 * blocks {
        stride2 = 1;
        while (stride2 * stride2 + stride2) * blocks + (blocks >> 2) < len {
            stride2 += 1;
        }
    }

    let sub_len = len / blocks;
    for b in 0..blocks {
        let chunk = &mut x[b * sub_len..(b + 1) * sub_len];
        if dir < 0 {
            if stride2 > 0 {
                exp_rotation1(chunk, stride2, s, c);
            }
            exp_rotation1(chunk, 1, c, s);
        } else {
            exp_rotation1(chunk, 1, c, -s);
            if stride2 > 0 {
                exp_rotation1(chunk, stride2, s, -c);
            }
        }
    }
}

/// In-place orthonormal butterfly between the two halves of each of
/// `stride` interleaved lanes. Self-inverse.
pub fn haar1(x: &mut [f32], n0: usize, stride: usize) {
    let n0 = n0 >> 1;
    const INV_SQRT2: f32 = std::f32::consts::FRAC_1_SQRT_2;
    for i in 0..stride {
        for j in 0..n0 {
            let idx0 = stride * 2 * j + i;
            let idx1 = stride * (2 * j + 1) + i;
            let tmp1 = INV_SQRT2 * x[idx0];
            let tmp2 = INV_SQRT2 * x[idx1];
            x[idx0] = tmp1 + tmp2;
            x[idx1] = tmp1 - tmp2;
        }
    }
}

/// Projects a shape onto the pulse lattice: scale to L1 norm `k`, round,
/// then greedily add or drop pulses where the rounding error is largest.
fn vector_to_pulses(x: &[f32], k: usize) -> Vec<i32> {
    let n = x.len();
    let mut pulses = vec![0i32; n];
    if n == 0 || k == 0 {
        return pulses;
    }

    let l1: f32 = x.iter().map(|v| v.abs()).sum();
    if l1 < 1e-15 {
        pulses[0] = k as i32;
        return pulses;
    }

    let scale = k as f32 / l1;
    let mut errors = vec![0.0f32; n];
    let mut current = 0usize;
    for i in 0..n {
        let scaled = (x[i] * scale).abs();
        let rounded = (scaled + 0.5).floor() as i32;
        pulses[i] = if x[i] < 0.0 { -rounded } else { rounded };
        current += rounded as usize;
        errors[i] = scaled - rounded as f32;
    }

    while current < k {
        let mut best = 0usize;
        let mut best_err = f32::NEG_INFINITY;
        for (i, &e) in errors.iter().enumerate() {
            if e > best_err {
                best_err = e;
                best = i;
            }
        }
        if pulses[best] >= 0 {
            pulses[best] += 1;
        } else {
            pulses[best] -= 1;
        }
        errors[best] -= 1.0;
        current += 1;
    }
    while current > k {
        let mut best = None;
        let mut best_err = f32::INFINITY;
        for (i, &e) in errors.iter().enumerate() {
            if pulses[i] != 0 && e < best_err {
                best_err = e;
                best = Some(i);
            }
        }
        let Some(best) = best else { break };
        if pulses[best] > 0 {
            pulses[best] -= 1;
        } else {
            pulses[best] += 1;
        }
        errors[best] += 1.0;
        current -= 1;
    }

    pulses
}

/// One bit per interleaved block that received any pulse. Bands whose
/// mask is zero for a block carry no energy there after denormalization.
pub fn extract_collapse_mask(pulses: &[i32], blocks: usize) -> u32 {
    if blocks <= 1 {
        return 1;
    }
    let n = pulses.len();
    let n0 = n / blocks;
    if n0 == 0 {
        return 1;
    }
    let mut mask = 0u32;
    for b in 0..blocks {
        if pulses[b * n0..(b + 1) * n0].iter().any(|&p| p != 0) {
            mask |= 1 << b;
        }
    }
    mask
}

fn normalize_residual(pulses: &[i32], out: &mut [f32], gain: f32) {
    let energy: f32 = pulses.iter().map(|&p| (p * p) as f32).sum();
    if energy <= 0.0 {
        out.fill(0.0);
        return;
    }
    let scale = gain / energy.sqrt();
    for (o, &p) in out.iter_mut().zip(pulses.iter()) {
        *o = p as f32 * scale;
    }
}

/// Quantizes one band shape to `k` pulses and writes the codeword.
/// `x` is replaced by the reconstruction the decoder will produce, so the
/// encoder's folding and energy state stay in sync. Returns the collapse
/// mask over `blocks`.
pub fn alg_quant(
    enc: &mut RangeEncoder,
    x: &mut [f32],
    k: usize,
    spread: usize,
    blocks: usize,
    gain: f32,
) -> u32 {
    if k == 0 || x.is_empty() {
        x.fill(0.0);
        return 0;
    }
    exp_rotation(x, 1, blocks, k, spread);
    let pulses = vector_to_pulses(x, k);
    encode_pulses(enc, &pulses, k);
    let cm = extract_collapse_mask(&pulses, blocks);
    normalize_residual(&pulses, x, gain);
    exp_rotation(x, -1, blocks, k, spread);
    cm
}

/// Decodes one band shape: read the codeword, rebuild the unit vector at
/// the requested gain, undo the spreading rotation.
pub fn alg_unquant(
    dec: &mut RangeDecoder,
    x: &mut [f32],
    k: usize,
    spread: usize,
    blocks: usize,
    gain: f32,
) -> u32 {
    if k == 0 || x.is_empty() {
        x.fill(0.0);
        return 0;
    }
    let mut pulses = vec![0i32; x.len()];
    decode_pulses(dec, &mut pulses, k);
    let cm = extract_collapse_mask(&pulses, blocks);
    normalize_residual(&pulses, x, gain);
    exp_rotation(x, -1, blocks, k, spread);
    cm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spread::{SPREAD_AGGRESSIVE, SPREAD_LIGHT, SPREAD_NORMAL};

    fn pseudo_vector(n: usize, seed: u32) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let h = (i as u32).wrapping_add(seed).wrapping_mul(2654435761);
                ((h >> 16) & 0xffff) as f32 / 65535.0 - 0.5
            })
            .collect()
    }

    fn normalize(x: &mut [f32]) {
        let e: f32 = x.iter().map(|v| v * v).sum();
        let g = 1.0 / e.sqrt().max(1e-15);
        for v in x {
            *v *= g;
        }
    }

    #[test]
    fn rotation_round_trips() {
        for &spread in &[SPREAD_LIGHT, SPREAD_NORMAL, SPREAD_AGGRESSIVE] {
            for &(n, blocks, k) in &[(16usize, 1usize, 4usize), (32, 2, 6), (64, 4, 10)] {
                let original = pseudo_vector(n, 7);
                let mut x = original.clone();
                exp_rotation(&mut x, 1, blocks, k, spread);
                exp_rotation(&mut x, -1, blocks, k, spread);
                for (a, b) in x.iter().zip(original.iter()) {
                    assert!((a - b).abs() < 1e-5, "spread={spread} n={n}");
                }
            }
        }
    }

    #[test]
    fn rotation_skipped_when_pulses_dominate() {
        let original = pseudo_vector(8, 3);
        let mut x = original.clone();
        exp_rotation(&mut x, 1, 1, 4, SPREAD_NORMAL);
        assert_eq!(x, original);
        exp_rotation(&mut x, 1, 1, 2, SPREAD_NONE);
        assert_eq!(x, original);
    }

    #[test]
    fn haar1_is_self_inverse() {
        let original = pseudo_vector(32, 11);
        let mut x = original.clone();
        haar1(&mut x, 16, 2);
        haar1(&mut x, 16, 2);
        for (a, b) in x.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn pulse_projection_hits_l1_target() {
        for k in [1usize, 3, 7, 20] {
            for seed in 0..8 {
                let mut x = pseudo_vector(24, seed);
                normalize(&mut x);
                let pulses = vector_to_pulses(&x, k);
                let l1: i32 = pulses.iter().map(|p| p.abs()).sum();
                assert_eq!(l1 as usize, k, "k={k} seed={seed}");
                for (p, v) in pulses.iter().zip(x.iter()) {
                    if *p != 0 {
                        assert_eq!(*p > 0, *v >= 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn pulse_projection_degenerate_input() {
        let x = vec![0.0f32; 6];
        let pulses = vector_to_pulses(&x, 5);
        assert_eq!(pulses[0], 5);
        assert!(pulses[1..].iter().all(|&p| p == 0));
    }

    #[test]
    fn collapse_mask_flags_energetic_blocks() {
        let pulses = [0, 0, 0, 0, 2, -1, 0, 0];
        assert_eq!(extract_collapse_mask(&pulses, 2), 0b10);
        assert_eq!(extract_collapse_mask(&pulses, 1), 1);
        assert_eq!(extract_collapse_mask(&[1, 0, 0, 0, 0, 0, 0, -3], 4), 0b1001);
    }

    #[test]
    fn quant_unquant_agree_bit_for_bit() {
        let cases: &[(usize, usize, usize, usize)] = &[
            (16, 4, SPREAD_NORMAL, 1),
            (24, 8, SPREAD_LIGHT, 2),
            (32, 3, SPREAD_AGGRESSIVE, 4),
            (8, 1, SPREAD_NONE, 1),
        ];
        let mut enc = RangeEncoder::new(256);
        let mut reference = Vec::new();
        for (i, &(n, k, spread, blocks)) in cases.iter().enumerate() {
            let mut x = pseudo_vector(n, i as u32);
            normalize(&mut x);
            let cm = alg_quant(&mut enc, &mut x, k, spread, blocks, 1.0);
            reference.push((x, cm));
        }
        let packet = enc.done().unwrap();
        let mut dec = RangeDecoder::new(&packet);
        for (i, &(n, k, spread, blocks)) in cases.iter().enumerate() {
            let mut y = vec![0.0f32; n];
            let cm = alg_unquant(&mut dec, &mut y, k, spread, blocks, 1.0);
            let (ref x, ref_cm) = reference[i];
            assert_eq!(cm, ref_cm, "case {i}");
            for (a, b) in x.iter().zip(y.iter()) {
                assert_eq!(a.to_bits(), b.to_bits(), "case {i}");
            }
        }
    }

    #[test]
    fn reconstruction_has_requested_gain() {
        let mut enc = RangeEncoder::new(64);
        let mut x = pseudo_vector(20, 5);
        normalize(&mut x);
        alg_quant(&mut enc, &mut x, 6, SPREAD_NORMAL, 1, 1.0);
        let e: f32 = x.iter().map(|v| v * v).sum();
        assert!((e.sqrt() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn zero_pulses_zero_the_band() {
        let mut enc = RangeEncoder::new(8);
        let mut x = pseudo_vector(12, 1);
        let cm = alg_quant(&mut enc, &mut x, 0, SPREAD_NORMAL, 1, 1.0);
        assert_eq!(cm, 0);
        assert!(x.iter().all(|&v| v == 0.0));
    }
}
