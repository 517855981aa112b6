//! Windowed MDCT analysis and synthesis
//!
//! Forward and inverse modified DCT with a low-overlap Vorbis window.
//! The window covers only the first and last 120 samples of each block;
//! the interior passes through unwindowed, with zero padding folded into
//! the transform phase. Forward output carries a 2/N scale so the
//! unscaled inverse plus weighted overlap-add reconstructs the input.
//!
//! Transient frames split into 2/4/8 short blocks of 120 samples whose
//! coefficients interleave across the frame, so bin k of block b lands
//! at index `b + k * blocks`.

use lazy_static::lazy_static;

use crate::tables::OVERLAP;

lazy_static! {
    /// Vorbis power-complementary window over the overlap region.
    pub static ref WINDOW: [f32; OVERLAP] = {
        let mut w = [0.0f32; OVERLAP];
        for (i, out) in w.iter_mut().enumerate() {
            let x = std::f64::consts::FRAC_PI_2 * (i as f64 + 0.5) / OVERLAP as f64;
            *out = (std::f64::consts::FRAC_PI_2 * x.sin() * x.sin()).sin() as f32;
        }
        w
    };

    /// Cosine basis per block size, laid out as [k][t] with t in 0..2N.
    static ref BASIS: [Vec<f32>; 4] = [
        make_basis(120),
        make_basis(240),
        make_basis(480),
        make_basis(960),
    ];
}

fn make_basis(n: usize) -> Vec<f32> {
    let mut basis = vec![0.0f32; n * 2 * n];
    let nf = n as f64;
    for k in 0..n {
        for t in 0..2 * n {
            let phase =
                std::f64::consts::PI / nf * (t as f64 + 0.5 + nf / 2.0) * (k as f64 + 0.5);
            basis[k * 2 * n + t] = phase.cos() as f32;
        }
    }
    basis
}

fn basis_for(n: usize) -> &'static [f32] {
    match n {
        120 => &BASIS[0],
        240 => &BASIS[1],
        480 => &BASIS[2],
        _ => &BASIS[3],
    }
}

/// Forward transform. `x` holds the previous frame's overlap tail followed
/// by the current frame, `x.len() == out.len() + OVERLAP`. With
/// `blocks > 1` the frame splits into short blocks whose coefficients are
/// interleaved in `out`.
pub fn mdct_forward(x: &[f32], out: &mut [f32], blocks: usize) {
    let n = out.len();
    let nb = n / blocks;
    let pad = (nb - OVERLAP) / 2;
    let window = &*WINDOW;
    let basis = basis_for(nb);
    let mut buf = vec![0.0f32; 2 * nb];
    for b in 0..blocks {
        let seg = &x[b * nb..b * nb + nb + OVERLAP];
        for v in buf.iter_mut() {
            *v = 0.0;
        }
        for i in 0..OVERLAP {
            buf[pad + i] = seg[i] * window[i];
            buf[pad + nb + i] = seg[nb + i] * window[OVERLAP - 1 - i];
        }
        for j in 0..nb - OVERLAP {
            buf[pad + OVERLAP + j] = seg[OVERLAP + j];
        }
        let scale = 2.0 / nb as f32;
        for k in 0..nb {
            let row = &basis[k * 2 * nb..(k + 1) * 2 * nb];
            let mut acc = 0.0f32;
            for (v, c) in buf.iter().zip(row.iter()) {
                acc += v * c;
            }
            out[b + k * blocks] = acc * scale;
        }
    }
}

/// Inverse transform with weighted overlap-add. Writes one frame of
/// samples and updates the persistent overlap tail carried between
/// frames.
pub fn mdct_inverse(coeffs: &[f32], out: &mut [f32], overlap_mem: &mut [f32], blocks: usize) {
    let n = coeffs.len();
    let nb = n / blocks;
    let pad = (nb - OVERLAP) / 2;
    let window = &*WINDOW;
    let basis = basis_for(nb);
    let mut work = vec![0.0f32; n + OVERLAP];
    let mut u = vec![0.0f32; 2 * nb];
    for b in 0..blocks {
        for v in u.iter_mut() {
            *v = 0.0;
        }
        for k in 0..nb {
            let c = coeffs[b + k * blocks];
            if c == 0.0 {
                continue;
            }
            let row = &basis[k * 2 * nb..(k + 1) * 2 * nb];
            for (acc, basis_val) in u.iter_mut().zip(row.iter()) {
                *acc += c * basis_val;
            }
        }
        // Windowed accumulation; interior block seams overlap-add here,
        // the frame seam goes through overlap_mem below.
        for j in 0..nb + OVERLAP {
            let w = if j < OVERLAP {
                window[j]
            } else if j < nb {
                1.0
            } else {
                window[nb + OVERLAP - 1 - j]
            };
            work[b * nb + j] += u[pad + j] * w;
        }
    }
    out.copy_from_slice(&work[..n]);
    for (o, m) in out.iter_mut().zip(overlap_mem.iter()) {
        *o += *m;
    }
    overlap_mem.copy_from_slice(&work[n..n + OVERLAP]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_chain(signal: &[f32], frame: usize, blocks: usize) -> Vec<f32> {
        let frames = signal.len() / frame - 1;
        let mut out = vec![0.0f32; frames * frame];
        let mut mem = vec![0.0f32; OVERLAP];
        let mut coeffs = vec![0.0f32; frame];
        for f in 0..frames {
            mdct_forward(&signal[f * frame..f * frame + frame + OVERLAP], &mut coeffs, blocks);
            mdct_inverse(&coeffs, &mut out[f * frame..(f + 1) * frame], &mut mem, blocks);
        }
        out
    }

    #[test]
    fn window_is_power_complementary() {
        for i in 0..OVERLAP {
            let sum = WINDOW[i] * WINDOW[i] + WINDOW[OVERLAP - 1 - i] * WINDOW[OVERLAP - 1 - i];
            assert!((sum - 1.0).abs() < 1e-6, "i={i} sum={sum}");
        }
        // Strictly increasing over the ramp.
        for i in 1..OVERLAP {
            assert!(WINDOW[i] > WINDOW[i - 1]);
        }
    }

    #[test]
    fn silence_transforms_to_zero() {
        let x = vec![0.0f32; 960 + OVERLAP];
        let mut coeffs = vec![1.0f32; 960];
        mdct_forward(&x, &mut coeffs, 1);
        assert!(coeffs.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn long_block_reconstructs_after_warmup() {
        for frame in [120usize, 480, 960] {
            let total = 4 * frame + OVERLAP;
            let signal: Vec<f32> = (0..total)
                .map(|i| 0.6 * (i as f32 * 0.031).sin() + 0.3 * (i as f32 * 0.173).cos())
                .collect();
            let out = run_chain(&signal, frame, 1);
            // First frame's head ramps in from empty overlap memory.
            for j in OVERLAP..out.len() {
                assert!(
                    (out[j] - signal[j]).abs() < 1e-3,
                    "frame {frame} sample {j}: {} vs {}",
                    out[j],
                    signal[j]
                );
            }
        }
    }

    #[test]
    fn short_blocks_reconstruct_after_warmup() {
        let frame = 960usize;
        let total = 3 * frame + OVERLAP;
        let signal: Vec<f32> = (0..total).map(|i| (i as f32 * 0.11).sin()).collect();
        let out = run_chain(&signal, frame, 8);
        for j in OVERLAP..out.len() {
            assert!(
                (out[j] - signal[j]).abs() < 1e-3,
                "sample {j}: {} vs {}",
                out[j],
                signal[j]
            );
        }
    }

    #[test]
    fn short_block_impulse_stays_local() {
        // An impulse in the final short block cannot reach the leading
        // blocks; their interleaved coefficient lanes stay zero.
        let frame = 960usize;
        let mut x = vec![0.0f32; frame + OVERLAP];
        x[frame + OVERLAP / 2] = 1.0;
        let mut coeffs = vec![0.0f32; frame];
        mdct_forward(&x, &mut coeffs, 8);
        for k in 0..frame / 8 {
            for b in 0..6 {
                assert_eq!(coeffs[b + k * 8], 0.0, "block {b} bin {k}");
            }
        }
    }
}
