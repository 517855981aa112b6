//! Combinatorial pulse-vector indexing
//!
//! Bijection between integer vectors of dimension N with L1 norm K and
//! indices in [0, V(N, K)), where V counts such vectors. Codewords are
//! enumerated position by position with the usual U/V recurrences; rows
//! of U are computed on the fly and stepped up and down with `unext` /
//! `uprev` rather than held in a static table.

use crate::range::{RangeDecoder, RangeEncoder};

/// Steps a U row forward: u[i][j] = u[i-1][j] + u[i][j-1] + u[i-1][j-1].
fn unext(u: &mut [u32], mut u0: u32) {
    let len = u.len();
    if len < 2 {
        return;
    }
    for j in 1..len {
        let u1 = u[j] + u[j - 1] + u0;
        u[j - 1] = u0;
        u0 = u1;
    }
    u[len - 1] = u0;
}

/// Inverse of [`unext`].
fn uprev(u: &mut [u32], mut u0: u32) {
    let len = u.len();
    if len < 2 {
        return;
    }
    for j in 1..len {
        let u1 = u[j] - u[j - 1] - u0;
        u[j - 1] = u0;
        u0 = u1;
    }
    u[len - 1] = u0;
}

/// Fills `u[0..=k+1]` with U(n, 0..=k+1) and returns V(n, k).
fn ncwrs_urow(n: usize, k: usize, u: &mut [u32]) -> u32 {
    debug_assert!(n >= 2 && k > 0 && u.len() >= k + 2);
    u[0] = 0;
    u[1] = 1;
    for j in 2..k + 2 {
        u[j] = ((j as u32) << 1) - 1;
    }
    for _ in 2..n {
        unext(&mut u[1..k + 2], 1);
    }
    u[k] + u[k + 1]
}

/// Number of vectors of dimension `n` with L1 norm exactly `k`.
pub fn pvq_v(n: usize, k: usize) -> u32 {
    if k == 0 {
        return 1;
    }
    if n == 0 {
        return 0;
    }
    if n == 1 {
        return 2;
    }
    let mut u = vec![0u32; k + 2];
    ncwrs_urow(n, k, &mut u)
}

fn find_largest_le(u: &[u32], hi: usize, target: u32) -> usize {
    if hi == 0 {
        return 0;
    }
    let mut hi = hi.min(u.len() - 1);
    if target >= u[hi] {
        return hi;
    }
    let mut lo = 0;
    while lo < hi {
        let mid = (lo + hi + 1) >> 1;
        if u[mid] <= target {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Decodes index `i` into the pulse vector `y` (length n, L1 norm k).
fn cwrsi(n: usize, k: usize, mut i: u32, y: &mut [i32], u: &mut [u32]) {
    let mut k = k;
    for j in 0..n {
        let p = u[k + 1];
        let mut sign = false;
        if i >= p {
            sign = true;
            i -= p;
        }
        let k0 = k;
        k = find_largest_le(u, k, i);
        i -= u[k];
        let yj = (k0 - k) as i32;
        y[j] = if sign { -yj } else { yj };
        uprev(&mut u[..k + 2], 0);
    }
}

fn abs_u(y: i32) -> usize {
    y.unsigned_abs() as usize
}

/// Encodes pulse vector `y` (L1 norm k) into its index; also returns
/// V(n, k) as the total codebook size.
fn icwrs(n: usize, k: usize, y: &[i32], u: &mut [u32]) -> (u32, u32) {
    debug_assert!(n >= 2 && k > 0);
    u[0] = 0;
    for (kk, v) in u.iter_mut().enumerate().take(k + 2).skip(1) {
        *v = ((kk as u32) << 1) - 1;
    }
    let mut i: u32 = u32::from(y[n - 1] < 0);
    let mut k1 = abs_u(y[n - 1]);
    let mut j = n - 2;
    i += u[k1];
    k1 += abs_u(y[j]);
    if y[j] < 0 {
        i += u[k1 + 1];
    }
    while j > 0 {
        j -= 1;
        unext(&mut u[..k + 2], 0);
        i += u[k1];
        k1 += abs_u(y[j]);
        if y[j] < 0 {
            i += u[k1 + 1];
        }
    }
    (i, u[k1] + u[k1 + 1])
}

/// Writes the codeword for `y` as a uniform symbol over V(n, k).
pub fn encode_pulses(enc: &mut RangeEncoder, y: &[i32], k: usize) {
    let n = y.len();
    if k == 0 {
        return;
    }
    if n == 1 {
        enc.encode_uniform(u32::from(y[0] < 0), 2);
        return;
    }
    let mut u = vec![0u32; k + 2];
    let (index, total) = icwrs(n, k, y, &mut u);
    enc.encode_uniform(index, total);
}

/// Reads a codeword and reconstructs the pulse vector into `y`.
pub fn decode_pulses(dec: &mut RangeDecoder, y: &mut [i32], k: usize) {
    let n = y.len();
    if k == 0 {
        y.fill(0);
        return;
    }
    if n == 1 {
        let sign = dec.decode_uniform(2);
        y[0] = if sign == 1 { -(k as i32) } else { k as i32 };
        return;
    }
    let mut u = vec![0u32; k + 2];
    let total = ncwrs_urow(n, k, &mut u);
    let i = dec.decode_uniform(total);
    cwrsi(n, k, i, y, &mut u);
}
