//! Bit allocation engine
//!
//! Splits the frame's remaining budget across bands in 1/8-bit units.
//! The static allocation curve (11 quality rows) is searched and
//! interpolated to fit the budget; per-band boosts from the dynalloc
//! analysis and the trim parameter tilt it; the tail bands can be
//! skipped one at a time with explicitly coded bits. Stereo frames
//! reserve bits for the intensity threshold and the dual-stereo flag.
//!
//! All quantities named `*_q3` or held in `Allocation` are eighth-bits.

use crate::energy::MAX_FINE_BITS;
use crate::modes::Mode;
use crate::range::{RangeDecoder, RangeEncoder};
use crate::tables::{BAND_ALLOCATION, CACHE_CAPS, EBANDS, LOG2_FRAC_TABLE, LOG_N, MAX_BANDS};

const BIT_RES: i32 = 3;
const ALLOC_STEPS: i32 = 6;
const FINE_OFFSET: i32 = 21;

/// Result of the allocation: shape bits, fine-energy bits and the stereo
/// decisions that were coded along the way.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// PVQ shape budget per band, eighth-bits.
    pub band_bits: [i32; MAX_BANDS],
    /// Fine energy bits per band (whole bits, max [`MAX_FINE_BITS`]).
    pub fine_bits: [i32; MAX_BANDS],
    /// Bands whose fine bits already met their target get low priority
    /// for the finalise pass.
    pub fine_priority: [bool; MAX_BANDS],
    /// Bands actually coded; bands above this are skipped.
    pub coded_bands: usize,
    /// Unspent eighth-bits carried into the shape coder.
    pub balance: i32,
    /// First band coded in intensity stereo (0 disables).
    pub intensity: usize,
    pub dual_stereo: bool,
}

/// Hard per-band ceilings on shape bits, eighth-bit units.
pub fn init_caps(mode: &Mode, channels: usize) -> [i32; MAX_BANDS] {
    let row = 2 * mode.lm + (channels - 1);
    let mut caps = [0i32; MAX_BANDS];
    for (i, cap) in caps.iter_mut().enumerate() {
        let n = mode.band_width(i) as i32;
        *cap = (CACHE_CAPS[MAX_BANDS * row + i] as i32 + 64) * channels as i32 * n >> 2;
    }
    caps
}

/// Per-band outputs of the dynalloc analysis.
#[derive(Debug, Clone)]
pub struct DynallocResult {
    /// Boost step counts per band, fed to [`encode_boosts`].
    pub offsets: [i32; MAX_BANDS],
    /// Rounded 13·2^follower weights; diagnostic only in this codec.
    pub importance: [i32; MAX_BANDS],
    /// Peak band level above the noise floor, log2 units.
    pub max_depth: f32,
}

fn median_of_3(x: &[f32]) -> f32 {
    let (t0, t1) = if x[0] > x[1] { (x[1], x[0]) } else { (x[0], x[1]) };
    let t2 = x[2];
    if t1 < t2 {
        t1
    } else if t0 < t2 {
        t2
    } else {
        t0
    }
}

fn median_of_5(x: &[f32]) -> f32 {
    let t2 = x[2];
    let (mut t0, mut t1) = if x[0] > x[1] { (x[1], x[0]) } else { (x[0], x[1]) };
    let (mut t3, mut t4) = if x[3] > x[4] { (x[4], x[3]) } else { (x[3], x[4]) };
    if t0 > t3 {
        std::mem::swap(&mut t0, &mut t3);
        std::mem::swap(&mut t1, &mut t4);
    }
    if t2 > t1 {
        if t1 < t3 {
            t2.min(t3)
        } else {
            t4.min(t1)
        }
    } else if t2 < t3 {
        t1.min(t3)
    } else {
        t2.min(t4)
    }
}

fn noise_floor(band: usize, lsb_depth: i32) -> f32 {
    0.0625 * LOG_N[band] as f32 + 0.5 + (9 - lsb_depth) as f32
        - crate::tables::E_MEANS[band]
        + 0.0062 * ((band + 5) * (band + 5)) as f32
}

/// Finds bands that stick out of the smoothed spectral envelope and
/// assigns them boost steps. `band_log_e` holds `channels` planes of
/// 21 log-energies; `band_log_e2` feeds the follower smoothing and
/// carries the long-block energies on transient frames (otherwise it
/// equals `band_log_e`); `old_band_e` is the previous frame's quantized
/// envelope (used to stabilize 2.5 ms frames).
pub fn dynalloc_analysis(
    mode: &Mode,
    band_log_e: &[f32],
    band_log_e2: &[f32],
    old_band_e: &[f32],
    channels: usize,
    lsb_depth: i32,
    effective_bytes: i32,
    is_transient: bool,
) -> DynallocResult {
    let mut result = DynallocResult {
        offsets: [0; MAX_BANDS],
        importance: [13; MAX_BANDS],
        max_depth: -31.9,
    };

    let mut nf = [0.0f32; MAX_BANDS];
    for (i, v) in nf.iter_mut().enumerate() {
        *v = noise_floor(i, lsb_depth);
    }
    for c in 0..channels {
        for i in 0..MAX_BANDS {
            result.max_depth = result.max_depth.max(band_log_e[c * MAX_BANDS + i] - nf[i]);
        }
    }

    // Dynalloc needs headroom; below roughly 12 kb/s equivalent there is
    // nothing to boost with.
    if effective_bytes < 30 + 5 * mode.lm as i32 {
        return result;
    }

    let mut follower = [0.0f32; 2 * MAX_BANDS];
    for c in 0..channels {
        let mut e = [0.0f32; MAX_BANDS];
        for i in 0..MAX_BANDS {
            e[i] = band_log_e2[c * MAX_BANDS + i];
        }
        // 2.5 ms frames have too much energy variance in the low bands.
        if mode.lm == 0 {
            for i in 0..8 {
                e[i] = e[i].max(old_band_e[c * MAX_BANDS + i]);
            }
        }

        let f = &mut follower[c * MAX_BANDS..(c + 1) * MAX_BANDS];
        f[0] = e[0];
        let mut last = 0;
        for i in 1..MAX_BANDS {
            if e[i] > e[i - 1] + 0.5 {
                last = i;
            }
            f[i] = (f[i - 1] + 1.5).min(e[i]);
        }
        for i in (0..last).rev() {
            f[i] = f[i].min((f[i + 1] + 2.0).min(e[i]));
        }

        // Median filter so isolated dips do not trigger boosts.
        let offset = 1.0f32;
        for i in 2..MAX_BANDS - 2 {
            f[i] = f[i].max(median_of_5(&e[i - 2..i + 3]) - offset);
        }
        let tmp = median_of_3(&e[0..3]) - offset;
        f[0] = f[0].max(tmp);
        f[1] = f[1].max(tmp);
        let tmp = median_of_3(&e[MAX_BANDS - 3..]) - offset;
        f[MAX_BANDS - 2] = f[MAX_BANDS - 2].max(tmp);
        f[MAX_BANDS - 1] = f[MAX_BANDS - 1].max(tmp);

        for i in 0..MAX_BANDS {
            f[i] = f[i].max(nf[i]);
        }
    }

    if channels == 2 {
        for i in 0..MAX_BANDS {
            // Cross-talk: a band loud in one channel masks the other.
            let ch0 = follower[i];
            let ch1 = follower[MAX_BANDS + i];
            follower[MAX_BANDS + i] = ch1.max(ch0 - 4.0);
            follower[i] = ch0.max(ch1 - 4.0);
            let boost0 = (band_log_e[i] - follower[i]).max(0.0);
            let boost1 = (band_log_e[MAX_BANDS + i] - follower[MAX_BANDS + i]).max(0.0);
            follower[i] = 0.5 * (boost0 + boost1);
        }
    } else {
        for i in 0..MAX_BANDS {
            follower[i] = (band_log_e[i] - follower[i]).max(0.0);
        }
    }

    for i in 0..MAX_BANDS {
        result.importance[i] = (0.5 + 13.0 * follower[i].min(4.0).exp2()).floor() as i32;
    }
    // Fixed-size packets: halve the boost outside transients.
    if !is_transient {
        for v in follower.iter_mut().take(MAX_BANDS * channels) {
            *v *= 0.5;
        }
    }
    for i in 0..MAX_BANDS {
        if i < 8 {
            follower[i] *= 2.0;
        }
        if i >= 12 {
            follower[i] *= 0.5;
        }
    }

    let mut tot_boost = 0i32;
    for i in 0..MAX_BANDS {
        let fol = follower[i].min(4.0);
        let width = (channels * mode.band_width(i)) as i32;
        let (boost, boost_bits) = if width < 6 {
            let b = fol as i32;
            (b, b * width << BIT_RES)
        } else if width > 48 {
            let b = (fol * 8.0) as i32;
            (b, (b * width << BIT_RES) / 8)
        } else {
            let b = (fol * width as f32 / 6.0) as i32;
            (b, b * 6 << BIT_RES)
        };
        // Never let the boosts claim more than 2/3 of the frame.
        if (tot_boost + boost_bits) >> BIT_RES >> 3 > 2 * effective_bytes / 3 {
            let cap = (2 * effective_bytes / 3) << BIT_RES << 3;
            result.offsets[i] = cap - tot_boost;
            break;
        }
        result.offsets[i] = boost;
        tot_boost += boost_bits;
    }

    result
}

fn boost_quanta(mode: &Mode, channels: usize, band: usize) -> i32 {
    let width = (channels * mode.band_width(band)) as i32;
    (width << BIT_RES).min((6 << BIT_RES).max(width))
}

/// Writes the per-band boost flags: the first flag per band starts at
/// probability 1/64 and cheapens after any boosted band, continuation
/// flags cost one bit. Returns the applied boosts in eighth-bits and
/// their total.
pub fn encode_boosts(
    enc: &mut RangeEncoder,
    mode: &Mode,
    channels: usize,
    offsets: &[i32; MAX_BANDS],
    caps: &[i32; MAX_BANDS],
    total_bits_q3: i32,
) -> ([i32; MAX_BANDS], i32) {
    let mut boosts = [0i32; MAX_BANDS];
    let mut dynalloc_logp = 6i32;
    let mut total_boost = 0i32;
    let mut tell = enc.tell_frac();
    for i in 0..MAX_BANDS {
        let quanta = boost_quanta(mode, channels, i);
        let mut loop_logp = dynalloc_logp;
        let mut boost = 0i32;
        let mut j = 0i32;
        while tell + (loop_logp << BIT_RES) < total_bits_q3 - total_boost && boost < caps[i] {
            let flag = i32::from(j < offsets[i]);
            enc.encode_bit(flag, loop_logp as u32);
            tell = enc.tell_frac();
            if flag == 0 {
                break;
            }
            boost += quanta;
            total_boost += quanta;
            loop_logp = 1;
            j += 1;
        }
        if boost > 0 && dynalloc_logp > 2 {
            dynalloc_logp -= 1;
        }
        boosts[i] = boost;
    }
    (boosts, total_boost)
}

/// Decoder half of [`encode_boosts`].
pub fn decode_boosts(
    dec: &mut RangeDecoder,
    mode: &Mode,
    channels: usize,
    caps: &[i32; MAX_BANDS],
    total_bits_q3: i32,
) -> ([i32; MAX_BANDS], i32) {
    let mut boosts = [0i32; MAX_BANDS];
    let mut dynalloc_logp = 6i32;
    let mut total_boost = 0i32;
    let mut tell = dec.tell_frac();
    for i in 0..MAX_BANDS {
        let quanta = boost_quanta(mode, channels, i);
        let mut loop_logp = dynalloc_logp;
        let mut boost = 0i32;
        while tell + (loop_logp << BIT_RES) < total_bits_q3 - total_boost && boost < caps[i] {
            let flag = dec.decode_bit(loop_logp as u32);
            tell = dec.tell_frac();
            if flag == 0 {
                break;
            }
            boost += quanta;
            total_boost += quanta;
            loop_logp = 1;
        }
        if boost > 0 && dynalloc_logp > 2 {
            dynalloc_logp -= 1;
        }
        boosts[i] = boost;
    }
    (boosts, total_boost)
}

/// Equivalent bitrate for the trim decision, accounting for per-frame
/// overhead at short frame sizes.
pub fn compute_equiv_rate(frame_bytes: i32, channels: usize, lm: usize) -> i32 {
    let base = (frame_bytes * 8 * 50) << (3 - lm);
    base - (40 * channels as i32 + 20) * ((400 >> lm) - 50)
}

/// Picks the allocation trim (0..=10, 5 neutral). Lower trim favors the
/// high bands. Considers the rate, the spectral tilt, the transient
/// estimate and, for stereo, inter-channel correlation.
pub fn alloc_trim_analysis(
    mode: &Mode,
    norm: &[f32],
    band_log_e: &[f32],
    channels: usize,
    tf_estimate: f32,
    equiv_rate: i32,
) -> i32 {
    let mut trim = if equiv_rate < 64000 {
        4.0f32
    } else if equiv_rate < 80000 {
        4.0 + (equiv_rate - 64000) as f32 / 16000.0
    } else {
        5.0
    };

    if channels == 2 {
        let n0 = mode.num_bins();
        let (left, right) = norm.split_at(n0);
        let mut sum = 0.0f32;
        for band in 0..8 {
            let a = mode.band_start(band);
            let b = a + mode.band_width(band);
            let partial: f32 = left[a..b].iter().zip(&right[a..b]).map(|(l, r)| l * r).sum();
            sum += partial;
        }
        sum = (sum / 8.0).clamp(-1.0, 1.0).abs();
        let log_xc = (1.001 - sum * sum).log2();
        trim += (0.75 * log_xc).max(-4.0);
    }

    let mut diff = 0.0f32;
    for c in 0..channels {
        for i in 0..MAX_BANDS - 1 {
            diff += band_log_e[c * MAX_BANDS + i] / 32.0 * (2 + 2 * i as i32 - MAX_BANDS as i32) as f32;
        }
    }
    diff /= (channels * (MAX_BANDS - 1)) as f32;
    trim -= ((diff + 1.0) / 6.0).clamp(-2.0, 2.0);
    trim -= 2.0 * tf_estimate;

    ((trim + 0.5).floor() as i32).clamp(0, 10)
}

/// The three coded decisions inside the allocation loop differ between
/// encoder and decoder; everything else is shared arithmetic.
trait AllocSignals {
    /// Skip loop: returns true when the band under test stays coded.
    fn keep_band(&mut self, hint: bool) -> bool;
    fn intensity(&mut self, hint: usize, coded_bands: usize) -> usize;
    fn dual_stereo(&mut self, hint: bool) -> bool;
}

struct EncoderSignals<'a> {
    enc: &'a mut RangeEncoder,
}

impl AllocSignals for EncoderSignals<'_> {
    fn keep_band(&mut self, hint: bool) -> bool {
        self.enc.encode_bit(i32::from(hint), 1);
        hint
    }
    fn intensity(&mut self, hint: usize, coded_bands: usize) -> usize {
        let value = hint.min(coded_bands);
        self.enc.encode_uniform(value as u32, (coded_bands + 1) as u32);
        value
    }
    fn dual_stereo(&mut self, hint: bool) -> bool {
        self.enc.encode_bit(i32::from(hint), 1);
        hint
    }
}

struct DecoderSignals<'a, 'b> {
    dec: &'a mut RangeDecoder<'b>,
}

impl AllocSignals for DecoderSignals<'_, '_> {
    fn keep_band(&mut self, _hint: bool) -> bool {
        self.dec.decode_bit(1) == 1
    }
    fn intensity(&mut self, _hint: usize, coded_bands: usize) -> usize {
        self.dec.decode_uniform((coded_bands + 1) as u32) as usize
    }
    fn dual_stereo(&mut self, _hint: bool) -> bool {
        self.dec.decode_bit(1) == 1
    }
}

/// Encoder-side allocation: computes the split and codes the skip,
/// intensity and dual-stereo decisions. `boosts` are eighth-bit offsets
/// from [`encode_boosts`]; `prev_coded_bands` feeds the skip hysteresis.
#[allow(clippy::too_many_arguments)]
pub fn compute_allocation_encode(
    enc: &mut RangeEncoder,
    mode: &Mode,
    channels: usize,
    boosts: &[i32; MAX_BANDS],
    caps: &[i32; MAX_BANDS],
    alloc_trim: i32,
    intensity: usize,
    dual_stereo: bool,
    total_bits_q3: i32,
    prev_coded_bands: usize,
) -> Allocation {
    let mut signals = EncoderSignals { enc };
    compute_allocation(
        &mut signals,
        mode,
        channels,
        boosts,
        caps,
        alloc_trim,
        intensity,
        dual_stereo,
        total_bits_q3,
        prev_coded_bands,
    )
}

/// Decoder-side allocation; reads the same decisions the encoder wrote.
pub fn compute_allocation_decode(
    dec: &mut RangeDecoder,
    mode: &Mode,
    channels: usize,
    boosts: &[i32; MAX_BANDS],
    caps: &[i32; MAX_BANDS],
    alloc_trim: i32,
    total_bits_q3: i32,
) -> Allocation {
    let mut signals = DecoderSignals { dec };
    compute_allocation(
        &mut signals,
        mode,
        channels,
        boosts,
        caps,
        alloc_trim,
        0,
        false,
        total_bits_q3,
        MAX_BANDS,
    )
}

#[allow(clippy::too_many_arguments)]
fn compute_allocation<S: AllocSignals>(
    signals: &mut S,
    mode: &Mode,
    channels: usize,
    boosts: &[i32; MAX_BANDS],
    caps: &[i32; MAX_BANDS],
    alloc_trim: i32,
    intensity_hint: usize,
    dual_hint: bool,
    total_bits_q3: i32,
    prev_coded_bands: usize,
) -> Allocation {
    let lm = mode.lm as i32;
    let ch = channels as i32;
    let mut total = total_bits_q3.max(0);

    let mut skip_start = 0usize;
    let mut skip_rsv = 0i32;
    if total >= 1 << BIT_RES {
        skip_rsv = 1 << BIT_RES;
        total -= skip_rsv;
    }
    let mut intensity_rsv = 0i32;
    let mut dual_rsv = 0i32;
    if channels == 2 {
        intensity_rsv = LOG2_FRAC_TABLE[MAX_BANDS] as i32;
        if intensity_rsv > total {
            intensity_rsv = 0;
        } else {
            total -= intensity_rsv;
            if total >= 1 << BIT_RES {
                dual_rsv = 1 << BIT_RES;
                total -= dual_rsv;
            }
        }
    }

    let mut thresh = [0i32; MAX_BANDS];
    let mut trim_offset = [0i32; MAX_BANDS];
    for j in 0..MAX_BANDS {
        let width = (EBANDS[j + 1] - EBANDS[j]) as i32;
        thresh[j] = (ch << BIT_RES).max((3 * (width << lm) << BIT_RES) >> 4);
        trim_offset[j] = ch
            * width
            * (alloc_trim - 5 - lm)
            * (MAX_BANDS as i32 - j as i32 - 1)
            * (1 << (lm + BIT_RES))
            >> 6;
        if (width << lm) == 1 {
            trim_offset[j] -= ch << BIT_RES;
        }
    }

    // Coarse fit: find the highest static quality row that still fits.
    let mut lo = 1i32;
    let mut hi = BAND_ALLOCATION.len() as i32 - 1;
    while lo <= hi {
        let mid = (lo + hi) >> 1;
        let mut psum = 0i32;
        let mut done = false;
        for j in (0..MAX_BANDS).rev() {
            let width = (EBANDS[j + 1] - EBANDS[j]) as i32;
            let mut bits_j = (ch * width * BAND_ALLOCATION[mid as usize][j] as i32) << lm >> 2;
            if bits_j > 0 {
                bits_j = (bits_j + trim_offset[j]).max(0);
            }
            bits_j += boosts[j];
            if bits_j >= thresh[j] || done {
                done = true;
                psum += bits_j.min(caps[j]);
            } else if bits_j >= ch << BIT_RES {
                psum += ch << BIT_RES;
            }
        }
        if psum > total {
            hi = mid - 1;
        } else {
            lo = mid + 1;
        }
    }
    let hi_row = lo.max(0) as usize;
    let lo_row = (lo - 1).max(0) as usize;

    let mut bits1 = [0i32; MAX_BANDS];
    let mut bits2 = [0i32; MAX_BANDS];
    for j in 0..MAX_BANDS {
        let width = (EBANDS[j + 1] - EBANDS[j]) as i32;
        let mut b1 = (ch * width * BAND_ALLOCATION[lo_row][j] as i32) << lm >> 2;
        let mut b2 = if hi_row < BAND_ALLOCATION.len() {
            (ch * width * BAND_ALLOCATION[hi_row][j] as i32) << lm >> 2
        } else {
            caps[j]
        };
        if b1 > 0 {
            b1 = (b1 + trim_offset[j]).max(0);
        }
        if b2 > 0 {
            b2 = (b2 + trim_offset[j]).max(0);
        }
        if lo_row > 0 {
            b1 += boosts[j];
        }
        b2 += boosts[j];
        if boosts[j] > 0 {
            skip_start = j;
        }
        bits1[j] = b1;
        bits2[j] = (b2 - b1).max(0);
    }

    interp_bits_to_pulses(
        signals,
        mode,
        channels,
        skip_start,
        &bits1,
        &bits2,
        &thresh,
        caps,
        total,
        skip_rsv,
        intensity_hint,
        intensity_rsv,
        dual_hint,
        dual_rsv,
        prev_coded_bands,
    )
}

#[allow(clippy::too_many_arguments)]
fn interp_bits_to_pulses<S: AllocSignals>(
    signals: &mut S,
    mode: &Mode,
    channels: usize,
    skip_start: usize,
    bits1: &[i32; MAX_BANDS],
    bits2: &[i32; MAX_BANDS],
    thresh: &[i32; MAX_BANDS],
    caps: &[i32; MAX_BANDS],
    mut total: i32,
    skip_rsv: i32,
    intensity_hint: usize,
    mut intensity_rsv: i32,
    dual_hint: bool,
    mut dual_rsv: i32,
    prev_coded_bands: usize,
) -> Allocation {
    let ch = channels as i32;
    let lm = mode.lm as i32;
    let alloc_floor = ch << BIT_RES;
    let stereo = i32::from(channels > 1);
    let log_m = lm << BIT_RES;

    // Fine fit: interpolate between the two bracketing rows.
    let mut lo = 0i32;
    let mut hi = 1i32 << ALLOC_STEPS;
    for _ in 0..ALLOC_STEPS {
        let mid = (lo + hi) >> 1;
        let mut psum = 0i32;
        let mut done = false;
        for j in (0..MAX_BANDS).rev() {
            let tmp = bits1[j] + ((mid as i64 * bits2[j] as i64) >> ALLOC_STEPS) as i32;
            if tmp >= thresh[j] || done {
                done = true;
                psum += tmp.min(caps[j]);
            } else if tmp >= alloc_floor {
                psum += alloc_floor;
            }
        }
        if psum > total {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    let mut bits = [0i32; MAX_BANDS];
    let mut psum = 0i32;
    let mut done = false;
    for j in (0..MAX_BANDS).rev() {
        let mut tmp = bits1[j] + ((lo as i64 * bits2[j] as i64) >> ALLOC_STEPS) as i32;
        if tmp < thresh[j] && !done {
            tmp = if tmp >= alloc_floor { alloc_floor } else { 0 };
        } else {
            done = true;
        }
        tmp = tmp.min(caps[j]);
        bits[j] = tmp;
        psum += tmp;
    }

    // Band skipping: drop the top band while its share stays below the
    // threshold, coding one bit per decision.
    let mut coded_bands = MAX_BANDS;
    loop {
        let j = coded_bands - 1;
        if j <= skip_start {
            total += skip_rsv;
            break;
        }
        let left = total - psum;
        let percoeff = left / EBANDS[coded_bands] as i32;
        let left = left - EBANDS[coded_bands] as i32 * percoeff;
        let rem = (left - EBANDS[j] as i32).max(0);
        let band_width = (EBANDS[coded_bands] - EBANDS[j]) as i32;
        let mut band_bits = bits[j] + percoeff * band_width + rem;

        if band_bits >= thresh[j].max(alloc_floor + (1 << BIT_RES)) {
            let depth_threshold = if coded_bands > 17 {
                if j < prev_coded_bands {
                    7
                } else {
                    9
                }
            } else {
                0
            };
            let threshold = (depth_threshold * band_width << lm << BIT_RES) >> 4;
            let keep = coded_bands <= 2 || band_bits > threshold;
            if signals.keep_band(keep) {
                break;
            }
            psum += 1 << BIT_RES;
            band_bits -= 1 << BIT_RES;
        }

        psum -= bits[j] + intensity_rsv;
        if intensity_rsv > 0 {
            intensity_rsv = LOG2_FRAC_TABLE[j] as i32;
        }
        psum += intensity_rsv;
        if band_bits >= alloc_floor {
            psum += alloc_floor;
            bits[j] = alloc_floor;
        } else {
            bits[j] = 0;
        }
        coded_bands -= 1;
    }

    let intensity = if intensity_rsv > 0 {
        signals.intensity(intensity_hint, coded_bands)
    } else {
        0
    };
    if intensity == 0 {
        total += dual_rsv;
        dual_rsv = 0;
    }
    let dual_stereo = if dual_rsv > 0 {
        signals.dual_stereo(dual_hint)
    } else {
        false
    };

    // Spread what is left evenly per coefficient, remainder to the low
    // bands.
    let left = total - psum;
    let percoeff = left / EBANDS[coded_bands] as i32;
    let mut left = left - EBANDS[coded_bands] as i32 * percoeff;
    for (j, b) in bits.iter_mut().enumerate().take(coded_bands) {
        *b += percoeff * (EBANDS[j + 1] - EBANDS[j]) as i32;
    }
    for (j, b) in bits.iter_mut().enumerate().take(coded_bands) {
        let tmp = left.min((EBANDS[j + 1] - EBANDS[j]) as i32);
        *b += tmp;
        left -= tmp;
    }

    let mut fine_bits = [0i32; MAX_BANDS];
    let mut fine_priority = [false; MAX_BANDS];
    let mut balance = 0i32;
    for j in 0..coded_bands {
        let n0 = (EBANDS[j + 1] - EBANDS[j]) as i32;
        let n = n0 << lm;
        let bit = bits[j] + balance;
        let mut excess;
        if n > 1 {
            excess = (bit - caps[j]).max(0);
            bits[j] = bit - excess;

            let mut den = ch * n;
            if channels == 2 && n > 2 && !dual_stereo && j < intensity {
                den += 1;
            }
            let nc_log_n = den * (LOG_N[j] + log_m);
            let mut offset = (nc_log_n >> 1) - den * FINE_OFFSET;
            if n == 2 {
                offset += (den << BIT_RES) >> 2;
            }
            if bits[j] + offset < (den * 2) << BIT_RES {
                offset += nc_log_n >> 2;
            } else if bits[j] + offset < (den * 3) << BIT_RES {
                offset += nc_log_n >> 3;
            }

            let mut eb = (bits[j] + offset + (den << (BIT_RES - 1))).max(0);
            eb = (eb / den) >> BIT_RES;
            if ch * eb > bits[j] >> BIT_RES {
                eb = bits[j] >> stereo >> BIT_RES;
            }
            eb = eb.min(MAX_FINE_BITS);
            fine_priority[j] = eb * (den << BIT_RES) >= bits[j] + offset;
            fine_bits[j] = eb;
            bits[j] -= (ch * eb) << BIT_RES;
        } else {
            excess = (bit - (ch << BIT_RES)).max(0);
            bits[j] = bit - excess;
            fine_bits[j] = 0;
            fine_priority[j] = true;
        }

        if excess > 0 {
            let extra_fine = (excess >> (stereo + BIT_RES)).min(MAX_FINE_BITS - fine_bits[j]);
            fine_bits[j] += extra_fine;
            let extra_bits = (extra_fine * ch) << BIT_RES;
            fine_priority[j] = extra_bits >= excess - balance;
            excess -= extra_bits;
            balance = excess;
        } else {
            balance = 0;
        }
    }

    for j in coded_bands..MAX_BANDS {
        fine_bits[j] = bits[j] >> stereo >> BIT_RES;
        bits[j] = 0;
        fine_priority[j] = fine_bits[j] < 1;
    }

    Allocation {
        band_bits: bits,
        fine_bits,
        fine_priority,
        coded_bands,
        balance,
        intensity,
        dual_stereo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::Mode;

    fn check_budget(alloc: &Allocation, channels: usize, total_q3: i32) {
        let mut spent = alloc.balance;
        for j in 0..MAX_BANDS {
            assert!(alloc.band_bits[j] >= 0, "band {j}");
            assert!(alloc.fine_bits[j] >= 0 && alloc.fine_bits[j] <= MAX_FINE_BITS);
            spent += alloc.band_bits[j] + ((channels as i32 * alloc.fine_bits[j]) << 3);
        }
        assert!(spent <= total_q3, "spent {spent} of {total_q3}");
    }

    #[test]
    fn caps_scale_with_width_and_channels() {
        let mode = Mode::from_frame_size(960).unwrap();
        let mono = init_caps(&mode, 1);
        let stereo = init_caps(&mode, 2);
        for i in 0..MAX_BANDS {
            assert!(mono[i] > 0);
            assert!(stereo[i] > mono[i]);
        }
        // Wider bands get larger caps.
        assert!(mono[20] > mono[0]);
    }

    #[test]
    fn mono_allocation_respects_budget() {
        let mode = Mode::from_frame_size(960).unwrap();
        let caps = init_caps(&mode, 1);
        let boosts = [0i32; MAX_BANDS];
        for total_bytes in [20i32, 60, 160, 320] {
            let total_q3 = (total_bytes * 8) << 3;
            let mut enc = RangeEncoder::new(total_bytes as usize);
            enc.shrink(total_bytes as usize);
            let alloc = compute_allocation_encode(
                &mut enc, &mode, 1, &boosts, &caps, 5, 0, false, total_q3, MAX_BANDS,
            );
            assert!(alloc.coded_bands >= 1 && alloc.coded_bands <= MAX_BANDS);
            check_budget(&alloc, 1, total_q3);
        }
    }

    #[test]
    fn encoder_and_decoder_agree_on_stereo_allocation() {
        let mode = Mode::from_frame_size(480).unwrap();
        let caps = init_caps(&mode, 2);
        let mut boosts = [0i32; MAX_BANDS];
        boosts[4] = 48;
        let total_bytes = 120usize;
        let total_q3 = ((total_bytes * 8) << 3) as i32;

        let mut enc = RangeEncoder::new(total_bytes);
        enc.shrink(total_bytes);
        let enc_alloc = compute_allocation_encode(
            &mut enc, &mode, 2, &boosts, &caps, 6, 15, true, total_q3, MAX_BANDS,
        );
        let packet = enc.done().unwrap();

        let mut dec = RangeDecoder::new(&packet);
        let dec_alloc =
            compute_allocation_decode(&mut dec, &mode, 2, &boosts, &caps, 6, total_q3);

        assert_eq!(enc_alloc.band_bits, dec_alloc.band_bits);
        assert_eq!(enc_alloc.fine_bits, dec_alloc.fine_bits);
        assert_eq!(enc_alloc.fine_priority, dec_alloc.fine_priority);
        assert_eq!(enc_alloc.coded_bands, dec_alloc.coded_bands);
        assert_eq!(enc_alloc.balance, dec_alloc.balance);
        assert_eq!(enc_alloc.intensity, dec_alloc.intensity);
        assert_eq!(enc_alloc.dual_stereo, dec_alloc.dual_stereo);
        check_budget(&enc_alloc, 2, total_q3);
    }

    #[test]
    fn starved_budget_allocates_nothing_extra() {
        let mode = Mode::from_frame_size(120).unwrap();
        let caps = init_caps(&mode, 1);
        let boosts = [0i32; MAX_BANDS];
        let total_q3 = 10 << 3;
        let mut enc = RangeEncoder::new(4);
        enc.shrink(4);
        let alloc = compute_allocation_encode(
            &mut enc, &mode, 1, &boosts, &caps, 5, 0, false, total_q3, MAX_BANDS,
        );
        check_budget(&alloc, 1, total_q3);
    }

    #[test]
    fn boost_coding_round_trips() {
        let mode = Mode::from_frame_size(960).unwrap();
        let caps = init_caps(&mode, 1);
        let mut offsets = [0i32; MAX_BANDS];
        offsets[3] = 2;
        offsets[10] = 1;
        let total_q3 = (100 * 8) << 3;

        let mut enc = RangeEncoder::new(100);
        enc.shrink(100);
        let (enc_boosts, enc_total) =
            encode_boosts(&mut enc, &mode, 1, &offsets, &caps, total_q3);
        let packet = enc.done().unwrap();

        let mut dec = RangeDecoder::new(&packet);
        let (dec_boosts, dec_total) = decode_boosts(&mut dec, &mode, 1, &caps, total_q3);
        assert_eq!(enc_boosts, dec_boosts);
        assert_eq!(enc_total, dec_total);
        assert!(enc_boosts[3] > 0);
        assert!(enc_boosts[10] > 0);
        assert!(enc_boosts[0] == 0);
    }

    #[test]
    fn dynalloc_boosts_outlier_band() {
        let mode = Mode::from_frame_size(960).unwrap();
        let mut band_log_e = [-5.0f32; MAX_BANDS];
        band_log_e[10] = 3.0;
        let old = [-28.0f32; MAX_BANDS];
        let res = dynalloc_analysis(&mode, &band_log_e, &band_log_e, &old, 1, 16, 200, false);
        assert!(res.offsets[10] > 0, "offsets: {:?}", res.offsets);
        assert!(res.offsets[3] == 0);
        assert!(res.importance[10] > res.importance[3]);
        assert!(res.max_depth > 0.0);
    }

    #[test]
    fn dynalloc_disabled_on_tiny_frames() {
        let mode = Mode::from_frame_size(960).unwrap();
        let band_log_e = [0.0f32; MAX_BANDS];
        let old = [-28.0f32; MAX_BANDS];
        let res = dynalloc_analysis(&mode, &band_log_e, &band_log_e, &old, 1, 16, 10, false);
        assert!(res.offsets.iter().all(|&o| o == 0));
        assert!(res.importance.iter().all(|&v| v == 13));
    }

    #[test]
    fn follower_tracks_secondary_energies_on_transients() {
        // The long-block energies drive the envelope smoothing while the
        // boost decision still compares against the coded energies. When
        // the secondary vector sits below the main one, every band sticks
        // out of the envelope and picks up a boost.
        let mode = Mode::from_frame_size(960).unwrap();
        let band_log_e = [6.0f32; MAX_BANDS];
        let old = [-28.0f32; MAX_BANDS];

        let flat = dynalloc_analysis(&mode, &band_log_e, &band_log_e, &old, 1, 16, 200, true);
        assert!(flat.offsets.iter().all(|&o| o == 0), "{:?}", flat.offsets);

        let band_log_e2 = [3.0f32; MAX_BANDS];
        let boosted =
            dynalloc_analysis(&mode, &band_log_e, &band_log_e2, &old, 1, 16, 200, true);
        assert!(boosted.offsets.iter().any(|&o| o > 0), "{:?}", boosted.offsets);
        assert!(boosted.importance[4] > flat.importance[4]);
    }

    #[test]
    fn trim_centers_near_default() {
        let mode = Mode::from_frame_size(960).unwrap();
        let norm = vec![0.0f32; mode.num_bins()];
        let band_log_e = [0.0f32; MAX_BANDS];
        let trim = alloc_trim_analysis(&mode, &norm, &band_log_e, 1, 0.0, 128000);
        assert!((4..=6).contains(&trim), "trim={trim}");
        // Transient-heavy frames pull the trim down.
        let trim_tf = alloc_trim_analysis(&mode, &norm, &band_log_e, 1, 1.0, 128000);
        assert!(trim_tf < trim);
        // Low rates start from a lower base.
        let trim_low = alloc_trim_analysis(&mode, &norm, &band_log_e, 1, 0.0, 32000);
        assert!(trim_low <= trim);
    }

    #[test]
    fn equiv_rate_grows_with_packet_size() {
        let r1 = compute_equiv_rate(60, 1, 3);
        let r2 = compute_equiv_rate(120, 1, 3);
        assert!(r2 > r1);
        assert!(r1 > 0);
    }
}
