//! Laplace coder for coarse energy residuals
//!
//! Codes signed prediction residuals under a two-sided geometric model
//! parameterized by a center frequency `fs` and a per-step `decay`, both
//! Q15 against a total of 32768. The tail beyond the modeled region falls
//! back to a floor probability of one, so the encoder may clamp values
//! the model cannot represent and returns the value actually coded.

use crate::range::{RangeDecoder, RangeEncoder};

const LAPLACE_FT: i32 = 32768;
const LAPLACE_FT_BITS: u32 = 15;
const LAPLACE_MINP: i32 = 1;
const LAPLACE_LOG_MINP: i32 = 0;
const LAPLACE_NMIN: i32 = 16;

/// Frequency of the first non-zero magnitude given the center frequency
/// and decay.
fn freq1(fs0: i32, decay: i32) -> i32 {
    let ft = LAPLACE_FT - LAPLACE_MINP * (2 * LAPLACE_NMIN) - fs0;
    (ft * (16384 - decay)) >> 15
}

/// Encodes `val` and returns the value actually written, which may be
/// clamped toward zero when the tail budget runs out.
pub fn encode_laplace(enc: &mut RangeEncoder, val: i32, fs0: i32, decay: i32) -> i32 {
    let mut val = val;
    let mut fl: i32 = 0;
    let mut fs = fs0;
    if val != 0 {
        let s = -i32::from(val < 0);
        let abs_val = (val + s) ^ s;
        fl = fs;
        fs = freq1(fs0, decay);
        let mut i = 1;
        while fs > 0 && i < abs_val {
            fs *= 2;
            fl += fs + 2 * LAPLACE_MINP;
            fs = (fs * decay) >> 15;
            i += 1;
        }
        if fs == 0 {
            let mut ndi_max = (LAPLACE_FT - fl + LAPLACE_MINP - 1) >> LAPLACE_LOG_MINP;
            ndi_max = (ndi_max - s) >> 1;
            let di = (abs_val - i).min(ndi_max - 1);
            fl += (2 * di + 1 + s) * LAPLACE_MINP;
            fs = LAPLACE_MINP.min(LAPLACE_FT - fl);
            val = (i + di + s) ^ s;
        } else {
            fs += LAPLACE_MINP;
            if s == 0 {
                fl += fs;
            }
        }
    }
    if fl + fs > LAPLACE_FT {
        fs = LAPLACE_FT - fl;
    }
    enc.encode_bin(fl as u32, (fl + fs) as u32, LAPLACE_FT_BITS);
    val
}

/// Decodes one Laplace-distributed value.
pub fn decode_laplace(dec: &mut RangeDecoder, fs0: i32, decay: i32) -> i32 {
    let fm = dec.decode_bin(LAPLACE_FT_BITS) as i32;
    let mut val = 0;
    let mut fl: i32 = 0;
    let mut fs = fs0;
    if fm >= fs {
        val += 1;
        fl = fs;
        fs = freq1(fs0, decay) + LAPLACE_MINP;
        while fs > LAPLACE_MINP && fm >= fl + 2 * fs {
            fs *= 2;
            fl += fs;
            fs = ((fs - 2 * LAPLACE_MINP) * decay) >> 15;
            fs += LAPLACE_MINP;
            val += 1;
        }
        if fs <= LAPLACE_MINP {
            let di = (fm - fl) >> (LAPLACE_LOG_MINP + 1);
            val += di;
            fl += 2 * di * LAPLACE_MINP;
        }
        if fm < fl + fs {
            val = -val;
        } else {
            fl += fs;
        }
    }
    dec.update(fl as u32, (fl + fs).min(LAPLACE_FT) as u32, LAPLACE_FT as u32);
    val
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_values_round_trip() {
        let fs0 = 10000;
        let decay = 12000;
        let values = [0, 1, -1, 2, -2, 5, -5, 10, -10];
        let mut enc = RangeEncoder::new(128);
        let mut coded = Vec::new();
        for &v in &values {
            coded.push(encode_laplace(&mut enc, v, fs0, decay));
        }
        assert_eq!(coded, values);
        let packet = enc.done().unwrap();
        let mut dec = RangeDecoder::new(&packet);
        for &v in &values {
            assert_eq!(decode_laplace(&mut dec, fs0, decay), v);
        }
    }

    #[test]
    fn extreme_value_clamps_but_stays_consistent() {
        // With a sharp model the tail runs out; the encoder reports the
        // clamped value and the decoder must reproduce exactly that.
        let fs0 = (200i32) << 7;
        let decay = (10i32) << 6;
        let mut enc = RangeEncoder::new(64);
        let coded = encode_laplace(&mut enc, 4000, fs0, decay);
        assert!(coded <= 4000);
        let packet = enc.done().unwrap();
        let mut dec = RangeDecoder::new(&packet);
        assert_eq!(decode_laplace(&mut dec, fs0, decay), coded);
    }

    #[test]
    fn model_boundary_magnitudes() {
        let fs0 = (72i32) << 7;
        let decay = (127i32) << 6;
        for mag in [0, 1, -1, 3, -3, 20, -20, 100, -100, 1000, -1000] {
            let mut enc = RangeEncoder::new(64);
            let coded = encode_laplace(&mut enc, mag, fs0, decay);
            assert!(coded.abs() <= mag.abs());
            assert!(coded.signum() * mag.signum() >= 0);
            let packet = enc.done().unwrap();
            let mut dec = RangeDecoder::new(&packet);
            assert_eq!(decode_laplace(&mut dec, fs0, decay), coded);
        }
    }

    proptest! {
        #[test]
        fn prop_encode_decode_agree(
            vals in proptest::collection::vec(-60i32..60, 1..40),
            fs_byte in 20u8..200,
            decay_byte in 10u8..180,
        ) {
            let fs0 = i32::from(fs_byte) << 7;
            let decay = i32::from(decay_byte) << 6;
            let mut enc = RangeEncoder::new(512);
            let mut coded = Vec::new();
            for &v in &vals {
                coded.push(encode_laplace(&mut enc, v, fs0, decay));
            }
            let packet = enc.done().unwrap();
            let mut dec = RangeDecoder::new(&packet);
            for &c in &coded {
                prop_assert_eq!(decode_laplace(&mut dec, fs0, decay), c);
            }
        }
    }
}
