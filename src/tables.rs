//! Static lookup tables and constants
//!
//! All frequency-domain components share these tables: band boundaries,
//! per-band allocation curves, the pulse-count cache, energy probability
//! models and the small ICDF tables used for frame-level decisions. The
//! data is immutable and process-wide; nothing here has a lifecycle.

/// Number of frequency bands at 48 kHz.
pub const MAX_BANDS: usize = 21;

/// Overlap length in samples (2.5 ms at 48 kHz).
pub const OVERLAP: usize = 120;

/// Band boundaries in bins for the shortest (2.5 ms) block. Boundaries for
/// larger frames are these values scaled by the block multiplier 2^LM.
pub const EBANDS: [usize; MAX_BANDS + 1] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 34, 40, 48, 60, 78, 100,
];

/// log2 of band widths for 5 ms frames, in eighth-bit (Q3) units.
pub const LOG_N: [i32; MAX_BANDS] = [
    0, 0, 0, 0, 0, 0, 0, 0, 8, 8, 8, 8, 16, 16, 16, 21, 21, 24, 29, 34, 36,
];

/// Mean log-energy per band, subtracted before coding and re-added on
/// reconstruction so the coded residuals center near zero.
pub const E_MEANS: [f32; 25] = [
    6.437500, 6.250000, 5.750000, 5.312500, 5.062500, 4.812500, 4.500000, 4.375000, 4.875000,
    4.687500, 4.562500, 4.437500, 4.875000, 4.625000, 4.312500, 4.500000, 4.375000, 4.625000,
    4.750000, 4.437500, 3.750000, 3.750000, 3.750000, 3.750000, 3.750000,
];

/// Inter-frame energy prediction coefficient per frame-size class (Q15
/// fractions of 32768).
pub const ALPHA_COEF: [f32; 4] = [
    29440.0 / 32768.0,
    26112.0 / 32768.0,
    21248.0 / 32768.0,
    16384.0 / 32768.0,
];

/// Inter-band energy predictor leak per frame-size class.
pub const BETA_COEF: [f32; 4] = [
    30147.0 / 32768.0,
    22282.0 / 32768.0,
    12124.0 / 32768.0,
    6554.0 / 32768.0,
];

/// Inter-band predictor leak for intra frames.
pub const BETA_INTRA: f32 = 4915.0 / 32768.0;

/// Laplace probability model for coarse energy, indexed by
/// [frame-size class][intra][2*band .. 2*band+1]. Even entries are base
/// frequencies (scaled by 1<<7 before use), odd entries decay rates
/// (scaled by 1<<6).
pub const E_PROB_MODEL: [[[u8; 42]; 2]; 4] = [
    // 120-sample frames
    [
        [
            72, 127, 65, 129, 66, 128, 65, 128, 64, 128, 62, 128, 64, 128, 64, 128, 92, 78, 92,
            79, 92, 78, 90, 79, 116, 41, 115, 40, 114, 40, 132, 26, 132, 26, 145, 17, 161, 12,
            176, 10, 177, 11,
        ],
        [
            24, 179, 48, 138, 54, 135, 54, 132, 53, 134, 56, 133, 55, 132, 55, 132, 61, 114, 70,
            96, 74, 88, 75, 88, 87, 74, 89, 66, 91, 67, 100, 59, 108, 50, 120, 40, 122, 37, 97,
            43, 78, 50,
        ],
    ],
    // 240-sample frames
    [
        [
            83, 78, 84, 81, 88, 75, 86, 74, 87, 71, 90, 73, 93, 74, 93, 74, 109, 40, 114, 36,
            117, 34, 117, 34, 143, 17, 145, 18, 146, 19, 162, 12, 165, 10, 178, 7, 189, 6, 190,
            8, 177, 9,
        ],
        [
            23, 178, 54, 115, 63, 102, 66, 98, 69, 99, 74, 89, 71, 91, 73, 91, 78, 89, 86, 80,
            92, 66, 93, 64, 102, 59, 103, 60, 104, 60, 117, 52, 123, 44, 138, 35, 133, 31, 97,
            38, 77, 45,
        ],
    ],
    // 480-sample frames
    [
        [
            61, 90, 93, 60, 105, 42, 107, 41, 110, 45, 116, 38, 113, 38, 112, 38, 124, 26, 132,
            27, 136, 19, 140, 20, 155, 14, 159, 16, 158, 18, 170, 13, 177, 10, 187, 8, 192, 6,
            175, 9, 159, 10,
        ],
        [
            21, 178, 59, 110, 71, 86, 75, 85, 84, 83, 91, 66, 88, 73, 87, 72, 92, 75, 98, 72,
            105, 58, 107, 54, 115, 52, 114, 55, 112, 56, 129, 51, 132, 40, 150, 33, 140, 29, 98,
            35, 77, 42,
        ],
    ],
    // 960-sample frames
    [
        [
            42, 121, 96, 66, 108, 43, 111, 40, 117, 44, 123, 32, 120, 36, 119, 33, 127, 33, 134,
            34, 139, 21, 147, 23, 152, 20, 158, 25, 154, 26, 166, 21, 173, 16, 184, 13, 184, 10,
            150, 13, 139, 15,
        ],
        [
            22, 178, 63, 114, 74, 82, 84, 83, 92, 82, 103, 62, 96, 72, 96, 67, 101, 73, 107, 72,
            113, 55, 118, 52, 125, 52, 118, 52, 117, 55, 135, 49, 137, 39, 157, 32, 145, 29, 97,
            33, 77, 40,
        ],
    ],
];

/// Fallback ICDF for coarse energy when fewer than 15 bits remain.
pub const SMALL_ENERGY_ICDF: [u8; 3] = [2, 1, 0];

/// Static per-band allocation curves: 11 quality rows of bits per band in
/// 1/32 bit/sample units. The allocation engine interpolates between
/// adjacent rows.
pub const BAND_ALLOCATION: [[u8; MAX_BANDS]; 11] = [
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [90, 80, 75, 69, 63, 56, 49, 40, 34, 29, 20, 18, 10, 0, 0, 0, 0, 0, 0, 0, 0],
    [110, 100, 90, 84, 78, 71, 65, 58, 51, 45, 39, 32, 26, 20, 12, 0, 0, 0, 0, 0, 0],
    [118, 110, 103, 93, 86, 80, 75, 70, 65, 59, 53, 47, 40, 31, 23, 15, 4, 0, 0, 0, 0],
    [126, 119, 112, 104, 95, 89, 83, 78, 72, 66, 60, 54, 47, 39, 32, 25, 17, 12, 1, 0, 0],
    [134, 127, 120, 114, 103, 97, 91, 85, 78, 72, 66, 60, 54, 47, 41, 35, 29, 23, 16, 10, 1],
    [144, 137, 130, 124, 113, 107, 101, 95, 88, 82, 76, 70, 64, 57, 51, 45, 39, 33, 26, 15, 1],
    [152, 145, 138, 132, 123, 117, 111, 105, 98, 92, 86, 80, 74, 67, 61, 55, 49, 43, 36, 20, 1],
    [162, 155, 148, 142, 133, 127, 121, 115, 108, 102, 96, 90, 84, 77, 71, 65, 59, 53, 46, 30, 1],
    [172, 165, 158, 152, 143, 137, 131, 125, 118, 112, 106, 100, 94, 87, 81, 75, 69, 63, 56, 45, 20],
    [
        200, 200, 200, 200, 200, 200, 200, 200, 198, 193, 188, 183, 178, 173, 168, 163, 158, 153,
        148, 129, 104,
    ],
];

/// Offsets into [`CACHE_BITS`] per (LM+1, band); -1 marks single-bin bands
/// that need no cache row.
pub const CACHE_INDEX: [i16; 105] = [
    -1, -1, -1, -1, -1, -1, -1, -1, 0, 0, 0, 0, 41, 41, 41, 82, 82, 123, 164, 200, 222, 0, 0, 0,
    0, 0, 0, 0, 0, 41, 41, 41, 41, 123, 123, 123, 164, 164, 240, 266, 283, 295, 41, 41, 41, 41,
    41, 41, 41, 41, 123, 123, 123, 123, 240, 240, 240, 266, 266, 305, 318, 328, 336, 123, 123,
    123, 123, 123, 123, 123, 123, 240, 240, 240, 240, 305, 305, 305, 318, 318, 343, 351, 358,
    364, 240, 240, 240, 240, 240, 240, 240, 240, 305, 305, 305, 305, 343, 343, 343, 351, 351,
    370, 376, 382, 387,
];

/// Pulse-count cache rows: `row[0]` is the largest pseudo-pulse index, and
/// `row[q] + 1` is the bit cost (Q3) of coding `q` pseudo-pulses.
pub const CACHE_BITS: [u8; 392] = [
    40, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 40, 15, 23, 28, 31, 34, 36, 38, 39, 41, 42, 43, 44, 45, 46,
    47, 47, 49, 50, 51, 52, 53, 54, 55, 55, 57, 58, 59, 60, 61, 62, 63, 63, 65, 66, 67, 68, 69,
    70, 71, 71, 40, 20, 33, 41, 48, 53, 57, 61, 64, 66, 69, 71, 73, 75, 76, 78, 80, 82, 85, 87,
    89, 91, 92, 94, 96, 98, 101, 103, 105, 107, 108, 110, 112, 114, 117, 119, 121, 123, 124,
    126, 128, 40, 23, 39, 51, 60, 67, 73, 79, 83, 87, 91, 94, 97, 100, 102, 105, 107, 111, 115,
    118, 121, 124, 126, 129, 131, 135, 139, 142, 145, 148, 150, 153, 155, 159, 163, 166, 169,
    172, 174, 177, 179, 35, 28, 49, 65, 78, 89, 99, 107, 114, 120, 126, 132, 136, 141, 145, 149,
    153, 159, 165, 171, 176, 180, 185, 189, 192, 199, 205, 211, 216, 220, 225, 229, 232, 239,
    245, 251, 21, 33, 58, 79, 97, 112, 125, 137, 148, 157, 166, 174, 182, 189, 195, 201, 207,
    217, 227, 235, 243, 251, 17, 35, 63, 86, 106, 123, 139, 152, 165, 177, 187, 197, 206, 214,
    222, 230, 237, 250, 25, 31, 55, 75, 91, 105, 117, 128, 138, 146, 154, 161, 168, 174, 180,
    185, 190, 200, 208, 215, 222, 229, 235, 240, 245, 255, 16, 36, 65, 89, 110, 128, 144, 159,
    173, 185, 196, 207, 217, 226, 234, 242, 250, 11, 41, 74, 103, 128, 151, 172, 191, 209, 225,
    241, 255, 9, 43, 79, 110, 138, 163, 186, 207, 227, 246, 12, 39, 71, 99, 123, 144, 164, 182,
    198, 214, 228, 241, 253, 9, 44, 81, 113, 142, 168, 192, 214, 235, 255, 7, 49, 90, 127, 160,
    191, 220, 247, 6, 51, 95, 134, 170, 203, 234, 7, 47, 87, 123, 155, 184, 212, 237, 6, 52, 97,
    137, 174, 208, 240, 5, 57, 106, 151, 192, 231, 5, 59, 111, 158, 202, 243, 5, 55, 103, 147,
    187, 224, 5, 60, 113, 161, 206, 248, 4, 65, 122, 175, 224, 4, 67, 127, 182, 234,
];

/// Per-band hard caps on allocation, 8 rows indexed by 2*LM + (channels-1).
pub const CACHE_CAPS: [u8; 168] = [
    224, 224, 224, 224, 224, 224, 224, 224, 160, 160, 160, 160, 185, 185, 185, 178, 178, 168,
    134, 61, 37, 224, 224, 224, 224, 224, 224, 224, 224, 240, 240, 240, 240, 207, 207, 207, 198,
    198, 183, 144, 66, 40, 160, 160, 160, 160, 160, 160, 160, 160, 185, 185, 185, 185, 193, 193,
    193, 183, 183, 172, 138, 64, 38, 240, 240, 240, 240, 240, 240, 240, 240, 207, 207, 207, 207,
    204, 204, 204, 193, 193, 180, 143, 66, 40, 185, 185, 185, 185, 185, 185, 185, 185, 193, 193,
    193, 193, 193, 193, 193, 183, 183, 172, 138, 65, 39, 207, 207, 207, 207, 207, 207, 207, 207,
    204, 204, 204, 204, 201, 201, 201, 188, 188, 176, 141, 66, 40, 193, 193, 193, 193, 193, 193,
    193, 193, 193, 193, 193, 193, 194, 194, 194, 184, 184, 173, 139, 65, 39, 204, 204, 204, 204,
    204, 204, 204, 204, 201, 201, 201, 201, 198, 198, 198, 187, 187, 175, 140, 66, 40,
];

/// log2 fractions in Q3, used to price the intensity-stereo band choice.
pub const LOG2_FRAC_TABLE: [u8; 24] = [
    0, 8, 13, 16, 19, 21, 23, 24, 26, 27, 28, 29, 30, 31, 32, 32, 33, 34, 34, 35, 36, 36, 37, 37,
];

/// ICDF for the allocation trim symbol (0..10).
pub const TRIM_ICDF: [u8; 11] = [126, 124, 119, 109, 87, 41, 19, 9, 4, 2, 0];

/// ICDF for the spread decision symbol.
pub const SPREAD_ICDF: [u8; 4] = [25, 23, 2, 0];

/// ICDF for the postfilter tapset symbol.
pub const TAPSET_ICDF: [u8; 3] = [2, 1, 0];

/// Time-frequency resolution change per [frame-size class][4*transient +
/// 2*tf_select + per-band flag].
pub const TF_SELECT_TABLE: [[i8; 8]; 4] = [
    [0, -1, 0, -1, 0, -1, 0, -1],
    [0, -1, 0, -2, 1, 0, 1, -1],
    [0, -2, 0, -3, 2, 0, 1, -1],
    [0, -2, 0, -3, 3, 0, 1, -1],
];

/// Converts a pseudo-pulse index from the cache into a real pulse count.
pub fn get_pulses(i: i32) -> i32 {
    if i < 8 {
        i
    } else {
        (8 + (i & 7)) << ((i >> 3) - 1)
    }
}

/// Returns the pulse cache row for a band at a given frame-size class, or
/// `None` for single-bin bands that have no row.
pub fn cache_row(band: usize, lm: usize) -> Option<&'static [u8]> {
    let idx = CACHE_INDEX[(lm + 1) * MAX_BANDS + band];
    if idx < 0 {
        return None;
    }
    Some(&CACHE_BITS[idx as usize..])
}

/// Maps a Q3 bit budget to a pseudo-pulse index for a band, never
/// exceeding the budget.
pub fn bits_to_pulses(band: usize, lm: usize, bits: i32) -> i32 {
    let cache = match cache_row(band, lm) {
        Some(c) => c,
        None => return 0,
    };
    let mut lo: i32 = 0;
    let mut hi: i32 = cache[0] as i32;
    let bits = bits - 1;
    // Binary search: 6 iterations always suffice for rows of at most 41.
    for _ in 0..6 {
        let mid = (lo + hi + 1) >> 1;
        if (cache[mid as usize] as i32) >= bits {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    if bits - (if lo == 0 { -1 } else { cache[lo as usize] as i32 })
        <= (cache[hi as usize] as i32) - bits
    {
        lo
    } else {
        hi
    }
}

/// Q3 bit cost of a pseudo-pulse index in a band.
pub fn pulses_to_bits(band: usize, lm: usize, pulses: i32) -> i32 {
    if pulses == 0 {
        return 0;
    }
    match cache_row(band, lm) {
        Some(cache) => cache[pulses as usize] as i32 + 1,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries_monotone_and_scaled() {
        assert_eq!(EBANDS[0], 0);
        for i in 1..EBANDS.len() {
            assert!(EBANDS[i] > EBANDS[i - 1]);
        }
        // LM=k boundaries are LM=0 boundaries times 2^k by construction;
        // verify the scaling stays exact for every supported class.
        for lm in 0..4usize {
            for (i, &e) in EBANDS.iter().enumerate() {
                assert_eq!(e << lm, EBANDS[i] * (1 << lm));
            }
        }
    }

    #[test]
    fn prob_model_entries_nonzero_fs() {
        for lm in 0..4 {
            for intra in 0..2 {
                for band in 0..MAX_BANDS {
                    let fs = (E_PROB_MODEL[lm][intra][2 * band] as u32) << 7;
                    assert!(fs > 0 && fs < 32768);
                }
            }
        }
    }

    #[test]
    fn pulse_cache_round_trips() {
        for lm in 0..4usize {
            for band in 0..MAX_BANDS {
                let Some(cache) = cache_row(band, lm) else {
                    continue;
                };
                let max_q = cache[0] as i32;
                for q in 1..=max_q {
                    let bits = pulses_to_bits(band, lm, q);
                    let q2 = bits_to_pulses(band, lm, bits);
                    assert_eq!(q2, q, "band {band} lm {lm} q {q}");
                    // The chosen index never costs more than the budget.
                    assert!(pulses_to_bits(band, lm, q2) <= bits);
                }
            }
        }
    }

    #[test]
    fn get_pulses_monotone() {
        let mut prev = -1;
        for i in 0..41 {
            let p = get_pulses(i);
            assert!(p > prev);
            prev = p;
        }
    }
}
