//! Time-frequency resolution flags
//!
//! Each band can trade frequency resolution for time resolution relative
//! to the frame's block size. Flags are coded as deltas against the
//! previous band with probabilities that cheapen runs, plus an optional
//! `tf_select` bit that remaps the whole frame when the two candidate
//! rows actually differ for the coded pattern.

use crate::range::{RangeDecoder, RangeEncoder};
use crate::tables::{MAX_BANDS, TF_SELECT_TABLE};

/// Encodes per-band TF flags (0/1 in `tf_res`) and rewrites them to final
/// resolution changes from the select table.
pub fn tf_encode(enc: &mut RangeEncoder, is_transient: bool, tf_res: &mut [i32], lm: usize) {
    let mut budget = (enc.storage() * 8) as i32;
    let mut tell = enc.tell();
    let mut logp: u32 = if is_transient { 2 } else { 4 };
    let tf_select_rsv = lm > 0 && tell + logp as i32 + 1 <= budget;
    if tf_select_rsv {
        budget -= 1;
    }
    let mut curr = 0i32;
    let mut tf_changed = 0i32;
    for flag in tf_res.iter_mut().take(MAX_BANDS) {
        if tell + logp as i32 <= budget {
            enc.encode_bit(*flag ^ curr, logp);
            tell = enc.tell();
            curr = *flag;
            tf_changed |= curr;
        } else {
            *flag = curr;
        }
        logp = if is_transient { 4 } else { 5 };
    }
    let t = usize::from(is_transient);
    // The select bit is only worth coding when it changes the outcome.
    let tf_select = 0usize;
    if tf_select_rsv
        && TF_SELECT_TABLE[lm][4 * t + tf_changed as usize]
            != TF_SELECT_TABLE[lm][4 * t + 2 + tf_changed as usize]
    {
        enc.encode_bit(tf_select as i32, 1);
    }
    for flag in tf_res.iter_mut().take(MAX_BANDS) {
        *flag = i32::from(TF_SELECT_TABLE[lm][4 * t + 2 * tf_select + *flag as usize]);
    }
}

/// Decodes per-band TF resolution changes.
pub fn tf_decode(dec: &mut RangeDecoder, is_transient: bool, tf_res: &mut [i32], lm: usize) {
    let mut budget = dec.storage_bits() as i32;
    let mut tell = dec.tell();
    let mut logp: u32 = if is_transient { 2 } else { 4 };
    let tf_select_rsv = lm > 0 && tell + logp as i32 + 1 <= budget;
    if tf_select_rsv {
        budget -= 1;
    }
    let mut curr = 0i32;
    let mut tf_changed = 0i32;
    for flag in tf_res.iter_mut().take(MAX_BANDS) {
        if tell + logp as i32 <= budget {
            curr ^= dec.decode_bit(logp);
            tell = dec.tell();
            tf_changed |= curr;
        }
        *flag = curr;
        logp = if is_transient { 4 } else { 5 };
    }
    let t = usize::from(is_transient);
    let mut tf_select = 0usize;
    if tf_select_rsv
        && TF_SELECT_TABLE[lm][4 * t + tf_changed as usize]
            != TF_SELECT_TABLE[lm][4 * t + 2 + tf_changed as usize]
    {
        tf_select = dec.decode_bit(1) as usize;
    }
    for flag in tf_res.iter_mut().take(MAX_BANDS) {
        *flag = i32::from(TF_SELECT_TABLE[lm][4 * t + 2 * tf_select + *flag as usize]);
    }
}
