//! Range coder
//!
//! Entropy coding backend per RFC 6716 Section 4.1. The encoder and
//! decoder are exact inverses: range-coded symbols grow from the front of
//! the buffer while raw (equiprobable) bits are packed backward from the
//! end, and the two regions may share their final byte.
//!
//! Probabilities come in three shapes: explicit cumulative frequencies,
//! inverse-CDF tables with power-of-two totals, and single bits with a
//! log probability. `tell`/`tell_frac` report bits consumed so far and are
//! kept identical between encoder and decoder so budget gates agree.

use thiserror::Error;

/// The coded symbols plus the final flush needed more bytes than the
/// buffer holds; the packet would be missing bits and cannot be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("range coder overran its {0}-byte buffer")]
pub struct RangeOverflow(pub usize);

pub const EC_SYM_BITS: u32 = 8;
pub const EC_SYM_MAX: u32 = (1 << EC_SYM_BITS) - 1;
pub const EC_CODE_BITS: u32 = 32;
pub const EC_CODE_TOP: u32 = 1 << (EC_CODE_BITS - 1);
pub const EC_CODE_BOT: u32 = EC_CODE_TOP >> EC_SYM_BITS;
pub const EC_CODE_SHIFT: u32 = EC_CODE_BITS - EC_SYM_BITS - 1;
pub const EC_CODE_EXTRA: u32 = (EC_CODE_BITS - 2) % EC_SYM_BITS + 1;
pub const EC_WINDOW_SIZE: u32 = 32;
pub const EC_UINT_BITS: u32 = 8;

const CORRECTION: [u32; 8] = [35733, 38967, 42495, 46340, 50535, 55109, 60097, 65535];

/// Integer log base 2: position of the highest set bit plus one, 0 for 0.
#[inline]
pub fn ilog(x: u32) -> u32 {
    32 - x.leading_zeros()
}

fn tell_frac_impl(nbits_total: i32, rng: u32) -> i32 {
    let nbits = nbits_total << 3;
    let l = ilog(rng) as i32;
    let r = rng >> (l - 16);
    let mut b = ((r >> 12) as i32) - 8;
    if r > CORRECTION[b as usize] {
        b += 1;
    }
    nbits - ((l << 3) + b)
}

/// Range encoder writing into a caller-provided buffer.
pub struct RangeEncoder {
    buf: Vec<u8>,
    storage: usize,
    offs: usize,
    end_offs: usize,
    end_window: u32,
    nend_bits: i32,
    nbits_total: i32,
    rng: u32,
    val: u32,
    /// Buffered output byte awaiting carry resolution; -1 before the first.
    rem: i32,
    /// Pending run of 0xFF bytes that a carry would flip to 0x00.
    ext: u32,
    error: bool,
    shrunk: bool,
}

/// Snapshot of encoder state, used by the two-pass coarse energy search.
#[derive(Default, Clone)]
pub struct EncoderState {
    offs: usize,
    end_offs: usize,
    end_window: u32,
    nend_bits: i32,
    nbits_total: i32,
    rng: u32,
    val: u32,
    rem: i32,
    ext: u32,
    error: bool,
    buf_front: Vec<u8>,
    buf_back: Vec<u8>,
}

impl RangeEncoder {
    pub fn new(capacity: usize) -> Self {
        RangeEncoder {
            buf: vec![0; capacity],
            storage: capacity,
            offs: 0,
            end_offs: 0,
            end_window: 0,
            nend_bits: 0,
            nbits_total: (EC_CODE_BITS + 1) as i32,
            rng: EC_CODE_TOP,
            val: 0,
            rem: -1,
            ext: 0,
            error: false,
            shrunk: false,
        }
    }

    /// Caps the output to exactly `size` bytes; `done()` then pads with
    /// zeros up to that size. Raw bits already written from the end are
    /// relocated to the new end.
    pub fn shrink(&mut self, size: usize) {
        if self.offs + self.end_offs > size {
            self.error = true;
            return;
        }
        if size > self.storage {
            return;
        }
        if self.end_offs > 0 {
            self.buf
                .copy_within(self.storage - self.end_offs..self.storage, size - self.end_offs);
        }
        self.storage = size;
        self.shrunk = true;
    }

    fn write_byte(&mut self, b: u8) {
        if self.offs + self.end_offs >= self.storage {
            self.error = true;
            return;
        }
        self.buf[self.offs] = b;
        self.offs += 1;
    }

    fn write_end_byte(&mut self, b: u8) {
        if self.offs + self.end_offs >= self.storage {
            self.error = true;
            return;
        }
        self.end_offs += 1;
        self.buf[self.storage - self.end_offs] = b;
    }

    fn carry_out(&mut self, c: i32) {
        if c as u32 != EC_SYM_MAX {
            let carry = c >> EC_SYM_BITS;
            if self.rem >= 0 {
                self.write_byte((self.rem + carry) as u8);
            }
            if self.ext > 0 {
                let sym = ((EC_SYM_MAX as i32 + carry) & EC_SYM_MAX as i32) as u8;
                while self.ext > 0 {
                    self.write_byte(sym);
                    self.ext -= 1;
                }
            }
            self.rem = c & EC_SYM_MAX as i32;
        } else {
            self.ext += 1;
        }
    }

    fn normalize(&mut self) {
        while self.rng <= EC_CODE_BOT {
            self.carry_out((self.val >> EC_CODE_SHIFT) as i32);
            self.val = (self.val << EC_SYM_BITS) & (EC_CODE_TOP - 1);
            self.rng <<= EC_SYM_BITS;
            self.nbits_total += EC_SYM_BITS as i32;
        }
    }

    /// Encodes a symbol occupying the cumulative range [fl, fh) out of ft.
    pub fn encode(&mut self, fl: u32, fh: u32, ft: u32) {
        let r = self.rng / ft;
        if fl > 0 {
            self.val += self.rng - r * (ft - fl);
            self.rng = r * (fh - fl);
        } else {
            self.rng -= r * (ft - fh);
        }
        self.normalize();
    }

    /// Like [`encode`](Self::encode) with a power-of-two total `1 << bits`.
    pub fn encode_bin(&mut self, fl: u32, fh: u32, bits: u32) {
        if bits == 0 {
            return;
        }
        let r = self.rng >> bits;
        if fl > 0 {
            self.val += self.rng - r * ((1u32 << bits) - fl);
            self.rng = r * (fh - fl);
        } else {
            self.rng -= r * ((1u32 << bits) - fh);
        }
        self.normalize();
    }

    /// Encodes a symbol from an inverse-CDF table with total `1 << ftb`.
    pub fn encode_icdf(&mut self, s: usize, icdf: &[u8], ftb: u32) {
        let r = self.rng >> ftb;
        if s > 0 {
            self.val += self.rng - r * u32::from(icdf[s - 1]);
            self.rng = r * u32::from(icdf[s - 1] - icdf[s]);
        } else {
            self.rng -= r * u32::from(icdf[s]);
        }
        self.normalize();
    }

    /// Encodes one bit with P(1) = 1 / 2^logp.
    pub fn encode_bit(&mut self, bit: i32, logp: u32) {
        if logp == 0 {
            return;
        }
        let r = self.rng;
        let s = r >> logp;
        if bit != 0 {
            self.val += r - s;
            self.rng = s;
        } else {
            self.rng = r - s;
        }
        self.normalize();
    }

    fn encode_uniform_small(&mut self, val: u32, ft: u32) {
        let r = self.rng / ft;
        if val > 0 {
            self.val += self.rng - r * (ft - val);
            self.rng = r;
        } else {
            self.rng -= r * (ft - 1);
        }
        self.normalize();
    }

    /// Encodes a uniformly distributed value in [0, ft). Values with more
    /// than 8 significant bits split into a range-coded high part and raw
    /// low bits.
    pub fn encode_uniform(&mut self, val: u32, ft: u32) {
        if ft <= 1 {
            return;
        }
        let ftb = ilog(ft - 1);
        if ftb > EC_UINT_BITS {
            let ftb = ftb - EC_UINT_BITS;
            let ft1 = ((ft - 1) >> ftb) + 1;
            self.encode_uniform_small(val >> ftb, ft1);
            self.encode_raw_bits(val & ((1 << ftb) - 1), ftb);
        } else {
            self.encode_uniform_small(val, ft);
        }
    }

    /// Appends raw equiprobable bits at the back of the buffer.
    pub fn encode_raw_bits(&mut self, val: u32, bits: u32) {
        if bits == 0 {
            return;
        }
        let mut window = self.end_window;
        let mut used = self.nend_bits;
        if used + bits as i32 > EC_WINDOW_SIZE as i32 {
            while used >= EC_SYM_BITS as i32 {
                self.write_end_byte((window & EC_SYM_MAX) as u8);
                window >>= EC_SYM_BITS;
                used -= EC_SYM_BITS as i32;
            }
        }
        window |= val << used;
        used += bits as i32;
        self.end_window = window;
        self.nend_bits = used;
        self.nbits_total += bits as i32;
    }

    /// Bits written so far, rounded up to whole bits.
    pub fn tell(&self) -> i32 {
        self.nbits_total - ilog(self.rng) as i32
    }

    /// Bits written so far in 1/8-bit units.
    pub fn tell_frac(&self) -> i32 {
        tell_frac_impl(self.nbits_total, self.rng)
    }

    /// Number of range-coded bytes emitted at the front so far.
    pub fn range_bytes(&self) -> usize {
        self.offs
    }

    pub fn storage(&self) -> usize {
        self.storage
    }

    /// Final range value, used as the entropy-coder checksum.
    pub fn range(&self) -> u32 {
        self.rng
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn save_state(&self, state: &mut EncoderState) {
        state.offs = self.offs;
        state.end_offs = self.end_offs;
        state.end_window = self.end_window;
        state.nend_bits = self.nend_bits;
        state.nbits_total = self.nbits_total;
        state.rng = self.rng;
        state.val = self.val;
        state.rem = self.rem;
        state.ext = self.ext;
        state.error = self.error;
        state.buf_front.clear();
        state.buf_front.extend_from_slice(&self.buf[..self.offs]);
        state.buf_back.clear();
        state
            .buf_back
            .extend_from_slice(&self.buf[self.storage - self.end_offs..self.storage]);
    }

    pub fn restore_state(&mut self, state: &EncoderState) {
        self.offs = state.offs;
        self.end_offs = state.end_offs;
        self.end_window = state.end_window;
        self.nend_bits = state.nend_bits;
        self.nbits_total = state.nbits_total;
        self.rng = state.rng;
        self.val = state.val;
        self.rem = state.rem;
        self.ext = state.ext;
        self.error = state.error;
        self.buf[..state.offs].copy_from_slice(&state.buf_front);
        self.buf[self.storage - state.end_offs..self.storage].copy_from_slice(&state.buf_back);
    }

    /// Finalizes the stream and returns the packed bytes. Outputs just
    /// enough of `val` to identify the interval, flushes the carry chain,
    /// zero-fills the gap between the two regions, and merges the last
    /// partial raw byte into the shared boundary byte. Fails if the two
    /// regions ever collided; a truncated packet would decode to garbage.
    pub fn done(mut self) -> Result<Vec<u8>, RangeOverflow> {
        let mut l = EC_CODE_BITS as i32 - ilog(self.rng) as i32;
        let mut msk = (EC_CODE_TOP - 1) >> l;
        let mut end = (self.val + msk) & !msk;
        if (end | msk) >= self.val + self.rng {
            l += 1;
            msk >>= 1;
            end = (self.val + msk) & !msk;
        }
        while l > 0 {
            self.carry_out((end >> EC_CODE_SHIFT) as i32);
            end = (end << EC_SYM_BITS) & (EC_CODE_TOP - 1);
            l -= EC_SYM_BITS as i32;
        }
        if self.rem >= 0 || self.ext > 0 {
            self.carry_out(0);
        }

        let mut window = self.end_window;
        let mut used = self.nend_bits;
        while used >= EC_SYM_BITS as i32 {
            self.write_end_byte((window & EC_SYM_MAX) as u8);
            window >>= EC_SYM_BITS;
            used -= EC_SYM_BITS as i32;
        }

        if !self.error {
            for b in &mut self.buf[self.offs..self.storage - self.end_offs] {
                *b = 0;
            }
            if used > 0 {
                if self.end_offs >= self.storage {
                    self.error = true;
                } else {
                    // The last raw bits may overlap the final range byte;
                    // they only collide if both regions need the bit space.
                    let usable = (-l).max(0);
                    if self.offs + self.end_offs >= self.storage && usable < used {
                        if usable <= 0 {
                            window = 0;
                        } else if usable < 32 {
                            window &= (1u32 << usable) - 1;
                        }
                        self.error = true;
                    }
                    let idx = self.storage - self.end_offs - 1;
                    self.buf[idx] |= window as u8;
                }
            }
        }

        if self.error {
            return Err(RangeOverflow(self.storage));
        }

        let mut pad = 0;
        if used > 0 && self.offs + self.end_offs < self.storage {
            pad = 1;
            self.buf[self.offs] = window as u8;
        }
        let mut packed = self.offs + self.end_offs + pad;
        if self.shrunk {
            packed = self.storage;
        }
        if self.end_offs > 0 {
            let dst = self.offs + pad;
            self.buf
                .copy_within(self.storage - self.end_offs..self.storage, dst);
        }
        self.buf.truncate(packed.min(self.storage));
        Ok(self.buf)
    }
}

/// Range decoder over a packet. Reads past the end of the buffer return
/// zero bytes, so truncated packets decode to deterministic defaults.
pub struct RangeDecoder<'a> {
    buf: &'a [u8],
    storage: usize,
    offs: usize,
    end_offs: usize,
    end_window: u32,
    nend_bits: i32,
    nbits_total: i32,
    rng: u32,
    val: u32,
    /// Scale factor saved between `decode` and `update`.
    ext: u32,
    rem: i32,
    error: bool,
}

impl<'a> RangeDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        let mut d = RangeDecoder {
            buf,
            storage: buf.len(),
            offs: 0,
            end_offs: 0,
            end_window: 0,
            nend_bits: 0,
            nbits_total: (EC_CODE_BITS + 1
                - ((EC_CODE_BITS - EC_CODE_EXTRA) / EC_SYM_BITS) * EC_SYM_BITS)
                as i32,
            rng: 1 << EC_CODE_EXTRA,
            val: 0,
            ext: 0,
            rem: 0,
            error: false,
        };
        d.rem = i32::from(d.read_byte());
        d.val = d.rng - 1 - (d.rem >> (EC_SYM_BITS - EC_CODE_EXTRA)) as u32;
        d.normalize();
        d
    }

    fn read_byte(&mut self) -> u8 {
        if self.offs < self.storage {
            let b = self.buf[self.offs];
            self.offs += 1;
            b
        } else {
            0
        }
    }

    fn normalize(&mut self) {
        while self.rng <= EC_CODE_BOT {
            self.nbits_total += EC_SYM_BITS as i32;
            self.rng <<= EC_SYM_BITS;
            let mut sym = self.rem;
            self.rem = i32::from(self.read_byte());
            sym = (sym << EC_SYM_BITS | self.rem) >> (EC_SYM_BITS - EC_CODE_EXTRA);
            self.val = ((self.val << EC_SYM_BITS) + (EC_SYM_MAX & !(sym as u32)))
                & (EC_CODE_TOP - 1);
        }
    }

    /// Returns the cumulative frequency the stream points at, out of `ft`.
    /// Must be followed by [`update`](Self::update).
    pub fn decode(&mut self, ft: u32) -> u32 {
        self.ext = self.rng / ft;
        let s = (self.val / self.ext).min(ft - 1);
        ft - (s + 1)
    }

    /// Power-of-two variant of [`decode`](Self::decode).
    pub fn decode_bin(&mut self, bits: u32) -> u32 {
        if bits == 0 {
            return 0;
        }
        let ft = 1u32 << bits;
        self.ext = self.rng >> bits;
        let s = (self.val / self.ext).min(ft - 1);
        ft - (s + 1)
    }

    /// Narrows the range to the symbol [fl, fh) identified after `decode`.
    pub fn update(&mut self, fl: u32, fh: u32, ft: u32) {
        let s = self.ext * (ft - fh);
        self.val -= s;
        if fl > 0 {
            self.rng = self.ext * (fh - fl);
        } else {
            self.rng -= s;
        }
        self.normalize();
    }

    /// Decodes a symbol from an inverse-CDF table with total `1 << ftb`.
    pub fn decode_icdf(&mut self, icdf: &[u8], ftb: u32) -> usize {
        let mut s = self.rng;
        let dval = self.val;
        let r = s >> ftb;
        let mut ret = 0usize;
        loop {
            let t = s;
            s = r * u32::from(icdf[ret]);
            if dval >= s {
                self.val = dval - s;
                self.rng = t - s;
                self.normalize();
                return ret;
            }
            ret += 1;
        }
    }

    /// Decodes one bit with P(1) = 1 / 2^logp.
    pub fn decode_bit(&mut self, logp: u32) -> i32 {
        let r = self.rng;
        let dval = self.val;
        let s = r >> logp;
        let ret = i32::from(dval < s);
        if ret == 0 {
            self.val = dval - s;
            self.rng = r - s;
        } else {
            self.rng = s;
        }
        self.normalize();
        ret
    }

    /// Decodes a uniformly distributed value in [0, ft).
    pub fn decode_uniform(&mut self, ft: u32) -> u32 {
        if ft <= 1 {
            return 0;
        }
        let ft = ft - 1;
        let ftb = ilog(ft);
        if ftb > EC_UINT_BITS {
            let ftb = ftb - EC_UINT_BITS;
            let ft1 = (ft >> ftb) + 1;
            let s = self.decode(ft1);
            self.update(s, s + 1, ft1);
            let t = (s << ftb) | self.decode_raw_bits(ftb);
            if t <= ft {
                return t;
            }
            self.error = true;
            ft
        } else {
            let ft = ft + 1;
            let s = self.decode(ft);
            self.update(s, s + 1, ft);
            s
        }
    }

    /// Reads raw equiprobable bits from the back of the buffer.
    pub fn decode_raw_bits(&mut self, bits: u32) -> u32 {
        if bits == 0 {
            return 0;
        }
        while self.nend_bits < bits as i32 {
            if self.end_offs < self.storage {
                self.end_offs += 1;
                self.end_window |=
                    u32::from(self.buf[self.storage - self.end_offs]) << self.nend_bits;
                self.nend_bits += 8;
            } else {
                self.nend_bits = bits as i32;
            }
        }
        let val = self.end_window & ((1u32 << bits) - 1);
        self.end_window >>= bits;
        self.nend_bits -= bits as i32;
        self.nbits_total += bits as i32;
        val
    }

    pub fn tell(&self) -> i32 {
        self.nbits_total - ilog(self.rng) as i32
    }

    pub fn tell_frac(&self) -> i32 {
        tell_frac_impl(self.nbits_total, self.rng)
    }

    pub fn range(&self) -> u32 {
        self.rng
    }

    pub fn storage_bits(&self) -> usize {
        self.storage * 8
    }

    pub fn error(&self) -> bool {
        self.error
    }
}
