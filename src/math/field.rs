//! Field arithmetic modulo the secp256k1 prime
//!
//! Elements are 4 u64 limbs, little-endian, always canonical in [0, p).
//! p = 2^256 - 2^32 - 977, so reduction folds the high half back through
//! c = 2^32 + 977 instead of dividing.

use anyhow::{anyhow, Result};
use std::fmt;

/// secp256k1 field prime, little-endian limbs.
pub const P: [u64; 4] = [
    0xFFFFFFFEFFFFFC2F,
    0xFFFFFFFFFFFFFFFF,
    0xFFFFFFFFFFFFFFFF,
    0xFFFFFFFFFFFFFFFF,
];

/// c = 2^32 + 977, the fold constant for p = 2^256 - c.
const P_FOLD: u64 = 0x1_0000_03D1;

/// -p^-1 mod 2^30, quotient constant for the inversion's cofactor folds.
const P_INV30: u32 = 0xD225_3531;

/// Field element, canonical residue in [0, p).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldElement {
    /// Limbs in little-endian order.
    pub limbs: [u64; 4],
}

impl FieldElement {
    pub const ZERO: Self = Self { limbs: [0; 4] };
    pub const ONE: Self = Self { limbs: [1, 0, 0, 0] };

    pub const fn from_limbs(limbs: [u64; 4]) -> Self {
        Self { limbs }
    }

    pub fn from_u64(v: u64) -> Self {
        Self { limbs: [v, 0, 0, 0] }
    }

    /// Parse a big-endian 32-byte value. Fails if not canonical.
    pub fn from_bytes_be(bytes: &[u8; 32]) -> Result<Self> {
        let mut limbs = [0u64; 4];
        for i in 0..4 {
            let mut w = [0u8; 8];
            w.copy_from_slice(&bytes[(3 - i) * 8..(4 - i) * 8]);
            limbs[i] = u64::from_be_bytes(w);
        }
        let fe = Self { limbs };
        if fe.gte_p() {
            return Err(anyhow!("field element not in canonical range"));
        }
        Ok(fe)
    }

    pub fn to_bytes_be(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for i in 0..4 {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&self.limbs[3 - i].to_be_bytes());
        }
        bytes
    }

    /// Parse a 64-character hex string (optionally 0x-prefixed).
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim_start_matches("0x");
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(anyhow!("expected 32 bytes of hex, got {}", bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes_be(&arr)
    }

    pub fn is_zero(&self) -> bool {
        self.limbs == [0; 4]
    }

    /// Number of trailing zero bits, 256 for zero.
    pub fn trailing_zeros(&self) -> u32 {
        for i in 0..4 {
            if self.limbs[i] != 0 {
                return i as u32 * 64 + self.limbs[i].trailing_zeros();
            }
        }
        256
    }

    fn gte_p(&self) -> bool {
        for i in (0..4).rev() {
            if self.limbs[i] > P[i] {
                return true;
            }
            if self.limbs[i] < P[i] {
                return false;
            }
        }
        true
    }

    fn sub_p_assign(&mut self) {
        let mut borrow = 0u64;
        for i in 0..4 {
            let (d, b1) = self.limbs[i].overflowing_sub(P[i]);
            let (d, b2) = d.overflowing_sub(borrow);
            self.limbs[i] = d;
            borrow = (b1 as u64) + (b2 as u64);
        }
    }

    fn add_p_assign(&mut self) {
        let mut carry = 0u64;
        for i in 0..4 {
            let (s, c1) = self.limbs[i].overflowing_add(P[i]);
            let (s, c2) = s.overflowing_add(carry);
            self.limbs[i] = s;
            carry = (c1 as u64) + (c2 as u64);
        }
    }

    /// Modular addition with a single conditional -p correction.
    pub fn add(&self, rhs: &Self) -> Self {
        let mut r = [0u64; 4];
        let mut carry = 0u64;
        for i in 0..4 {
            let (s, c1) = self.limbs[i].overflowing_add(rhs.limbs[i]);
            let (s, c2) = s.overflowing_add(carry);
            r[i] = s;
            carry = (c1 as u64) + (c2 as u64);
        }
        let mut out = Self { limbs: r };
        if carry != 0 || out.gte_p() {
            out.sub_p_assign();
        }
        out
    }

    /// Modular subtraction with a single conditional +p correction.
    pub fn sub(&self, rhs: &Self) -> Self {
        let mut r = [0u64; 4];
        let mut borrow = 0u64;
        for i in 0..4 {
            let (d, b1) = self.limbs[i].overflowing_sub(rhs.limbs[i]);
            let (d, b2) = d.overflowing_sub(borrow);
            r[i] = d;
            borrow = (b1 as u64) + (b2 as u64);
        }
        let mut out = Self { limbs: r };
        if borrow != 0 {
            out.add_p_assign();
        }
        out
    }

    pub fn neg(&self) -> Self {
        if self.is_zero() {
            return Self::ZERO;
        }
        let mut r = [0u64; 4];
        let mut borrow = 0u64;
        for i in 0..4 {
            let (d, b1) = P[i].overflowing_sub(self.limbs[i]);
            let (d, b2) = d.overflowing_sub(borrow);
            r[i] = d;
            borrow = (b1 as u64) + (b2 as u64);
        }
        Self { limbs: r }
    }

    pub fn mul(&self, rhs: &Self) -> Self {
        reduce_wide(mul_wide(&self.limbs, &rhs.limbs))
    }

    /// Squaring: each cross term computed once and doubled.
    pub fn sqr(&self) -> Self {
        reduce_wide(sqr_wide(&self.limbs))
    }

    /// Modular inverse via a 30-bit-digit divstep recurrence over 288-bit
    /// sign-extended accumulators. Inverse of zero is a contract violation;
    /// callers must guarantee a non-zero operand.
    pub fn inv(&self) -> Self {
        debug_assert!(!self.is_zero(), "inverse of zero");
        let mut modp = acc_from_limbs(&P);
        let mut val = acc_from_limbs(&self.limbs);
        let mut kbnt = -1i32;

        let m = divstep_digit(val[0] as i32, modp[0] as i32, &mut kbnt);
        apply_digit(&m, &mut modp, &mut val);
        let mut res = mont_fold(&set_288_i32(m[1]));
        let mut aco = mont_fold(&set_288_i32(m[3]));

        let (mut t0, mut t1);
        loop {
            let m = divstep_digit(val[0] as i32, modp[0] as i32, &mut kbnt);
            apply_digit(&m, &mut modp, &mut val);
            t0 = mul_288_by_i32(&res, m[0]);
            t1 = mul_288_by_i32(&aco, m[1]);
            if val[..8].iter().all(|&w| w == 0) {
                break;
            }
            let t2 = mul_288_by_i32(&res, m[2]);
            let t3 = mul_288_by_i32(&aco, m[3]);
            res = mont_fold2(&t0, &t1);
            aco = mont_fold2(&t2, &t3);
        }
        let mut out = mont_fold2(&t0, &t1);
        if (modp[8] as i32) < 0 {
            out = neg_288(&out);
        }
        let p_acc = acc_from_limbs(&P);
        let p_neg = neg_288(&p_acc);
        while (out[8] as i32) < 0 {
            out = add_288(&out, &p_acc);
        }
        while (out[8] as i32) > 0 {
            out = add_288(&out, &p_neg);
        }
        Self { limbs: acc_to_limbs(&out) }
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..4).rev() {
            write!(f, "{:016x}", self.limbs[i])?;
        }
        Ok(())
    }
}

/// Schoolbook 4x4 multiply to a 512-bit intermediate.
fn mul_wide(a: &[u64; 4], b: &[u64; 4]) -> [u64; 8] {
    let mut r = [0u64; 8];
    for i in 0..4 {
        let mut carry = 0u128;
        for j in 0..4 {
            let t = r[i + j] as u128 + a[i] as u128 * b[j] as u128 + carry;
            r[i + j] = t as u64;
            carry = t >> 64;
        }
        r[i + 4] = carry as u64;
    }
    r
}

/// Squaring to 512 bits: off-diagonal products once, doubled, then squares.
fn sqr_wide(a: &[u64; 4]) -> [u64; 8] {
    let mut r = [0u64; 8];
    for i in 0..4 {
        let mut carry = 0u128;
        for j in (i + 1)..4 {
            let t = r[i + j] as u128 + a[i] as u128 * a[j] as u128 + carry;
            r[i + j] = t as u64;
            carry = t >> 64;
        }
        let mut k = i + 4;
        let mut c = carry as u64;
        while c != 0 {
            let (s, o) = r[k].overflowing_add(c);
            r[k] = s;
            c = o as u64;
            k += 1;
        }
    }
    let mut prev = 0u64;
    for limb in r.iter_mut() {
        let cur = *limb;
        *limb = (cur << 1) | (prev >> 63);
        prev = cur;
    }
    let mut carry = 0u128;
    for i in 0..4 {
        let sq = a[i] as u128 * a[i] as u128;
        let t0 = r[2 * i] as u128 + (sq as u64 as u128) + carry;
        r[2 * i] = t0 as u64;
        let t1 = r[2 * i + 1] as u128 + (sq >> 64) + (t0 >> 64);
        r[2 * i + 1] = t1 as u64;
        carry = t1 >> 64;
    }
    r
}

/// Fold the high half through c twice, then at most one -p correction.
fn reduce_wide(w: [u64; 8]) -> FieldElement {
    let mut t = [0u64; 5];
    let mut carry = 0u128;
    for i in 0..4 {
        let v = w[4 + i] as u128 * P_FOLD as u128 + carry;
        t[i] = v as u64;
        carry = v >> 64;
    }
    t[4] = carry as u64;

    let mut acc = [0u64; 5];
    let mut carry = 0u128;
    for i in 0..4 {
        let v = w[i] as u128 + t[i] as u128 + carry;
        acc[i] = v as u64;
        carry = v >> 64;
    }
    acc[4] = t[4] + carry as u64;

    let v = acc[4] as u128 * P_FOLD as u128;
    let mut r = [0u64; 4];
    let mut carry = 0u128;
    for i in 0..4 {
        let add = match i {
            0 => v as u64,
            1 => (v >> 64) as u64,
            _ => 0,
        };
        let s = acc[i] as u128 + add as u128 + carry;
        r[i] = s as u64;
        carry = s >> 64;
    }
    let mut out = FieldElement { limbs: r };
    if carry != 0 || out.gte_p() {
        out.sub_p_assign();
    }
    out
}

// 288-bit accumulators for the inversion: 9 u32 limbs, two's complement.
// The invariant throughout is that one 30-bit digit step never overflows
// the ninth (sign) limb; the digit width and accumulator width must be
// re-derived together if either changes.
type Acc = [u32; 9];

fn acc_from_limbs(l: &[u64; 4]) -> Acc {
    let mut r = [0u32; 9];
    for i in 0..4 {
        r[2 * i] = l[i] as u32;
        r[2 * i + 1] = (l[i] >> 32) as u32;
    }
    r
}

fn acc_to_limbs(a: &Acc) -> [u64; 4] {
    let mut r = [0u64; 4];
    for i in 0..4 {
        r[i] = a[2 * i] as u64 | ((a[2 * i + 1] as u64) << 32);
    }
    r
}

fn add_288(a: &Acc, b: &Acc) -> Acc {
    let mut r = [0u32; 9];
    let mut carry = 0u64;
    for i in 0..9 {
        let s = a[i] as u64 + b[i] as u64 + carry;
        r[i] = s as u32;
        carry = s >> 32;
    }
    r
}

fn neg_288(a: &Acc) -> Acc {
    let mut r = [0u32; 9];
    let mut borrow = 0i64;
    for i in 0..9 {
        let d = 0i64 - a[i] as i64 - borrow;
        r[i] = d as u32;
        borrow = (d < 0) as i64;
    }
    r
}

fn mul_288_by_i32(a: &Acc, m: i32) -> Acc {
    let v = m.unsigned_abs() as u64;
    let mut r = [0u32; 9];
    let mut carry = 0u64;
    for i in 0..9 {
        let t = a[i] as u64 * v + carry;
        r[i] = t as u32;
        carry = t >> 32;
    }
    if m < 0 {
        neg_288(&r)
    } else {
        r
    }
}

fn set_288_i32(v: i32) -> Acc {
    let ext = if v < 0 { u32::MAX } else { 0 };
    let mut r = [ext; 9];
    r[0] = v as u32;
    r
}

/// p * v for v < 2^30, as (v << 256) - v * c in two's complement.
fn mul_p_by_u32(v: u32) -> Acc {
    let t = v as u128 * P_FOLD as u128;
    let tl = [t as u32, (t >> 32) as u32, (t >> 64) as u32];
    let mut r = [0u32; 9];
    let mut borrow = 0i64;
    for i in 0..9 {
        let sub = if i < 3 { tl[i] as i64 } else { 0 };
        let base = if i == 8 { v as i64 } else { 0 };
        let d = base - sub - borrow;
        r[i] = d as u32;
        borrow = (d < 0) as i64;
    }
    r
}

/// Arithmetic right shift by one 30-bit digit.
fn shr_288_by_30(a: &Acc) -> Acc {
    let mut r = [0u32; 9];
    for i in 0..8 {
        r[i] = (a[i] >> 30) | (a[i + 1] << 2);
    }
    r[8] = ((a[8] as i32) >> 30) as u32;
    r
}

/// (x + q*p) >> 30 with q chosen so the low digit cancels.
fn mont_fold(x: &Acc) -> Acc {
    let q = x[0].wrapping_mul(P_INV30) & 0x3FFF_FFFF;
    shr_288_by_30(&add_288(&mul_p_by_u32(q), x))
}

fn mont_fold2(x: &Acc, y: &Acc) -> Acc {
    let q = x[0].wrapping_add(y[0]).wrapping_mul(P_INV30) & 0x3FFF_FFFF;
    let r = add_288(&mul_p_by_u32(q), x);
    shr_288_by_30(&add_288(&r, y))
}

fn apply_digit(m: &[i32; 4], modp: &mut Acc, val: &mut Acc) {
    let t0 = mul_288_by_i32(modp, m[0]);
    let t1 = mul_288_by_i32(val, m[1]);
    let t2 = mul_288_by_i32(modp, m[2]);
    let t3 = mul_288_by_i32(val, m[3]);
    *modp = shr_288_by_30(&add_288(&t0, &t1));
    *val = shr_288_by_30(&add_288(&t2, &t3));
}

/// Eliminate up to 30 bits of the working value, accumulating the small
/// multipliers into a 2x2 transform matrix. `kbnt` tracks the signed bit
/// balance between the two accumulators; a negative balance triggers the
/// swap-and-negate step of the gcd recurrence.
fn divstep_digit(val_w: i32, modp_w: i32, kbnt: &mut i32) -> [i32; 4] {
    let mut m = [1i32, 0, 0, 1];
    let mut v = val_w;
    let mut p = modp_w;
    let mut idx = ((v as u32) | 0x4000_0000).trailing_zeros() as i32;
    m[0] = m[0].wrapping_shl(idx as u32);
    m[1] = m[1].wrapping_shl(idx as u32);
    *kbnt -= idx;
    v >>= idx;
    let mut cnt = 30 - idx;
    while cnt > 0 {
        if *kbnt < 0 {
            *kbnt = -*kbnt;
            let t = p.wrapping_neg();
            p = v;
            v = t;
            let t = m[0].wrapping_neg();
            m[0] = m[2];
            m[2] = t;
            let t = m[1].wrapping_neg();
            m[1] = m[3];
            m[3] = t;
        }
        let mx = if *kbnt + 1 < cnt { 31 - *kbnt } else { 32 - cnt };
        let mut mul = p.wrapping_neg().wrapping_mul(v) & 7;
        mul &= (u32::MAX >> mx) as i32;
        v = v.wrapping_add(p.wrapping_mul(mul));
        m[2] = m[2].wrapping_add(m[0].wrapping_mul(mul));
        m[3] = m[3].wrapping_add(m[1].wrapping_mul(mul));
        idx = ((v as u32) | (1u32 << cnt)).trailing_zeros() as i32;
        m[0] = m[0].wrapping_shl(idx as u32);
        m[1] = m[1].wrapping_shl(idx as u32);
        *kbnt -= idx;
        v >>= idx;
        cnt -= idx;
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_after_add_wrap() {
        let max = FieldElement::from_limbs([
            0xFFFFFFFEFFFFFC2E,
            0xFFFFFFFFFFFFFFFF,
            0xFFFFFFFFFFFFFFFF,
            0xFFFFFFFFFFFFFFFF,
        ]);
        // (p-1) + (p-1) = p - 2 mod p
        let s = max.add(&max);
        assert_eq!(s, max.sub(&FieldElement::ONE));
    }

    #[test]
    fn sub_wraps_through_p() {
        let a = FieldElement::from_u64(1);
        let b = FieldElement::from_u64(2);
        let d = a.sub(&b);
        assert_eq!(d.add(&b), a);
    }

    #[test]
    fn trailing_zero_count() {
        assert_eq!(FieldElement::ZERO.trailing_zeros(), 256);
        assert_eq!(FieldElement::from_u64(1).trailing_zeros(), 0);
        assert_eq!(FieldElement::from_limbs([0, 1, 0, 0]).trailing_zeros(), 64);
        assert_eq!(FieldElement::from_limbs([0, 0, 0x100, 0]).trailing_zeros(), 136);
    }

    #[test]
    fn hex_round_trip() {
        let s = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
        let fe = FieldElement::from_hex(s).unwrap();
        assert_eq!(format!("{}", fe), s);
        assert!(FieldElement::from_hex("ff").is_err());
        // p itself is not canonical
        assert!(FieldElement::from_hex(
            "fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f"
        )
        .is_err());
    }
}
