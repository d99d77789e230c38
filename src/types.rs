//! Shared walk types
//!
//! Point, signed walk distance, herd kinds, jump table entries and the
//! fixed-layout distinguished point record exchanged with the device.

use crate::math::field::FieldElement;
use rand::Rng;

/// Affine curve point. (0, 0) is the conventional identity marker; it is
/// not on the curve and never appears as a lane position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: FieldElement,
    pub y: FieldElement,
}

impl Point {
    pub const ZERO: Self = Point {
        x: FieldElement::ZERO,
        y: FieldElement::ZERO,
    };

    pub fn is_zero(&self) -> bool {
        self.x.is_zero() && self.y.is_zero()
    }
}

/// Herd a lane belongs to. Wild2 walks the mirrored target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KangarooKind {
    Tame,
    Wild1,
    Wild2,
}

impl KangarooKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(KangarooKind::Tame),
            1 => Some(KangarooKind::Wild1),
            2 => Some(KangarooKind::Wild2),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            KangarooKind::Tame => 0,
            KangarooKind::Wild1 => 1,
            KangarooKind::Wild2 => 2,
        }
    }
}

/// Signed cumulative jump offset: 192-bit two's complement, little-endian.
/// Headroom covers interval widths up to 170 bits plus guard bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Distance(pub [u64; 3]);

impl Distance {
    pub const ZERO: Self = Distance([0; 3]);

    pub fn from_u64(v: u64) -> Self {
        Distance([v, 0, 0])
    }

    pub fn from_i64(v: i64) -> Self {
        let ext = if v < 0 { u64::MAX } else { 0 };
        Distance([v as u64, ext, ext])
    }

    /// Uniform non-negative value below 2^bits, bits <= 190.
    pub fn random_bits(rng: &mut impl Rng, bits: u32) -> Self {
        debug_assert!(bits <= 190);
        let mut limbs = [0u64; 3];
        for (i, l) in limbs.iter_mut().enumerate() {
            let lo = i as u32 * 64;
            if bits > lo {
                let take = (bits - lo).min(64);
                let mask = if take == 64 { u64::MAX } else { (1u64 << take) - 1 };
                *l = rng.gen::<u64>() & mask;
            }
        }
        Distance(limbs)
    }

    pub fn add(&self, rhs: &Distance) -> Distance {
        let mut r = [0u64; 3];
        let mut carry = 0u64;
        for i in 0..3 {
            let (s, c1) = self.0[i].overflowing_add(rhs.0[i]);
            let (s, c2) = s.overflowing_add(carry);
            r[i] = s;
            carry = (c1 as u64) + (c2 as u64);
        }
        Distance(r)
    }

    pub fn sub(&self, rhs: &Distance) -> Distance {
        self.add(&rhs.neg())
    }

    pub fn neg(&self) -> Distance {
        let mut r = [0u64; 3];
        let mut carry = 1u64;
        for i in 0..3 {
            let (s, c) = (!self.0[i]).overflowing_add(carry);
            r[i] = s;
            carry = c as u64;
        }
        Distance(r)
    }

    pub fn is_negative(&self) -> bool {
        self.0[2] >> 63 == 1
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 3]
    }

    /// Absolute value as raw limbs.
    pub fn magnitude(&self) -> [u64; 3] {
        if self.is_negative() {
            self.neg().0
        } else {
            self.0
        }
    }

    /// Absolute value widened to a 256-bit scalar.
    pub fn magnitude_u256(&self) -> [u64; 4] {
        let m = self.magnitude();
        [m[0], m[1], m[2], 0]
    }
}

/// One precomputed jump: a point and its signed generator multiple.
#[derive(Debug, Clone, Copy)]
pub struct JumpEntry {
    pub point: Point,
    pub dist: Distance,
}

/// Distinguished point record: the fixed 64-byte host-visible layout.
/// x limbs (32) | distance limbs (24) | kind (4) | pad (4), little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpRecord {
    pub x: [u64; 4],
    pub dist: Distance,
    pub kind: KangarooKind,
}

impl DpRecord {
    pub const BYTES: usize = 64;

    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let mut out = [0u8; Self::BYTES];
        for i in 0..4 {
            out[i * 8..(i + 1) * 8].copy_from_slice(&self.x[i].to_le_bytes());
        }
        for i in 0..3 {
            out[32 + i * 8..40 + i * 8].copy_from_slice(&self.dist.0[i].to_le_bytes());
        }
        out[56..60].copy_from_slice(&self.kind.as_u32().to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::BYTES {
            return None;
        }
        let mut x = [0u64; 4];
        for (i, l) in x.iter_mut().enumerate() {
            *l = read_u64(buf, i * 8);
        }
        let mut d = [0u64; 3];
        for (i, l) in d.iter_mut().enumerate() {
            *l = read_u64(buf, 32 + i * 8);
        }
        let kind = KangarooKind::from_u32(u32::from_le_bytes([
            buf[56], buf[57], buf[58], buf[59],
        ]))?;
        Some(DpRecord {
            x,
            dist: Distance(d),
            kind,
        })
    }
}

pub(crate) fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(w)
}
