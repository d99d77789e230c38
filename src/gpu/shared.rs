//! Device buffer layouts shared by the engine and the kernels
//!
//! All multi-byte values are little-endian. The engine sizes and fills
//! these buffers; the kernels (reference or hardware) interpret them.

use crate::math::field::FieldElement;
use crate::types::{read_u64, Distance, JumpEntry, KangarooKind, Point};

/// Entries per jump table. Three tables per run keep lanes from
/// repeating identical jump sequences.
pub const JMP_CNT: usize = 512;

/// Fingerprint ring length of the loop detector, per lane.
pub const MD_LEN: usize = 8;

/// Collector slots per lane between drains.
pub const LANE_DP_SLOTS: usize = 4;

/// Capacity of the drainable output array, records per drain.
pub const MAX_DP_CNT: usize = 16384;

/// Lane record: x (32) | y (32) | dist (24) | aux (8).
pub const LANE_BYTES: usize = 96;

/// Jump entry: x (32) | y (32) | dist (24) | pad (8).
pub const JUMP_BYTES: usize = 96;

/// Per-lane collector block: count (8) | slots.
pub const LANE_DP_BLOCK_BYTES: usize = 8 + LANE_DP_SLOTS * crate::types::DpRecord::BYTES;

/// Output array header: count (4) | pad (12), then the records.
pub const DP_OUT_HEADER_BYTES: usize = 16;

/// Looped-lane list header: pending count (4) | lifetime total (4).
pub const LOOPED_HEADER_BYTES: usize = 8;

/// Loop fingerprint ring, bytes per lane.
pub const LOOP_RING_BYTES: usize = MD_LEN * 8;

/// Debug/stat counter slots (u32 each).
pub const DBG_BYTES: usize = 1024;
pub const DBG_SLOT_OVERFLOW: usize = 0;
pub const DBG_DRAIN_OVERFLOW: usize = 1;
pub const DBG_LOOPS_FLAGGED: usize = 2;
pub const DBG_RESEEDS: usize = 3;

const AUX_LOOPED_BIT: u64 = 1 << 2;

/// Pseudo-random jump selection from the lane's x-coordinate: low bits
/// pick the entry, higher bits pick one of the three tables.
pub fn jump_select(x0: u64) -> (usize, usize) {
    (((x0 >> 32) % 3) as usize, (x0 & (JMP_CNT as u64 - 1)) as usize)
}

/// In-memory view of one lane's device record.
#[derive(Debug, Clone, Copy)]
pub struct LaneRecord {
    pub pos: Point,
    pub dist: Distance,
    pub kind: KangarooKind,
    pub looped: bool,
    pub step: u32,
}

impl LaneRecord {
    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= LANE_BYTES);
        for i in 0..4 {
            out[i * 8..(i + 1) * 8].copy_from_slice(&self.pos.x.limbs[i].to_le_bytes());
            out[32 + i * 8..40 + i * 8].copy_from_slice(&self.pos.y.limbs[i].to_le_bytes());
        }
        for i in 0..3 {
            out[64 + i * 8..72 + i * 8].copy_from_slice(&self.dist.0[i].to_le_bytes());
        }
        let mut aux = self.kind.as_u32() as u64;
        if self.looped {
            aux |= AUX_LOOPED_BIT;
        }
        aux |= (self.step as u64) << 32;
        out[88..96].copy_from_slice(&aux.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> LaneRecord {
        debug_assert!(buf.len() >= LANE_BYTES);
        let mut x = [0u64; 4];
        let mut y = [0u64; 4];
        for i in 0..4 {
            x[i] = read_u64(buf, i * 8);
            y[i] = read_u64(buf, 32 + i * 8);
        }
        let mut d = [0u64; 3];
        for (i, l) in d.iter_mut().enumerate() {
            *l = read_u64(buf, 64 + i * 8);
        }
        let aux = read_u64(buf, 88);
        LaneRecord {
            pos: Point {
                x: FieldElement::from_limbs(x),
                y: FieldElement::from_limbs(y),
            },
            dist: Distance(d),
            kind: KangarooKind::from_u32((aux & 3) as u32).unwrap_or(KangarooKind::Tame),
            looped: aux & AUX_LOOPED_BIT != 0,
            step: (aux >> 32) as u32,
        }
    }
}

pub fn encode_jump(entry: &JumpEntry, out: &mut [u8]) {
    debug_assert!(out.len() >= JUMP_BYTES);
    for i in 0..4 {
        out[i * 8..(i + 1) * 8].copy_from_slice(&entry.point.x.limbs[i].to_le_bytes());
        out[32 + i * 8..40 + i * 8].copy_from_slice(&entry.point.y.limbs[i].to_le_bytes());
    }
    for i in 0..3 {
        out[64 + i * 8..72 + i * 8].copy_from_slice(&entry.dist.0[i].to_le_bytes());
    }
}

pub fn decode_jump(buf: &[u8]) -> JumpEntry {
    debug_assert!(buf.len() >= JUMP_BYTES);
    let mut x = [0u64; 4];
    let mut y = [0u64; 4];
    for i in 0..4 {
        x[i] = read_u64(buf, i * 8);
        y[i] = read_u64(buf, 32 + i * 8);
    }
    let mut d = [0u64; 3];
    for (i, l) in d.iter_mut().enumerate() {
        *l = read_u64(buf, 64 + i * 8);
    }
    JumpEntry {
        point: Point {
            x: FieldElement::from_limbs(x),
            y: FieldElement::from_limbs(y),
        },
        dist: Distance(d),
    }
}

/// Run constants uploaded once at prepare time.
#[derive(Debug, Clone, Copy)]
pub struct KernelParams {
    pub kang_cnt: u32,
    pub dp_bits: u32,
    pub jmp_cnt: u32,
    pub md_len: u32,
    pub dp_slots: u32,
    pub max_dp_cnt: u32,
    pub block_cnt: u32,
    pub block_size: u32,
    pub group_cnt: u32,
}

impl KernelParams {
    pub const BYTES: usize = 36;

    pub fn encode(&self) -> [u8; Self::BYTES] {
        let fields = [
            self.kang_cnt,
            self.dp_bits,
            self.jmp_cnt,
            self.md_len,
            self.dp_slots,
            self.max_dp_cnt,
            self.block_cnt,
            self.block_size,
            self.group_cnt,
        ];
        let mut out = [0u8; Self::BYTES];
        for (i, f) in fields.iter().enumerate() {
            out[i * 4..(i + 1) * 4].copy_from_slice(&f.to_le_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8]) -> KernelParams {
        debug_assert!(buf.len() >= Self::BYTES);
        let f = |i: usize| u32::from_le_bytes([buf[i * 4], buf[i * 4 + 1], buf[i * 4 + 2], buf[i * 4 + 3]]);
        KernelParams {
            kang_cnt: f(0),
            dp_bits: f(1),
            jmp_cnt: f(2),
            md_len: f(3),
            dp_slots: f(4),
            max_dp_cnt: f(5),
            block_cnt: f(6),
            block_size: f(7),
            group_cnt: f(8),
        }
    }
}
