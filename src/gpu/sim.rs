//! Reference compute device
//!
//! Executes the engine's kernels on host memory with the exact buffer
//! layouts a hardware backend would use. Lanes are advanced in parallel
//! with rayon; the per-lane collector and loop-ring regions are disjoint,
//! so no lane ever touches another lane's state. Serves as the CPU
//! fallback and as the test vehicle for the full device protocol.

use anyhow::{anyhow, bail, Result};
use rayon::prelude::*;

use crate::dp::is_distinguished;
use crate::gpu::device::{
    BufferId, ComputeDevice, DeviceGeneration, DeviceInfo, KernelId, KERNEL_COLLECT_DPS,
    KERNEL_RESEED_LOOPED, KERNEL_STEP_MAIN, KERNEL_STEP_OLDGPU,
};
use crate::gpu::shared::{
    decode_jump, jump_select, KernelParams, LaneRecord, DBG_DRAIN_OVERFLOW, DBG_LOOPS_FLAGGED,
    DBG_RESEEDS, DBG_SLOT_OVERFLOW, JUMP_BYTES, LANE_BYTES, LANE_DP_BLOCK_BYTES, LOOPED_HEADER_BYTES,
    LOOP_RING_BYTES,
};
use crate::math::curve::Secp256k1;
use crate::types::{read_u64, DpRecord, JumpEntry};

const KERNEL_NAMES: [&str; 4] = [
    KERNEL_STEP_MAIN,
    KERNEL_STEP_OLDGPU,
    KERNEL_COLLECT_DPS,
    KERNEL_RESEED_LOOPED,
];

/// Host-memory device with name-addressable kernels.
pub struct ReferenceDevice {
    info: DeviceInfo,
    buffers: Vec<Option<Vec<u8>>>,
    allocated: usize,
    alloc_limit: Option<usize>,
    curve: Secp256k1,
}

impl ReferenceDevice {
    pub fn new(index: u32, compute_units: u32, generation: DeviceGeneration) -> Self {
        ReferenceDevice {
            info: DeviceInfo {
                index,
                name: format!("reference-{}", index),
                compute_units,
                generation,
                total_mem: u64::MAX,
            },
            buffers: Vec::new(),
            allocated: 0,
            alloc_limit: None,
            curve: Secp256k1::new(),
        }
    }

    /// Cap total allocatable bytes; allocations past the cap fail like a
    /// device out-of-memory would.
    pub fn with_alloc_limit(mut self, limit: usize) -> Self {
        self.alloc_limit = Some(limit);
        self.info.total_mem = limit as u64;
        self
    }

    /// Buffers currently allocated, for teardown checks.
    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    fn take(&mut self, buf: BufferId) -> Result<Vec<u8>> {
        self.buffers
            .get_mut(buf.0)
            .and_then(|b| b.take())
            .ok_or_else(|| anyhow!("invalid buffer handle {}", buf.0))
    }

    fn put(&mut self, buf: BufferId, data: Vec<u8>) {
        self.buffers[buf.0] = Some(data);
    }

    fn read_params(&mut self, buf: BufferId) -> Result<KernelParams> {
        let raw = self.take(buf)?;
        if raw.len() < KernelParams::BYTES {
            self.put(buf, raw);
            bail!("params buffer too small");
        }
        let params = KernelParams::decode(&raw);
        self.put(buf, raw);
        Ok(params)
    }

    fn decode_table(raw: &[u8], jmp_cnt: usize) -> Result<Vec<JumpEntry>> {
        if raw.len() < jmp_cnt * JUMP_BYTES {
            bail!("jump table buffer too small");
        }
        Ok(raw
            .chunks_exact(JUMP_BYTES)
            .take(jmp_cnt)
            .map(decode_jump)
            .collect())
    }

    /// One table-selected jump per lane, loop fingerprint check, DP slot
    /// write. Flagged lanes idle until the reseed kernel handles them.
    fn run_step(&mut self, args: &[BufferId]) -> Result<()> {
        let [params_b, kangs_b, j1_b, j2_b, j3_b, dp_b, loop_b, looped_b, dbg_b] =
            expect_args::<9>(args)?;
        let params = self.read_params(params_b)?;
        let lanes = params.kang_cnt as usize;
        let md_len = params.md_len as usize;

        let j1 = self.take(j1_b)?;
        let j2 = self.take(j2_b)?;
        let j3 = self.take(j3_b)?;
        let mut kangs = self.take(kangs_b)?;
        let mut dp = self.take(dp_b)?;
        let mut rings = self.take(loop_b)?;

        let restore = |dev: &mut Self, kangs, dp, rings, j1, j2, j3| {
            dev.put(kangs_b, kangs);
            dev.put(dp_b, dp);
            dev.put(loop_b, rings);
            dev.put(j1_b, j1);
            dev.put(j2_b, j2);
            dev.put(j3_b, j3);
        };

        let tables = match (
            Self::decode_table(&j1, params.jmp_cnt as usize),
            Self::decode_table(&j2, params.jmp_cnt as usize),
            Self::decode_table(&j3, params.jmp_cnt as usize),
        ) {
            (Ok(a), Ok(b), Ok(c)) => [a, b, c],
            _ => {
                restore(self, kangs, dp, rings, j1, j2, j3);
                bail!("malformed jump table upload");
            }
        };
        if kangs.len() < lanes * LANE_BYTES
            || dp.len() < lanes * LANE_DP_BLOCK_BYTES
            || rings.len() < lanes * LOOP_RING_BYTES
        {
            restore(self, kangs, dp, rings, j1, j2, j3);
            bail!("lane buffers undersized for {} lanes", lanes);
        }

        let curve = &self.curve;
        let dp_bits = params.dp_bits;
        let dp_slots = params.dp_slots as usize;
        let outcomes: Vec<(bool, u32)> = kangs[..lanes * LANE_BYTES]
            .par_chunks_mut(LANE_BYTES)
            .zip(dp[..lanes * LANE_DP_BLOCK_BYTES].par_chunks_mut(LANE_DP_BLOCK_BYTES))
            .zip(rings[..lanes * LOOP_RING_BYTES].par_chunks_mut(LOOP_RING_BYTES))
            .map(|((lane_buf, dp_block), ring)| {
                step_lane(curve, &tables, lane_buf, dp_block, ring, dp_bits, dp_slots, md_len)
            })
            .collect();

        restore(self, kangs, dp, rings, j1, j2, j3);

        // append-only updates that hardware serializes with atomics
        let mut looped = self.take(looped_b)?;
        let mut pending = u32::from_le_bytes([looped[0], looped[1], looped[2], looped[3]]);
        let mut flagged = 0u32;
        let mut slot_drops = 0u32;
        for (lane, (newly_looped, drops)) in outcomes.iter().enumerate() {
            if *newly_looped {
                let off = LOOPED_HEADER_BYTES + pending as usize * 4;
                if off + 4 <= looped.len() {
                    looped[off..off + 4].copy_from_slice(&(lane as u32).to_le_bytes());
                    pending += 1;
                }
                flagged += 1;
            }
            slot_drops += drops;
        }
        looped[0..4].copy_from_slice(&pending.to_le_bytes());
        self.put(looped_b, looped);

        let mut dbg = self.take(dbg_b)?;
        bump_u32(&mut dbg, DBG_SLOT_OVERFLOW, slot_drops);
        bump_u32(&mut dbg, DBG_LOOPS_FLAGGED, flagged);
        self.put(dbg_b, dbg);
        Ok(())
    }

    /// Compact per-lane slots into the output array and reset the slot
    /// counters. Output past capacity is dropped, not wrapped.
    fn run_collect(&mut self, args: &[BufferId]) -> Result<()> {
        let [params_b, dp_b, out_b, dbg_b] = expect_args::<4>(args)?;
        let params = self.read_params(params_b)?;
        let lanes = params.kang_cnt as usize;

        let mut dp = self.take(dp_b)?;
        let mut out = self.take(out_b)?;
        let mut n = u32::from_le_bytes([out[0], out[1], out[2], out[3]]);
        let mut dropped = 0u32;
        for lane in 0..lanes {
            let base = lane * LANE_DP_BLOCK_BYTES;
            let cnt = (read_u64(&dp, base) as usize).min(params.dp_slots as usize);
            for slot in 0..cnt {
                if (n as usize) < params.max_dp_cnt as usize {
                    let src = base + 8 + slot * DpRecord::BYTES;
                    let dst = 16 + n as usize * DpRecord::BYTES;
                    out[dst..dst + DpRecord::BYTES]
                        .copy_from_slice(&dp[src..src + DpRecord::BYTES]);
                    n += 1;
                } else {
                    dropped += 1;
                }
            }
            dp[base..base + 8].copy_from_slice(&0u64.to_le_bytes());
        }
        out[0..4].copy_from_slice(&n.to_le_bytes());
        self.put(dp_b, dp);
        self.put(out_b, out);

        let mut dbg = self.take(dbg_b)?;
        bump_u32(&mut dbg, DBG_DRAIN_OVERFLOW, dropped);
        self.put(dbg_b, dbg);
        Ok(())
    }

    /// Give every flagged lane a fresh random offset: position jumps by a
    /// precomputed random point, the distance absorbs the matching
    /// generator multiple, so the lane stays a valid sample of its herd.
    fn run_reseed(&mut self, args: &[BufferId]) -> Result<()> {
        let [params_b, kangs_b, looped_b, loop_b, rnd_b, dbg_b] = expect_args::<6>(args)?;
        let params = self.read_params(params_b)?;
        let lanes = params.kang_cnt as usize;

        let mut looped = self.take(looped_b)?;
        let pending = u32::from_le_bytes([looped[0], looped[1], looped[2], looped[3]]);
        if pending == 0 {
            self.put(looped_b, looped);
            return Ok(());
        }
        let mut kangs = self.take(kangs_b)?;
        let mut rings = self.take(loop_b)?;
        let rnd = self.take(rnd_b)?;

        for i in 0..pending as usize {
            let off = LOOPED_HEADER_BYTES + i * 4;
            let lane = u32::from_le_bytes([
                looped[off],
                looped[off + 1],
                looped[off + 2],
                looped[off + 3],
            ]) as usize;
            if lane >= lanes {
                continue;
            }
            let base = lane * LANE_BYTES;
            let mut rec = LaneRecord::decode(&kangs[base..base + LANE_BYTES]);
            let rnd_idx = (lane + rec.step as usize) % lanes;
            let offset = decode_jump(&rnd[rnd_idx * JUMP_BYTES..(rnd_idx + 1) * JUMP_BYTES]);
            rec.pos = self.curve.add(&rec.pos, &offset.point);
            rec.dist = rec.dist.add(&offset.dist);
            rec.looped = false;
            rec.encode(&mut kangs[base..base + LANE_BYTES]);
            let ring = lane * LOOP_RING_BYTES;
            rings[ring..ring + LOOP_RING_BYTES].fill(0);
        }
        let total = u32::from_le_bytes([looped[4], looped[5], looped[6], looped[7]]) + pending;
        looped[4..8].copy_from_slice(&total.to_le_bytes());
        looped[0..4].copy_from_slice(&0u32.to_le_bytes());

        self.put(kangs_b, kangs);
        self.put(loop_b, rings);
        self.put(rnd_b, rnd);
        self.put(looped_b, looped);

        let mut dbg = self.take(dbg_b)?;
        bump_u32(&mut dbg, DBG_RESEEDS, pending);
        self.put(dbg_b, dbg);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn step_lane(
    curve: &Secp256k1,
    tables: &[Vec<JumpEntry>; 3],
    lane_buf: &mut [u8],
    dp_block: &mut [u8],
    ring: &mut [u8],
    dp_bits: u32,
    dp_slots: usize,
    md_len: usize,
) -> (bool, u32) {
    let mut lane = LaneRecord::decode(lane_buf);
    if lane.looped {
        return (false, 0);
    }
    let (table, entry) = jump_select(lane.pos.x.limbs[0]);
    let jump = &tables[table][entry];
    lane.pos = curve.add(&lane.pos, &jump.point);
    lane.dist = lane.dist.add(&jump.dist);
    lane.step = lane.step.wrapping_add(1);

    let fp = lane.pos.x.limbs[0];
    let mut revisited = false;
    for i in 0..md_len {
        if read_u64(ring, i * 8) == fp {
            revisited = true;
            break;
        }
    }
    let mut drops = 0;
    if revisited {
        lane.looped = true;
    } else {
        let slot = lane.step as usize % md_len;
        ring[slot * 8..(slot + 1) * 8].copy_from_slice(&fp.to_le_bytes());
        if is_distinguished(&lane.pos.x.limbs, dp_bits) {
            let count = read_u64(dp_block, 0) as usize;
            if count < dp_slots {
                let rec = DpRecord {
                    x: lane.pos.x.limbs,
                    dist: lane.dist,
                    kind: lane.kind,
                };
                let off = 8 + count * DpRecord::BYTES;
                dp_block[off..off + DpRecord::BYTES].copy_from_slice(&rec.to_bytes());
                dp_block[0..8].copy_from_slice(&((count + 1) as u64).to_le_bytes());
            } else {
                drops = 1;
            }
        }
    }
    lane.encode(lane_buf);
    (revisited, drops)
}

fn expect_args<const N: usize>(args: &[BufferId]) -> Result<[BufferId; N]> {
    args.try_into()
        .map_err(|_| anyhow!("kernel expects {} buffer arguments, got {}", N, args.len()))
}

fn bump_u32(dbg: &mut [u8], slot: usize, by: u32) {
    let off = slot * 4;
    let cur = u32::from_le_bytes([dbg[off], dbg[off + 1], dbg[off + 2], dbg[off + 3]]);
    dbg[off..off + 4].copy_from_slice(&cur.wrapping_add(by).to_le_bytes());
}

impl ComputeDevice for ReferenceDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn alloc(&mut self, len: usize) -> Result<BufferId> {
        if let Some(limit) = self.alloc_limit {
            if self.allocated + len > limit {
                bail!(
                    "out of device memory: {} + {} exceeds {}",
                    self.allocated,
                    len,
                    limit
                );
            }
        }
        self.allocated += len;
        self.buffers.push(Some(vec![0u8; len]));
        Ok(BufferId(self.buffers.len() - 1))
    }

    fn free(&mut self, buf: BufferId) {
        if let Some(slot) = self.buffers.get_mut(buf.0) {
            if let Some(data) = slot.take() {
                self.allocated -= data.len();
            }
        }
    }

    fn upload(&mut self, buf: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        let dst = self
            .buffers
            .get_mut(buf.0)
            .and_then(|b| b.as_mut())
            .ok_or_else(|| anyhow!("invalid buffer handle {}", buf.0))?;
        if offset + data.len() > dst.len() {
            bail!("upload out of bounds");
        }
        dst[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn download(&mut self, buf: BufferId, offset: usize, out: &mut [u8]) -> Result<()> {
        let src = self
            .buffers
            .get(buf.0)
            .and_then(|b| b.as_ref())
            .ok_or_else(|| anyhow!("invalid buffer handle {}", buf.0))?;
        if offset + out.len() > src.len() {
            bail!("download out of bounds");
        }
        out.copy_from_slice(&src[offset..offset + out.len()]);
        Ok(())
    }

    fn kernel(&mut self, name: &str) -> Result<KernelId> {
        KERNEL_NAMES
            .iter()
            .position(|k| *k == name)
            .map(KernelId)
            .ok_or_else(|| anyhow!("unknown kernel {:?}", name))
    }

    fn launch(
        &mut self,
        kernel: KernelId,
        _blocks: u32,
        _threads: u32,
        args: &[BufferId],
    ) -> Result<()> {
        // geometry is advisory here; both step variants share semantics on
        // host memory
        match KERNEL_NAMES.get(kernel.0).copied() {
            Some(KERNEL_STEP_MAIN) | Some(KERNEL_STEP_OLDGPU) => self.run_step(args),
            Some(KERNEL_COLLECT_DPS) => self.run_collect(args),
            Some(KERNEL_RESEED_LOOPED) => self.run_reseed(args),
            _ => Err(anyhow!("launch of unresolved kernel")),
        }
    }

    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }
}
