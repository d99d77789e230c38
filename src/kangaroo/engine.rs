//! Per-device kangaroo engine
//!
//! Owns every device allocation for one run, drives the
//! step / loop-reseed / collect cycle and drains distinguished points to
//! the host between synchronization boundaries. One engine per device;
//! independent devices are independent engines.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::dp::DpSink;
use crate::gpu::device::{
    BufferId, ComputeDevice, DeviceGeneration, KernelId, Occupancy, KERNEL_COLLECT_DPS,
    KERNEL_RESEED_LOOPED, KERNEL_STEP_MAIN, KERNEL_STEP_OLDGPU,
};
use crate::gpu::shared::{
    encode_jump, KernelParams, LaneRecord, DBG_BYTES, DP_OUT_HEADER_BYTES, JMP_CNT, JUMP_BYTES,
    LANE_BYTES, LANE_DP_BLOCK_BYTES, LANE_DP_SLOTS, LOOPED_HEADER_BYTES, LOOP_RING_BYTES,
    MAX_DP_CNT, MD_LEN,
};
use crate::kangaroo::jumps::JumpTable;
use crate::kangaroo::stats::SpeedStats;
use crate::math::curve::Secp256k1;
use crate::types::{Distance, DpRecord, JumpEntry, KangarooKind, Point};

/// Step launches between DP drains; the drain's synchronize is the
/// cooperative stop boundary.
const STEPS_PER_DRAIN: u32 = 16;

/// Engine lifecycle. `execute` is valid only from `Prepared`; `release`
/// is valid from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Prepared,
    Running,
    Stopping,
    Released,
}

/// Cloneable handle for requesting a cooperative stop from another
/// thread; the engine observes it after the in-flight drain completes.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Buffer and kernel handles of one prepared run.
#[derive(Debug, Clone, Copy)]
struct RunHandles {
    params: BufferId,
    kangs: BufferId,
    jumps: [BufferId; 3],
    dp_table: BufferId,
    dps_out: BufferId,
    loop_table: BufferId,
    looped: BufferId,
    rnd: BufferId,
    dbg: BufferId,
    step_kernel: KernelId,
    collect_kernel: KernelId,
    reseed_kernel: KernelId,
    occupancy: Occupancy,
    kang_cnt: u32,
}

struct PreparedRun {
    handles: RunHandles,
    owned: Vec<BufferId>,
}

/// One device's herd driver.
pub struct KangarooEngine {
    device: Box<dyn ComputeDevice>,
    state: EngineState,
    stop: Arc<AtomicBool>,
    run: Option<PreparedRun>,
    stats: SpeedStats,
}

impl KangarooEngine {
    pub fn new(device: Box<dyn ComputeDevice>) -> Self {
        KangarooEngine {
            device,
            state: EngineState::Uninitialized,
            stop: Arc::new(AtomicBool::new(false)),
            run: None,
            stats: SpeedStats::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Lane population of the prepared run.
    pub fn kang_cnt(&self) -> Option<u32> {
        self.run.as_ref().map(|r| r.handles.kang_cnt)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Average steps/sec over the stats window.
    pub fn stats_speed(&self) -> u64 {
        self.stats.speed()
    }

    /// Size the population, allocate and fill all device state, seed the
    /// herds. Returns false with a logged reason on any failure; no
    /// partial state is retained.
    pub fn prepare(
        &mut self,
        target: &Point,
        range: u32,
        dp_bits: u32,
        jumps: [&JumpTable; 3],
    ) -> bool {
        let index = self.device.info().index;
        if matches!(self.state, EngineState::Running | EngineState::Stopping) {
            error!("GPU {}: prepare() while a run is active", index);
            return false;
        }
        self.release_buffers();
        let mut owned = Vec::new();
        match self.build_run(target, range, dp_bits, jumps, &mut owned) {
            Ok(handles) => {
                self.run = Some(PreparedRun { handles, owned });
                self.state = EngineState::Prepared;
                self.stats.reset();
                self.stop.store(false, Ordering::SeqCst);
                true
            }
            Err(e) => {
                error!("GPU {}: prepare failed: {:#}", index, e);
                for b in owned {
                    self.device.free(b);
                }
                self.run = None;
                self.state = EngineState::Uninitialized;
                false
            }
        }
    }

    fn build_run(
        &mut self,
        target: &Point,
        range: u32,
        dp_bits: u32,
        jumps: [&JumpTable; 3],
        owned: &mut Vec<BufferId>,
    ) -> Result<RunHandles> {
        if !(8..=170).contains(&range) {
            bail!("range {} bits outside supported 8..=170", range);
        }
        if dp_bits > 60 {
            bail!("dp_bits {} outside supported 0..=60", dp_bits);
        }
        let curve = Secp256k1::new();
        if !curve.is_on_curve(target) {
            bail!("target point is not on the curve");
        }
        for (i, t) in jumps.iter().enumerate() {
            t.validate(&curve)
                .with_context(|| format!("jump table {}", i + 1))?;
        }

        let info = self.device.info().clone();
        let occupancy = Occupancy::for_device(&info);
        let kang_cnt = occupancy.kang_cnt();
        let lanes = kang_cnt as usize;

        let step_name = match info.generation {
            DeviceGeneration::Legacy => KERNEL_STEP_OLDGPU,
            DeviceGeneration::Current => KERNEL_STEP_MAIN,
        };
        let step_kernel = self
            .device
            .kernel(step_name)
            .with_context(|| format!("resolving kernel {:?}", step_name))?;
        let collect_kernel = self
            .device
            .kernel(KERNEL_COLLECT_DPS)
            .context("resolving collect kernel")?;
        let reseed_kernel = self
            .device
            .kernel(KERNEL_RESEED_LOOPED)
            .context("resolving reseed kernel")?;

        let mut total = 0usize;
        let dev = self.device.as_mut();
        let params = alloc_buf(dev, owned, &mut total, KernelParams::BYTES, "params")?;
        let kangs = alloc_buf(dev, owned, &mut total, lanes * LANE_BYTES, "lane state")?;
        let jumps_bufs = [
            alloc_buf(dev, owned, &mut total, JMP_CNT * JUMP_BYTES, "jump table 1")?,
            alloc_buf(dev, owned, &mut total, JMP_CNT * JUMP_BYTES, "jump table 2")?,
            alloc_buf(dev, owned, &mut total, JMP_CNT * JUMP_BYTES, "jump table 3")?,
        ];
        let dp_table = alloc_buf(
            dev,
            owned,
            &mut total,
            lanes * LANE_DP_BLOCK_BYTES,
            "dp collector",
        )?;
        let dps_out = alloc_buf(
            dev,
            owned,
            &mut total,
            DP_OUT_HEADER_BYTES + MAX_DP_CNT * DpRecord::BYTES,
            "dp output",
        )?;
        let loop_table = alloc_buf(dev, owned, &mut total, lanes * LOOP_RING_BYTES, "loop table")?;
        let looped = alloc_buf(
            dev,
            owned,
            &mut total,
            LOOPED_HEADER_BYTES + lanes * 4,
            "looped lanes",
        )?;
        let rnd = alloc_buf(dev, owned, &mut total, lanes * JUMP_BYTES, "reseed offsets")?;
        let dbg = alloc_buf(dev, owned, &mut total, DBG_BYTES, "debug counters")?;

        let kparams = KernelParams {
            kang_cnt,
            dp_bits,
            jmp_cnt: JMP_CNT as u32,
            md_len: MD_LEN as u32,
            dp_slots: LANE_DP_SLOTS as u32,
            max_dp_cnt: MAX_DP_CNT as u32,
            block_cnt: occupancy.block_cnt,
            block_size: occupancy.block_size,
            group_cnt: occupancy.group_cnt,
        };
        self.device
            .upload(params, 0, &kparams.encode())
            .context("uploading params")?;
        for (i, table) in jumps.iter().enumerate() {
            self.device
                .upload(jumps_bufs[i], 0, &table.encode())
                .with_context(|| format!("uploading jump table {}", i + 1))?;
        }

        let mut rng = StdRng::from_entropy();
        let lane_bytes = seed_lanes(&curve, target, range, lanes, &mut rng);
        self.device
            .upload(kangs, 0, &lane_bytes)
            .context("uploading seeded lanes")?;
        let rnd_bytes = reseed_offsets(&curve, range, lanes, &mut rng);
        self.device
            .upload(rnd, 0, &rnd_bytes)
            .context("uploading reseed offsets")?;

        info!(
            "GPU {}: allocated {} MB, {} kangaroos, {}x{}x{} ({:?})",
            info.index,
            total / (1024 * 1024),
            kang_cnt,
            occupancy.block_cnt,
            occupancy.block_size,
            occupancy.group_cnt,
            info.generation,
        );
        Ok(RunHandles {
            params,
            kangs,
            jumps: jumps_bufs,
            dp_table,
            dps_out,
            loop_table,
            looped,
            rnd,
            dbg,
            step_kernel,
            collect_kernel,
            reseed_kernel,
            occupancy,
            kang_cnt,
        })
    }

    /// Run until the stop flag is observed or the sink asks to stop.
    /// Returns on device errors without retrying.
    pub fn execute(&mut self, sink: &mut dyn DpSink) -> Result<()> {
        if self.state != EngineState::Prepared {
            bail!("execute() requires a prepared engine, state is {:?}", self.state);
        }
        let handles = self
            .run
            .as_ref()
            .map(|r| r.handles)
            .ok_or_else(|| anyhow!("no prepared run"))?;
        self.stop.store(false, Ordering::SeqCst);
        self.state = EngineState::Running;
        info!(
            "GPU {}: executing, {} lanes, draining every {} steps",
            self.device.info().index,
            handles.kang_cnt,
            STEPS_PER_DRAIN,
        );
        let mut result = Ok(());
        loop {
            match self.drain_cycle(&handles, sink) {
                Ok(false) => continue,
                Ok(true) => {
                    self.state = EngineState::Stopping;
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.state = EngineState::Prepared;
        result
    }

    /// One drain window: step/reseed launches, collect, synchronize,
    /// forward records. Returns true when a stop was observed.
    fn drain_cycle(&mut self, h: &RunHandles, sink: &mut dyn DpSink) -> Result<bool> {
        let t0 = Instant::now();
        let step_args = [
            h.params, h.kangs, h.jumps[0], h.jumps[1], h.jumps[2], h.dp_table, h.loop_table,
            h.looped, h.dbg,
        ];
        let reseed_args = [h.params, h.kangs, h.looped, h.loop_table, h.rnd, h.dbg];
        for _ in 0..STEPS_PER_DRAIN {
            self.device.launch(
                h.step_kernel,
                h.occupancy.block_cnt,
                h.occupancy.block_size,
                &step_args,
            )?;
            self.device.launch(h.reseed_kernel, 1, 1, &reseed_args)?;
        }
        self.device.launch(
            h.collect_kernel,
            h.occupancy.block_cnt,
            h.occupancy.block_size,
            &[h.params, h.dp_table, h.dps_out, h.dbg],
        )?;
        self.device.synchronize()?;

        let mut head = [0u8; 4];
        self.device.download(h.dps_out, 0, &mut head)?;
        let n = (u32::from_le_bytes(head) as usize).min(MAX_DP_CNT);
        if n > 0 {
            let mut raw = vec![0u8; n * DpRecord::BYTES];
            self.device.download(h.dps_out, DP_OUT_HEADER_BYTES, &mut raw)?;
            self.device.upload(h.dps_out, 0, &0u32.to_le_bytes())?;
            let records: Vec<DpRecord> = raw
                .chunks_exact(DpRecord::BYTES)
                .filter_map(DpRecord::from_bytes)
                .collect();
            debug!("drained {} distinguished points", records.len());
            if !sink.accept(&records) {
                self.stop.store(true, Ordering::SeqCst);
            }
        }
        self.stats
            .record(STEPS_PER_DRAIN as u64 * h.kang_cnt as u64, t0.elapsed());
        Ok(self.stop.load(Ordering::SeqCst))
    }

    /// Lifetime debug counters: slot drops, drain drops, loops flagged,
    /// reseeds.
    pub fn debug_counters(&mut self) -> Result<[u32; 4]> {
        let h = self
            .run
            .as_ref()
            .map(|r| r.handles)
            .ok_or_else(|| anyhow!("no prepared run"))?;
        let mut raw = [0u8; 16];
        self.device.download(h.dbg, 0, &mut raw)?;
        let mut out = [0u32; 4];
        for (i, v) in out.iter_mut().enumerate() {
            *v = u32::from_le_bytes([raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]]);
        }
        Ok(out)
    }

    fn release_buffers(&mut self) {
        if let Some(run) = self.run.take() {
            for b in run.owned {
                self.device.free(b);
            }
        }
    }

    /// Free every allocation exactly once. Safe after a failed prepare
    /// and on repeated calls.
    pub fn release(&mut self) {
        self.release_buffers();
        if self.state != EngineState::Released {
            debug!("GPU {}: released", self.device.info().index);
        }
        self.state = EngineState::Released;
    }
}

impl Drop for KangarooEngine {
    fn drop(&mut self) {
        self.release();
    }
}

fn alloc_buf(
    dev: &mut dyn ComputeDevice,
    owned: &mut Vec<BufferId>,
    total: &mut usize,
    len: usize,
    what: &str,
) -> Result<BufferId> {
    let b = dev
        .alloc(len)
        .with_context(|| format!("allocating {} ({} bytes)", what, len))?;
    owned.push(b);
    *total += len;
    Ok(b)
}

/// Interval midpoint 2^(range-1) as a walk distance.
fn midpoint(range: u32) -> Distance {
    let mut d = Distance::ZERO;
    let bit = range - 1;
    d.0[(bit / 64) as usize] = 1u64 << (bit % 64);
    d
}

/// Seed the three herds: tame lanes offset from the interval midpoint,
/// wild lanes at the target and mirrored target, each with an
/// independent random start offset so no two lanes walk in lockstep.
fn seed_lanes(
    curve: &Secp256k1,
    target: &Point,
    range: u32,
    lanes: usize,
    rng: &mut StdRng,
) -> Vec<u8> {
    let offset_bits = range.saturating_sub(2);
    let seeds: Vec<(KangarooKind, Distance)> = (0..lanes)
        .map(|i| {
            let kind = if i < lanes / 3 {
                KangarooKind::Tame
            } else if i < 2 * lanes / 3 {
                KangarooKind::Wild1
            } else {
                KangarooKind::Wild2
            };
            (kind, Distance::random_bits(rng, offset_bits))
        })
        .collect();

    let mid = midpoint(range);
    let neg_target = curve.negate(target);
    let mut lane_bytes = vec![0u8; lanes * LANE_BYTES];
    lane_bytes
        .par_chunks_mut(LANE_BYTES)
        .zip(seeds.par_iter())
        .for_each(|(buf, (kind, d0))| {
            let (dist, pos) = match kind {
                KangarooKind::Tame => {
                    let d = mid.add(d0);
                    (d, curve.mul_g(&d.magnitude_u256()))
                }
                KangarooKind::Wild1 => {
                    (*d0, curve.add(target, &curve.mul_g(&d0.magnitude_u256())))
                }
                KangarooKind::Wild2 => {
                    (*d0, curve.add(&neg_target, &curve.mul_g(&d0.magnitude_u256())))
                }
            };
            LaneRecord {
                pos,
                dist,
                kind: *kind,
                looped: false,
                step: 0,
            }
            .encode(buf);
        });
    lane_bytes
}

/// Random (point, distance) pairs the reseed kernel adds to looped
/// lanes. Jump-sized offsets keep a reseeded lane inside its herd's
/// coverage.
fn reseed_offsets(curve: &Secp256k1, range: u32, lanes: usize, rng: &mut StdRng) -> Vec<u8> {
    let bits = range / 2 + 1;
    let dists: Vec<Distance> = (0..lanes)
        .map(|_| {
            let mut d = Distance::random_bits(rng, bits);
            d.0[0] |= 1;
            d
        })
        .collect();
    let mut out = vec![0u8; lanes * JUMP_BYTES];
    out.par_chunks_mut(JUMP_BYTES)
        .zip(dists.par_iter())
        .for_each(|(buf, dist)| {
            let entry = JumpEntry {
                point: curve.mul_g(&dist.magnitude_u256()),
                dist: *dist,
            };
            encode_jump(&entry, buf);
        });
    out
}
