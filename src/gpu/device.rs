//! Compute device contract
//!
//! Device discovery and kernel compilation happen outside this crate; a
//! backend hands the engine an object with allocatable buffers and
//! compiled kernels addressable by name. One engine instance owns one
//! device, multiple devices are independent engine instances.

use anyhow::Result;

/// Static facts about one device, reported by the backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Index used in log lines, assigned by the caller.
    pub index: u32,
    pub name: String,
    /// Number of compute units (multiprocessors).
    pub compute_units: u32,
    pub generation: DeviceGeneration,
    /// Total device memory in bytes, informational.
    pub total_mem: u64,
}

/// Occupancy regime a device falls into. Legacy parts want wide blocks
/// and large lane groups; current parts run narrower blocks against the
/// cache hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceGeneration {
    Legacy,
    Current,
}

/// Launch geometry and lane population derived from the device info.
#[derive(Debug, Clone, Copy)]
pub struct Occupancy {
    pub block_cnt: u32,
    pub block_size: u32,
    pub group_cnt: u32,
}

impl Occupancy {
    pub fn for_device(info: &DeviceInfo) -> Self {
        let (block_size, group_cnt) = match info.generation {
            DeviceGeneration::Legacy => (512, 64),
            DeviceGeneration::Current => (256, 24),
        };
        Occupancy {
            block_cnt: info.compute_units.max(1),
            block_size,
            group_cnt,
        }
    }

    /// Lanes the device runs in parallel: blocks x threads x lanes/thread.
    pub fn kang_cnt(&self) -> u32 {
        self.block_cnt * self.block_size * self.group_cnt
    }
}

/// Opaque handle to a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

/// Opaque handle to a compiled kernel resolved by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelId(pub(crate) usize);

/// Step kernel variants, one resolved per run by occupancy regime.
pub const KERNEL_STEP_MAIN: &str = "step_main";
pub const KERNEL_STEP_OLDGPU: &str = "step_oldgpu";
/// Compacts per-lane collector slots into the drainable output array.
pub const KERNEL_COLLECT_DPS: &str = "collect_dps";
/// Re-offsets lanes flagged by the loop detector.
pub const KERNEL_RESEED_LOOPED: &str = "reseed_looped";

/// One device's compute surface. Kernel launches may be asynchronous;
/// `synchronize` is the only ordering guarantee a caller gets, and
/// uploads/downloads are synchronous from the caller's perspective.
pub trait ComputeDevice: Send {
    fn info(&self) -> &DeviceInfo;

    fn alloc(&mut self, len: usize) -> Result<BufferId>;

    /// Releasing an already-freed buffer is a no-op.
    fn free(&mut self, buf: BufferId);

    fn upload(&mut self, buf: BufferId, offset: usize, data: &[u8]) -> Result<()>;

    fn download(&mut self, buf: BufferId, offset: usize, out: &mut [u8]) -> Result<()>;

    /// Resolve a compiled kernel by name.
    fn kernel(&mut self, name: &str) -> Result<KernelId>;

    fn launch(
        &mut self,
        kernel: KernelId,
        blocks: u32,
        threads: u32,
        args: &[BufferId],
    ) -> Result<()>;

    fn synchronize(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(gen: DeviceGeneration, cu: u32) -> DeviceInfo {
        DeviceInfo {
            index: 0,
            name: "test".into(),
            compute_units: cu,
            generation: gen,
            total_mem: 1 << 30,
        }
    }

    #[test]
    fn occupancy_regimes() {
        let legacy = Occupancy::for_device(&info(DeviceGeneration::Legacy, 20));
        assert_eq!(legacy.kang_cnt(), 20 * 512 * 64);
        let current = Occupancy::for_device(&info(DeviceGeneration::Current, 46));
        assert_eq!(current.kang_cnt(), 46 * 256 * 24);
        // zero compute units still yields a runnable population
        let degenerate = Occupancy::for_device(&info(DeviceGeneration::Current, 0));
        assert!(degenerate.kang_cnt() > 0);
    }
}
