//! Device abstraction and the reference compute device
//!
//! The engine talks to hardware through `ComputeDevice`: opaque buffers,
//! name-addressable kernels, explicit synchronization. The reference
//! device in `sim` executes the same kernels on host memory with
//! lane-exact semantics.

pub mod device;
pub mod shared;
pub mod sim;

pub use device::{BufferId, ComputeDevice, DeviceGeneration, DeviceInfo, KernelId, Occupancy};
pub use sim::ReferenceDevice;
