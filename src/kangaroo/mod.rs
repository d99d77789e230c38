//! Kangaroo walk orchestration
//!
//! Per-device engine lifecycle, jump table construction and the
//! throughput statistics window.

pub mod engine;
pub mod jumps;
pub mod stats;

pub use engine::{EngineState, KangarooEngine, StopHandle};
pub use jumps::JumpTable;
pub use stats::SpeedStats;
