//! rangecrack - Pollard kangaroo ECDLP solver for secp256k1
//!
//! Recovers a discrete logarithm known to lie in a bounded interval by
//! running tame and wild herds of pseudo-random walks sized for one
//! compute device, collecting distinguished points until a cross-herd
//! collision yields the key.
//!
//! The engine owns all device state and talks to hardware through the
//! `ComputeDevice` trait; the bundled reference device runs the same
//! kernels on host memory.

#![deny(unsafe_code)]

pub mod config;
pub mod dp;
pub mod gpu;
pub mod kangaroo;
pub mod math;
pub mod types;
pub mod utils;

pub use config::Settings;
pub use dp::DpTable;
pub use gpu::ReferenceDevice;
pub use kangaroo::{JumpTable, KangarooEngine};
pub use math::{FieldElement, Secp256k1};
pub use types::{Distance, DpRecord, KangarooKind, Point};
