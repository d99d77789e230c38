//! Field and curve arithmetic
//!
//! The modular arithmetic and affine group law behind every walk step.

pub mod curve;
pub mod field;
#[cfg(test)]
mod tests;

pub use curve::Secp256k1;
pub use field::FieldElement;
