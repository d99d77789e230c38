//! Jump table construction and validation
//!
//! A table is JMP_CNT (point, distance) pairs with distances averaging
//! near sqrt of the interval width, so walks cover the range in about
//! sqrt(range) steps. Tables are built once per run and stay immutable.

use anyhow::{bail, Result};
use rand::Rng;

use crate::gpu::shared::{encode_jump, JMP_CNT, JUMP_BYTES};
use crate::math::curve::Secp256k1;
use crate::types::{Distance, JumpEntry};

#[derive(Debug, Clone)]
pub struct JumpTable {
    pub entries: Vec<JumpEntry>,
}

impl JumpTable {
    /// Build a table for an interval of `range` bits: odd distances of
    /// about range/2 + 1 bits, each paired with its generator multiple.
    pub fn generate(curve: &Secp256k1, range: u32, rng: &mut impl Rng) -> Self {
        let dist_bits = range / 2 + 1;
        let entries = (0..JMP_CNT)
            .map(|_| {
                let dist = odd_distance(rng, dist_bits);
                JumpEntry {
                    point: curve.mul_g(&dist.magnitude_u256()),
                    dist,
                }
            })
            .collect();
        JumpTable { entries }
    }

    /// Structural checks done before a run; a malformed table past this
    /// point is a contract violation the walk does not defend against.
    pub fn validate(&self, curve: &Secp256k1) -> Result<()> {
        if self.entries.len() != JMP_CNT {
            bail!("jump table has {} entries, expected {}", self.entries.len(), JMP_CNT);
        }
        for (i, e) in self.entries.iter().enumerate() {
            if e.dist.is_zero() {
                bail!("jump entry {} has zero distance", i);
            }
            if !curve.is_on_curve(&e.point) {
                bail!("jump entry {} is not on the curve", i);
            }
        }
        Ok(())
    }

    /// Serialize into the device upload layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.entries.len() * JUMP_BYTES];
        for (i, e) in self.entries.iter().enumerate() {
            encode_jump(e, &mut out[i * JUMP_BYTES..(i + 1) * JUMP_BYTES]);
        }
        out
    }
}

fn odd_distance(rng: &mut impl Rng, bits: u32) -> Distance {
    let mut d = Distance::random_bits(rng, bits);
    d.0[0] |= 1;
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_tables_validate() {
        let curve = Secp256k1::new();
        let mut rng = StdRng::seed_from_u64(77);
        let table = JumpTable::generate(&curve, 32, &mut rng);
        table.validate(&curve).unwrap();
        assert_eq!(table.encode().len(), JMP_CNT * JUMP_BYTES);
        // distances bounded by range/2 + 1 bits
        for e in &table.entries {
            assert!(!e.dist.is_negative());
            assert_eq!(e.dist.0[0] >> 17, 0);
            assert_eq!(e.dist.0[0] & 1, 1);
        }
    }

    #[test]
    fn validation_rejects_bad_entries() {
        let curve = Secp256k1::new();
        let mut rng = StdRng::seed_from_u64(78);
        let mut table = JumpTable::generate(&curve, 16, &mut rng);
        table.entries[3].dist = Distance::ZERO;
        assert!(table.validate(&curve).is_err());

        let mut table = JumpTable::generate(&curve, 16, &mut rng);
        table.entries[0].point.x = table.entries[0].point.x.add(&crate::math::FieldElement::ONE);
        assert!(table.validate(&curve).is_err());

        let mut table = JumpTable::generate(&curve, 16, &mut rng);
        table.entries.pop();
        assert!(table.validate(&curve).is_err());
    }
}
