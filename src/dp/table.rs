//! Host DP table and collision resolution
//!
//! Drained records are deduplicated by (x, kind). A cross-kind match on the
//! same x-coordinate yields candidate keys from the distance pair; a
//! candidate is accepted only if it reproduces the target point.
//!
//! Records carry x only, so the sign of y is unknown, and the Wild2 herd
//! walks the mirrored target. Both ambiguities collapse into trying the
//! four combinations +-(dt - dw) and +-(dt + dw).

use crate::math::curve::{u256_sub, Secp256k1, N};
use crate::types::{Distance, DpRecord, KangarooKind, Point};
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;

use super::DpSink;

/// Written next to the log output when a run solves.
#[derive(Debug, Clone, Serialize)]
pub struct SolutionReport {
    pub private_key: String,
    pub target_x: String,
    pub range_bits: u32,
    pub dp_bits: u32,
    pub records_seen: u64,
}

/// Distinguished point store for one device run.
pub struct DpTable {
    curve: Secp256k1,
    target: Point,
    entries: HashMap<[u64; 4], Vec<(KangarooKind, Distance)>>,
    records_seen: u64,
    duplicates: u64,
    solution: Option<[u64; 4]>,
}

impl DpTable {
    pub fn new(target: Point) -> Self {
        DpTable {
            curve: Secp256k1::new(),
            target,
            entries: HashMap::new(),
            records_seen: 0,
            duplicates: 0,
            solution: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// The recovered discrete log, once a matching pair verified.
    pub fn solution(&self) -> Option<[u64; 4]> {
        self.solution
    }

    pub fn solution_hex(&self) -> Option<String> {
        self.solution.map(|k| {
            let mut s = String::with_capacity(64);
            for limb in k.iter().rev() {
                s.push_str(&format!("{:016x}", limb));
            }
            s
        })
    }

    /// Insert one drained record and try to resolve it against stored
    /// records of the other kinds.
    pub fn insert(&mut self, rec: &DpRecord) -> Option<[u64; 4]> {
        self.records_seen += 1;
        let mut found = None;
        if let Some(slot) = self.entries.get(&rec.x) {
            if slot.iter().any(|(k, _)| *k == rec.kind) {
                self.duplicates += 1;
                return self.solution;
            }
            for (other_kind, other_dist) in slot {
                let (dt, dw) = match (rec.kind, *other_kind) {
                    (KangarooKind::Tame, _) => (rec.dist, *other_dist),
                    (_, KangarooKind::Tame) => (*other_dist, rec.dist),
                    // wild-wild matches are not resolved here
                    _ => continue,
                };
                if let Some(key) = self.resolve(&dt, &dw) {
                    found = Some(key);
                    break;
                }
            }
        }
        if let Some(key) = found {
            info!(
                "collision resolved at x = {:016x}..., key recovered",
                rec.x[3]
            );
            self.solution = Some(key);
        }
        self.entries.entry(rec.x).or_default().push((rec.kind, rec.dist));
        self.solution
    }

    /// Try the four sign combinations of the distance pair against the
    /// target; only an exact k*G match survives.
    fn resolve(&self, dt: &Distance, dw: &Distance) -> Option<[u64; 4]> {
        let diff = dt.sub(dw);
        let sum = dt.add(dw);
        for cand in [diff, diff.neg(), sum, sum.neg()] {
            let k = dist_mod_n(&cand);
            if self.curve.mul_g(&k) == self.target {
                return Some(k);
            }
        }
        debug!("x-collision did not verify, ignoring");
        None
    }
}

impl DpSink for DpTable {
    fn accept(&mut self, records: &[DpRecord]) -> bool {
        for rec in records {
            self.insert(rec);
        }
        self.solution.is_none()
    }
}

/// Signed 192-bit distance reduced into a scalar modulo the group order.
fn dist_mod_n(d: &Distance) -> [u64; 4] {
    let wide = d.magnitude_u256();
    if d.is_negative() {
        u256_sub(&N, &wide)
    } else {
        wide
    }
}
