//! Run settings
//!
//! clap front-end for a single-device run plus validation; the engine
//! re-checks its own contract at prepare time.

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::math::curve::Secp256k1;
use crate::math::field::FieldElement;
use crate::types::Point;

/// Interval ECDLP solver for secp256k1: tame/wild kangaroo herds with
/// distinguished point collection.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Settings {
    /// Target public key: uncompressed hex (04 || X || Y)
    #[arg(short = 'p', long)]
    pub pubkey: String,

    /// Interval width in bits containing the private key
    #[arg(short = 'r', long, default_value_t = 32)]
    pub range: u32,

    /// Trailing zero bits a point needs to be distinguished
    #[arg(short = 'd', long, default_value_t = 16)]
    pub dp_bits: u32,

    /// Device index, for logs and multi-device orchestration
    #[arg(long, default_value_t = 0)]
    pub device: u32,

    /// Stop after this many seconds (0 = run until solved)
    #[arg(long, default_value_t = 0)]
    pub max_seconds: u64,

    /// Write a JSON report here on success
    #[arg(long)]
    pub solution_file: Option<PathBuf>,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !(8..=170).contains(&self.range) {
            bail!("--range must be in 8..=170, got {}", self.range);
        }
        if self.dp_bits > 60 {
            bail!("--dp-bits must be in 0..=60, got {}", self.dp_bits);
        }
        // a dp mask wider than the interval would almost never fire
        if self.dp_bits >= self.range {
            bail!(
                "--dp-bits {} is not sensible for a {}-bit range",
                self.dp_bits,
                self.range
            );
        }
        Ok(())
    }

    /// Decode and check the target public key.
    pub fn target_point(&self, curve: &Secp256k1) -> Result<Point> {
        let s = self.pubkey.trim().trim_start_matches("0x");
        let bytes = hex::decode(s).map_err(|e| anyhow!("bad pubkey hex: {}", e))?;
        if bytes.len() != 65 || bytes[0] != 0x04 {
            bail!("expected 65-byte uncompressed pubkey starting with 04");
        }
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&bytes[1..33]);
        y.copy_from_slice(&bytes[33..65]);
        let point = Point {
            x: FieldElement::from_bytes_be(&x)?,
            y: FieldElement::from_bytes_be(&y)?,
        };
        if !curve.is_on_curve(&point) {
            bail!("pubkey is not a point on secp256k1");
        }
        Ok(point)
    }
}
