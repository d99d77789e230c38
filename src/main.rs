//! rangecrack - interval key recovery on secp256k1
//!
//! Wires one engine to one device: builds the jump tables, prepares and
//! executes the run, feeds drained distinguished points into the host
//! table until it resolves the key.

use anyhow::{bail, Result};
use clap::Parser;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::thread;
use std::time::Duration;

use rangecrack::config::Settings;
use rangecrack::dp::table::SolutionReport;
use rangecrack::dp::DpTable;
use rangecrack::gpu::{DeviceGeneration, ReferenceDevice};
use rangecrack::kangaroo::{JumpTable, KangarooEngine};
use rangecrack::math::Secp256k1;
use rangecrack::utils::setup_logging;

fn main() -> Result<()> {
    setup_logging();
    let settings = Settings::parse();
    settings.validate()?;

    let curve = Secp256k1::new();
    let target = settings.target_point(&curve)?;
    info!(
        "target x = {}, range {} bits, dp {} bits",
        target.x, settings.range, settings.dp_bits
    );

    let mut rng = StdRng::from_entropy();
    let tables = [
        JumpTable::generate(&curve, settings.range, &mut rng),
        JumpTable::generate(&curve, settings.range, &mut rng),
        JumpTable::generate(&curve, settings.range, &mut rng),
    ];

    // hardware backends plug in here; the reference device runs the same
    // kernels on host memory
    let device = ReferenceDevice::new(settings.device, 1, DeviceGeneration::Current);
    let mut engine = KangarooEngine::new(Box::new(device));
    if !engine.prepare(
        &target,
        settings.range,
        settings.dp_bits,
        [&tables[0], &tables[1], &tables[2]],
    ) {
        bail!("device {} failed to prepare", settings.device);
    }

    if settings.max_seconds > 0 {
        let stop = engine.stop_handle();
        let limit = settings.max_seconds;
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(limit));
            warn!("time limit of {}s reached, stopping", limit);
            stop.stop();
        });
    }

    let mut table = DpTable::new(target);
    engine.execute(&mut table)?;
    info!(
        "run finished: {} unique DPs, {} duplicates, {} steps/sec",
        table.len(),
        table.duplicates(),
        engine.stats_speed()
    );

    match table.solution_hex() {
        Some(key) => {
            info!("private key: {}", key);
            if let Some(path) = &settings.solution_file {
                let report = SolutionReport {
                    private_key: key,
                    target_x: format!("{}", target.x),
                    range_bits: settings.range,
                    dp_bits: settings.dp_bits,
                    records_seen: table.records_seen(),
                };
                serde_json::to_writer_pretty(File::create(path)?, &report)?;
                info!("solution report written to {}", path.display());
            }
        }
        None => warn!("stopped without a solution"),
    }
    engine.release();
    Ok(())
}
