//! Sliding-window throughput statistics

use std::time::Duration;

pub const STATS_WND_SIZE: usize = 16;

/// Rolling average of steps-per-second samples, one sample per DP drain.
#[derive(Debug, Clone)]
pub struct SpeedStats {
    window: [u64; STATS_WND_SIZE],
    filled: usize,
    next: usize,
}

impl Default for SpeedStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedStats {
    pub fn new() -> Self {
        SpeedStats {
            window: [0; STATS_WND_SIZE],
            filled: 0,
            next: 0,
        }
    }

    /// Record `steps` lane-steps executed over `elapsed` wall time.
    pub fn record(&mut self, steps: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        self.window[self.next] = (steps as f64 / secs) as u64;
        self.next = (self.next + 1) % STATS_WND_SIZE;
        self.filled = (self.filled + 1).min(STATS_WND_SIZE);
    }

    /// Average steps/sec over the filled part of the window, 0 before the
    /// first sample.
    pub fn speed(&self) -> u64 {
        if self.filled == 0 {
            return 0;
        }
        self.window[..self.filled.min(STATS_WND_SIZE)]
            .iter()
            .sum::<u64>()
            / self.filled as u64
    }

    pub fn reset(&mut self) {
        *self = SpeedStats::new();
    }
}
