// Copyright (C) 2025 Forgepool Developers (see AUTHORS)
//
// This file is part of Forgepool
//
// Forgepool is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Forgepool is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// Forgepool. If not, see <https://www.gnu.org/licenses/>.

//! Per-worker variable difficulty.
//!
//! Each worker is retargeted so it produces roughly one share per
//! `target_share_time`, whatever its raw hashrate. The controller looks at
//! the worker's recent-share window: shares arriving too fast raise the
//! difficulty by half, too slow lowers it by a quarter, always clamped to
//! the pool bounds.

use crate::store::worker::Worker;
use std::time::SystemTime;
use tracing::debug;

/// Difficulty never drops below this, regardless of configured bounds.
pub const DIFFICULTY_FLOOR: u64 = 1_000;

/// Shares required in the window before a retarget is considered.
const MIN_WINDOW_LEN: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct VardiffConfig {
    /// Desired seconds between shares from one worker.
    pub target_share_time: u64,
    /// Minimum seconds between retargets for one worker.
    pub retarget_interval: u64,
    /// Fractional no-adjust band around the target ratio.
    pub variance: f64,
    pub min_difficulty: u64,
    pub max_difficulty: u64,
}

#[derive(Debug, Clone)]
pub struct Vardiff {
    config: VardiffConfig,
}

impl Vardiff {
    pub fn new(config: VardiffConfig) -> Self {
        Self { config }
    }

    /// A worker is due for retargeting once the retarget interval has passed
    /// since its last share and the window carries enough samples.
    pub fn should_adjust(&self, worker: &Worker, now: SystemTime) -> bool {
        let Some(last_share) = worker.last_share_time else {
            return false;
        };
        let elapsed = now
            .duration_since(last_share)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        elapsed >= self.config.retarget_interval
            && worker.recent_share_times.len() >= MIN_WINDOW_LEN
    }

    /// Compute the worker's next difficulty from its share cadence.
    pub fn new_difficulty(&self, worker: &Worker) -> u64 {
        let window = &worker.recent_share_times;
        if window.len() < MIN_WINDOW_LEN {
            return worker.current_difficulty;
        }

        let span = window
            .last()
            .unwrap()
            .duration_since(*window.first().unwrap())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let avg_share_time = span / (window.len() - 1) as f64;
        let ratio = avg_share_time / self.config.target_share_time as f64;

        let current = worker.current_difficulty;
        let raw = if ratio < 1.0 - self.config.variance {
            // Shares arriving too fast
            current.saturating_mul(3) / 2
        } else if ratio > 1.0 + self.config.variance {
            current.saturating_mul(3) / 4
        } else {
            current
        };

        let clamped = raw
            .max(DIFFICULTY_FLOOR)
            .clamp(self.config.min_difficulty, self.config.max_difficulty);

        if clamped != current {
            debug!(
                "vardiff: worker {} ratio {:.3} difficulty {} -> {}",
                worker.worker_id, ratio, current, clamped
            );
        }
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{MinerId, WorkerId};
    use std::time::Duration;

    fn test_config() -> VardiffConfig {
        VardiffConfig {
            target_share_time: 10,
            retarget_interval: 30,
            variance: 0.3,
            min_difficulty: 1_000,
            max_difficulty: 1_000_000,
        }
    }

    fn worker_with_share_spacing(difficulty: u64, count: usize, spacing_s: u64) -> Worker {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut worker = Worker::new(
            WorkerId(1),
            MinerId(1),
            "rig0".to_string(),
            difficulty,
            "127.0.0.1".parse().unwrap(),
            None,
            start,
        );
        for i in 0..count {
            worker.record_share_time(start + Duration::from_secs(i as u64 * spacing_s));
        }
        worker
    }

    #[test]
    fn test_should_adjust_requires_interval_and_window() {
        let vardiff = Vardiff::new(test_config());
        let worker = worker_with_share_spacing(10_000, 5, 5);
        let last = *worker.recent_share_times.last().unwrap();

        // Interval not yet elapsed
        assert!(!vardiff.should_adjust(&worker, last + Duration::from_secs(10)));
        // Interval elapsed
        assert!(vardiff.should_adjust(&worker, last + Duration::from_secs(30)));

        // Window too small
        let small = worker_with_share_spacing(10_000, 2, 5);
        let last = *small.recent_share_times.last().unwrap();
        assert!(!vardiff.should_adjust(&small, last + Duration::from_secs(60)));
    }

    #[test]
    fn test_upshift_when_shares_too_fast() {
        // Shares every 5s against a 10s target: ratio 0.5 < 0.7
        let vardiff = Vardiff::new(test_config());
        let worker = worker_with_share_spacing(10_000, 5, 5);
        assert_eq!(vardiff.new_difficulty(&worker), 15_000);
    }

    #[test]
    fn test_downshift_when_shares_too_slow() {
        // Shares every 20s against a 10s target: ratio 2.0 > 1.3
        let vardiff = Vardiff::new(test_config());
        let worker = worker_with_share_spacing(10_000, 5, 20);
        assert_eq!(vardiff.new_difficulty(&worker), 7_500);
    }

    #[test]
    fn test_no_change_inside_variance_band() {
        // Shares every 10s: ratio exactly 1.0
        let vardiff = Vardiff::new(test_config());
        let worker = worker_with_share_spacing(10_000, 5, 10);
        assert_eq!(vardiff.new_difficulty(&worker), 10_000);
    }

    #[test]
    fn test_upshift_clamps_at_max_difficulty() {
        // Raw 40_000 * 3 / 2 = 60_000, clamped to the 50_000 cap
        let mut config = test_config();
        config.max_difficulty = 50_000;
        let vardiff = Vardiff::new(config);
        let worker = worker_with_share_spacing(40_000, 5, 1);
        assert_eq!(vardiff.new_difficulty(&worker), 50_000);
    }

    #[test]
    fn test_downshift_clamps_at_min_difficulty() {
        let mut config = test_config();
        config.min_difficulty = 9_000;
        let vardiff = Vardiff::new(config);
        let worker = worker_with_share_spacing(10_000, 5, 1_000);
        assert_eq!(vardiff.new_difficulty(&worker), 9_000);
    }

    #[test]
    fn test_floor_applies_below_configured_min() {
        let mut config = test_config();
        config.min_difficulty = 1;
        let vardiff = Vardiff::new(config);
        let worker = worker_with_share_spacing(1_200, 5, 1_000);
        // 1_200 * 3 / 4 = 900, lifted to the hard floor
        assert_eq!(vardiff.new_difficulty(&worker), 1_000);
    }

    #[test]
    fn test_clamp_boundaries_produce_no_spurious_change() {
        // At max difficulty with fast shares: stays at max
        let mut config = test_config();
        config.max_difficulty = 50_000;
        let vardiff = Vardiff::new(config);
        let at_max = worker_with_share_spacing(50_000, 5, 1);
        assert_eq!(vardiff.new_difficulty(&at_max), 50_000);

        // At min difficulty with slow shares: stays at min
        let mut config = test_config();
        config.min_difficulty = 2_000;
        let vardiff = Vardiff::new(config);
        let at_min = worker_with_share_spacing(2_000, 5, 1_000);
        assert_eq!(vardiff.new_difficulty(&at_min), 2_000);
    }
}
