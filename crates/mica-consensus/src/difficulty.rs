//! Difficulty retargeting.
//!
//! The next block's difficulty is a pure function of a trailing window of
//! ancestor timestamps and difficulties, converging on the target block
//! time. The chain engine collects the window by walking parent links and
//! validates incoming blocks against this calculator's output.

use crate::params::{DIFFICULTY_WINDOW, MIN_DIFFICULTY, TARGET_BLOCK_TIME_MS};
use tracing::trace;

/// One window entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultySample {
    /// Block timestamp in milliseconds.
    pub timestamp: u64,
    pub difficulty: u128,
}

/// Windowed work-over-time retargeting calculator.
#[derive(Debug, Clone)]
pub struct DifficultyAdjustment {
    target_ms: u64,
    window: usize,
}

impl Default for DifficultyAdjustment {
    fn default() -> Self {
        Self::new()
    }
}

impl DifficultyAdjustment {
    pub fn new() -> Self {
        Self {
            target_ms: TARGET_BLOCK_TIME_MS,
            window: DIFFICULTY_WINDOW,
        }
    }

    /// Custom parameters (for testing).
    pub fn with_params(target_ms: u64, window: usize) -> Self {
        Self { target_ms, window }
    }

    /// Number of trailing samples the caller should collect.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Required difficulty for the child of the last sample.
    ///
    /// `samples` are oldest-first and end at the parent block; at most
    /// [`Self::window`] entries are considered. With fewer than two samples
    /// there is no spacing to measure and the parent difficulty carries over.
    pub fn next(&self, samples: &[DifficultySample]) -> u128 {
        let samples = if samples.len() > self.window {
            &samples[samples.len() - self.window..]
        } else {
            samples
        };

        let Some(parent) = samples.last() else {
            return MIN_DIFFICULTY;
        };
        if samples.len() < 2 {
            return parent.difficulty.max(MIN_DIFFICULTY);
        }

        let first = &samples[0];
        let elapsed = parent.timestamp.saturating_sub(first.timestamp).max(1);
        // The first sample only anchors the window start; the remaining n-1
        // blocks were produced within `elapsed`.
        let work: u128 = samples[1..]
            .iter()
            .fold(0u128, |acc, s| acc.saturating_add(s.difficulty));

        let next = work
            .saturating_mul(self.target_ms as u128)
            .checked_div(elapsed as u128)
            .unwrap_or(MIN_DIFFICULTY);

        trace!(
            samples = samples.len(),
            elapsed,
            next,
            "difficulty retarget"
        );

        next.max(MIN_DIFFICULTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady_samples(n: usize, spacing_ms: u64, difficulty: u128) -> Vec<DifficultySample> {
        (0..n)
            .map(|i| DifficultySample {
                timestamp: i as u64 * spacing_ms,
                difficulty,
            })
            .collect()
    }

    #[test]
    fn single_sample_keeps_parent_difficulty() {
        let calc = DifficultyAdjustment::with_params(60_000, 30);
        let samples = [DifficultySample {
            timestamp: 0,
            difficulty: 7,
        }];
        assert_eq!(calc.next(&samples), 7);
    }

    #[test]
    fn on_target_spacing_holds_difficulty() {
        let calc = DifficultyAdjustment::with_params(60_000, 30);
        let samples = steady_samples(10, 60_000, 1_000);
        assert_eq!(calc.next(&samples), 1_000);
    }

    #[test]
    fn fast_blocks_raise_difficulty() {
        let calc = DifficultyAdjustment::with_params(60_000, 30);
        let samples = steady_samples(10, 30_000, 1_000);
        assert_eq!(calc.next(&samples), 2_000);
    }

    #[test]
    fn slow_blocks_lower_difficulty() {
        let calc = DifficultyAdjustment::with_params(60_000, 30);
        let samples = steady_samples(10, 120_000, 1_000);
        assert_eq!(calc.next(&samples), 500);
    }

    #[test]
    fn never_drops_below_floor() {
        let calc = DifficultyAdjustment::with_params(60_000, 30);
        let samples = steady_samples(5, 60_000_000, 1);
        assert_eq!(calc.next(&samples), MIN_DIFFICULTY);
    }

    #[test]
    fn only_trailing_window_counts() {
        let calc = DifficultyAdjustment::with_params(60_000, 4);
        // Old slow history followed by on-target recent spacing; only the
        // last 4 samples should matter.
        let mut samples = steady_samples(8, 600_000, 100);
        let base = samples.last().unwrap().timestamp;
        for (i, s) in samples.iter_mut().enumerate().skip(4) {
            s.timestamp = base + (i as u64 - 3) * 60_000;
        }
        let expected = calc.next(&samples[samples.len() - 4..]);
        assert_eq!(calc.next(&samples), expected);
    }

    #[test]
    fn deterministic_across_calls() {
        let calc = DifficultyAdjustment::new();
        let samples = steady_samples(30, 61_000, 12_345);
        assert_eq!(calc.next(&samples), calc.next(&samples));
    }
}
