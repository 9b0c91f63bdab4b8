//! C2 — the adaptive latency tracker.
//!
//! Modeled as a `Collecting`/`Frozen` state machine rather than a sort-in-place
//! slice: once 25 samples are in, the structure freezes and can no longer be
//! mutated, which is easier to reason about than "is this slice sorted yet".

use std::time::Duration;

/// Number of initial successful scan latencies collected before the tracker
/// freezes. Also the minimum-scans-before-freezing constant (spec.md's
/// `minScans` and the inline buffer-capacity constant are the same number).
pub const LATENCY_SAMPLE_TARGET: usize = 25;

const MAX_TIMEOUT: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone)]
pub enum LatencyTracker {
    Collecting(Vec<Duration>),
    Frozen(Duration),
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::Collecting(Vec::with_capacity(LATENCY_SAMPLE_TARGET))
    }

    /// Records a latency sample from a successful scan. No-op once frozen.
    pub fn record(&mut self, latency: Duration) {
        let Self::Collecting(samples) = self else {
            return;
        };
        if samples.len() >= LATENCY_SAMPLE_TARGET {
            return;
        }
        samples.push(latency);
        if samples.len() == LATENCY_SAMPLE_TARGET {
            samples.sort_unstable();
            let median = samples[LATENCY_SAMPLE_TARGET / 2];
            *self = Self::Frozen(median);
        }
    }

    /// True while still accepting samples (used by the scan executor to
    /// decide whether to feed a new latency in).
    pub fn is_collecting(&self) -> bool {
        matches!(self, Self::Collecting(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Collecting(samples) => samples.len(),
            Self::Frozen(_) => LATENCY_SAMPLE_TARGET,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The adaptive per-scan timeout: 2 minutes while collecting, otherwise
    /// `5 * median`, capped at 2 minutes.
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Collecting(_) => MAX_TIMEOUT,
            Self::Frozen(median) => median.saturating_mul(5).min(MAX_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_timeout_is_two_minutes() {
        let mut tracker = LatencyTracker::new();
        assert_eq!(tracker.timeout(), MAX_TIMEOUT);
        tracker.record(Duration::from_millis(50));
        assert_eq!(tracker.timeout(), MAX_TIMEOUT);
        assert!(tracker.is_collecting());
    }

    #[test]
    fn freezes_at_twenty_five_samples() {
        let mut tracker = LatencyTracker::new();
        for ms in (10..=250).step_by(10) {
            tracker.record(Duration::from_millis(ms));
        }
        assert_eq!(tracker.len(), LATENCY_SAMPLE_TARGET);
        assert!(!tracker.is_collecting());
        // median of 10,20,...,250 is 130ms
        assert_eq!(tracker.timeout(), Duration::from_millis(650));
    }

    #[test]
    fn timeout_caps_at_two_minutes() {
        let mut tracker = LatencyTracker::new();
        for _ in 0..LATENCY_SAMPLE_TARGET {
            tracker.record(Duration::from_secs(60));
        }
        assert_eq!(tracker.timeout(), MAX_TIMEOUT);
    }

    #[test]
    fn frozen_buffer_never_mutates_again() {
        let mut tracker = LatencyTracker::new();
        for ms in (10..=250).step_by(10) {
            tracker.record(Duration::from_millis(ms));
        }
        let before = tracker.timeout();
        tracker.record(Duration::from_millis(999_999));
        assert_eq!(tracker.timeout(), before);
        assert_eq!(tracker.len(), LATENCY_SAMPLE_TARGET);
    }
}
