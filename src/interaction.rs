//! C3 — the decayed interaction accumulator.
//!
//! `historic_*` never decays; `recent_*` decays toward zero with an
//! exponential half-life. See SPEC_FULL.md §4.3 / DESIGN.md for why this
//! reading of the decay law was adopted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{HostPublicKey, InteractionCounters};

/// Half-life of the `recent_*` counters.
pub const RECENT_HALF_LIFE_SECS: f64 = 10.0 * 24.0 * 60.0 * 60.0; // 10 days

fn decay_factor(elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(elapsed_secs / RECENT_HALF_LIFE_SECS)
}

/// Advances `counters` to `now`, decaying the recent pair. Pure function so
/// it is trivially unit-testable without the surrounding accumulator.
pub fn decay(counters: &mut InteractionCounters, now: DateTime<Utc>) {
    let elapsed = (now - counters.last_updated).num_milliseconds().max(0) as f64 / 1000.0;
    let factor = decay_factor(elapsed);
    counters.recent_successes *= factor;
    counters.recent_failures *= factor;
    counters.last_updated = now;
}

/// Per-host decayed success/failure counters, keyed by public key.
///
/// Calls are cheap, synchronous, and safe to make while holding the
/// dispatcher's shared-state lock — they never touch I/O.
#[derive(Debug, Default)]
pub struct InteractionAccumulator {
    counters: HashMap<HostPublicKey, InteractionCounters>,
}

impl InteractionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the decay clock for `key` without recording an interaction.
    /// Used by the scan executor before it knows the outcome of the attempt.
    pub fn decay_only(&mut self, key: HostPublicKey, now: DateTime<Utc>) {
        let entry = self.counters.entry(key).or_insert_with(|| InteractionCounters::new(now));
        decay(entry, now);
    }

    pub fn increment_success(&mut self, key: HostPublicKey, now: DateTime<Utc>) {
        let entry = self.counters.entry(key).or_insert_with(|| InteractionCounters::new(now));
        decay(entry, now);
        entry.historic_successes += 1.0;
        entry.recent_successes += 1.0;
    }

    pub fn increment_failure(&mut self, key: HostPublicKey, now: DateTime<Utc>) {
        let entry = self.counters.entry(key).or_insert_with(|| InteractionCounters::new(now));
        decay(entry, now);
        entry.historic_failures += 1.0;
        entry.recent_failures += 1.0;
    }

    pub fn get(&self, key: &HostPublicKey) -> Option<&InteractionCounters> {
        self.counters.get(key)
    }
}
