//! Bounded per-route weights and win-time history.
//!
//! Both tables are sharded `DashMap`s. Every read-modify-write goes through
//! `entry()`, which holds the shard lock for the key, so concurrent races that
//! share a key serialize while races on disjoint keys proceed independently.

use burstrace_core::{PriorityClass, RingBuffer, RouteKey, StreamId};
use dashmap::DashMap;
use serde::Serialize;

pub const MIN_WEIGHT: f64 = 0.1;
pub const MAX_WEIGHT: f64 = 10.0;
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Winning durations kept per key.
pub const WIN_HISTORY_CAPACITY: usize = 100;

/// Guard against division by a zero-length race.
pub const DURATION_EPSILON_MS: f64 = 1e-3;

const REINFORCE_RATE: f64 = 0.1;
const REINFORCE_REFERENCE_MS: f64 = 100.0;
const LOSER_DECAY: f64 = 0.95;

pub fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        return DEFAULT_WEIGHT;
    }
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// `1 + 0.1 * (100 / max(duration, ε))`. Faster wins reinforce harder.
pub fn reinforcement_factor(race_duration_ms: f64) -> f64 {
    let duration = if race_duration_ms.is_finite() {
        race_duration_ms.max(DURATION_EPSILON_MS)
    } else {
        f64::MAX
    };
    1.0 + REINFORCE_RATE * (REINFORCE_REFERENCE_MS / duration)
}

/// One row of the diagnostics snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeightEntry {
    pub stream_id: StreamId,
    pub class: PriorityClass,
    pub weight: f64,
    pub wins: usize,
    pub mean_win_ms: Option<f64>,
}

#[derive(Default)]
pub struct WeightStore {
    weights: DashMap<RouteKey, f64>,
    wins: DashMap<RouteKey, RingBuffer<f64>>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current weight, or the default for a key never observed.
    pub fn weight(&self, key: &RouteKey) -> f64 {
        self.weights.get(key).map(|w| *w).unwrap_or(DEFAULT_WEIGHT)
    }

    /// Apply the winner update and record the race duration. Returns the new weight.
    pub fn reinforce(&self, key: &RouteKey, race_duration_ms: f64) -> f64 {
        let factor = reinforcement_factor(race_duration_ms);
        let weight = {
            let mut entry = self.weights.entry(key.clone()).or_insert(DEFAULT_WEIGHT);
            *entry = clamp_weight(*entry * factor);
            *entry
        };
        self.wins
            .entry(key.clone())
            .or_insert_with(|| RingBuffer::new(WIN_HISTORY_CAPACITY))
            .push(race_duration_ms.max(0.0));
        weight
    }

    /// Apply the gentle loser decay. Returns the new weight.
    pub fn decay(&self, key: &RouteKey) -> f64 {
        let mut entry = self.weights.entry(key.clone()).or_insert(DEFAULT_WEIGHT);
        *entry = clamp_weight(*entry * LOSER_DECAY);
        *entry
    }

    /// Mean of the last recorded winning durations for this key.
    pub fn mean_win_ms(&self, key: &RouteKey) -> Option<f64> {
        self.wins.get(key).and_then(|ring| ring.mean())
    }

    pub fn win_count(&self, key: &RouteKey) -> usize {
        self.wins.get(key).map(|ring| ring.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// All known keys with their weight and win statistics, sorted by key.
    pub fn snapshot(&self) -> Vec<WeightEntry> {
        let mut entries: Vec<WeightEntry> = self
            .weights
            .iter()
            .map(|e| {
                let key = e.key();
                WeightEntry {
                    stream_id: key.stream_id.clone(),
                    class: key.class,
                    weight: *e.value(),
                    wins: self.win_count(key),
                    mean_win_ms: self.mean_win_ms(key),
                }
            })
            .collect();
        entries.sort_by(|a, b| (&a.stream_id, a.class).cmp(&(&b.stream_id, b.class)));
        entries
    }

    pub fn reset(&self) {
        self.weights.clear();
        self.wins.clear();
    }
}
