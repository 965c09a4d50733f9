//! Superposed description of a set of signals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InterferencePattern {
    /// Resultant amplitude divided by candidate count
    pub intensity: f64,
    /// Phase coherence inside the reference band, 0..=1
    pub binding: f64,
    /// Frequency of the strongest contributor
    pub frequency: f64,
    /// Resultant phase in `[0, 2π)`
    pub phase: f64,
    pub locations: BTreeSet<String>,
    /// Position in the focus history; `None` until recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl InterferencePattern {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intensity == 0.0 && self.binding == 0.0 && self.locations.is_empty()
    }

    /// `|A ∩ B| / max(|A|, |B|, 1)` over region tags.
    pub fn location_overlap(&self, other: &InterferencePattern) -> f64 {
        let shared = self.locations.intersection(&other.locations).count();
        let larger = self.locations.len().max(other.locations.len()).max(1);
        shared as f64 / larger as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_locations(tags: &[&str]) -> InterferencePattern {
        InterferencePattern {
            locations: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn overlap_uses_larger_set() {
        let a = with_locations(&["gamma", "relay", "fast-lane"]);
        let b = with_locations(&["gamma"]);
        let overlap = a.location_overlap(&b);
        assert!((overlap - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn overlap_of_two_empty_sets_is_zero() {
        let a = InterferencePattern::empty();
        assert_eq!(a.location_overlap(&InterferencePattern::empty()), 0.0);
    }
}
