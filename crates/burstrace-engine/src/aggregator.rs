//! Interference and attention aggregator
//!
//! Winning signals are superposed as complex phasors `a·e^{iφ}` into an
//! interference pattern. Patterns accumulate in a bounded focus history, which
//! drives the focus-shift decision and the gain applied to future candidates.

use burstrace_core::{
    wrap_phase, FocusConfig, InterferencePattern, PriorityClass, Result, RingBuffer, Signal,
    MAX_PRIORITY_SCORE,
};
use serde::Serialize;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

const EPSILON: f64 = 1e-9;

/// New intensity over previous intensity above this is a stronger focus.
pub const INTENSITY_SHIFT_RATIO: f64 = 2.0;
/// Binding jumping from below `WEAK_BINDING` to above this is a breakthrough.
pub const BREAKTHROUGH_BINDING: f64 = 0.9;
pub const WEAK_BINDING: f64 = 0.5;
/// Region overlap below this means attention moved elsewhere.
pub const MIN_LOCATION_OVERLAP: f64 = 0.3;
/// Adjacent patterns whose dominant frequencies differ by more count as a shift.
pub const FREQUENCY_SHIFT_HZ: f64 = 5.0;
/// Gain above this lifts a signal to the focused class.
pub const FOCUSED_GAIN: f64 = 1.5;

/// Rolling summary of the focus history.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FocusStats {
    pub patterns: usize,
    pub mean_intensity: f64,
    pub mean_binding: f64,
    pub frequency_shifts: u64,
}

struct FocusHistory {
    patterns: RingBuffer<InterferencePattern>,
    next_sequence: u64,
    frequency_shifts: u64,
}

impl FocusHistory {
    fn new(capacity: usize) -> Self {
        Self {
            patterns: RingBuffer::new(capacity),
            next_sequence: 0,
            frequency_shifts: 0,
        }
    }
}

pub struct Aggregator {
    config: FocusConfig,
    history: RwLock<FocusHistory>,
}

impl Aggregator {
    pub fn new(config: FocusConfig) -> Result<Self> {
        config.validate()?;
        let history = FocusHistory::new(config.history_capacity);
        Ok(Self {
            config,
            history: RwLock::new(history),
        })
    }

    pub fn config(&self) -> &FocusConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, FocusHistory> {
        self.history.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, FocusHistory> {
        self.history.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Superpose `signals` and append the result to the focus history.
    /// Empty input yields an empty pattern and leaves the history untouched.
    pub fn compute_pattern(&self, signals: &[Signal]) -> InterferencePattern {
        let mut pattern = superpose(signals, &self.config);
        if signals.is_empty() {
            return pattern;
        }
        record(&mut self.write(), &mut pattern, signals.len());
        pattern
    }

    /// Whether attention should move to `candidate`.
    ///
    /// A recorded candidate is judged against the newest pattern stored before
    /// it; an unrecorded one against the newest stored pattern. With nothing to
    /// compare against, always shifts.
    pub fn should_shift(&self, candidate: &InterferencePattern) -> bool {
        let history = self.read();
        judge(&history.patterns, candidate)
    }

    /// `compute_pattern` followed by `should_shift` under one lock, so
    /// concurrent producers cannot slip a pattern in between.
    /// Empty input records nothing and never shifts.
    pub fn record_and_judge(&self, signals: &[Signal]) -> (InterferencePattern, bool) {
        let mut pattern = superpose(signals, &self.config);
        if signals.is_empty() {
            return (pattern, false);
        }
        let mut history = self.write();
        record(&mut history, &mut pattern, signals.len());
        let shifted = judge(&history.patterns, &pattern);
        (pattern, shifted)
    }

    /// Re-score `signals` against the current focus.
    pub fn apply_gain(&self, signals: &[Signal], focus: &InterferencePattern) -> Vec<Signal> {
        apply_gain(signals, focus)
    }

    pub fn latest(&self) -> Option<InterferencePattern> {
        self.read().patterns.latest().cloned()
    }

    /// Stored patterns, oldest first.
    pub fn history(&self) -> Vec<InterferencePattern> {
        self.read().patterns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().patterns.is_empty()
    }

    pub fn stats(&self) -> FocusStats {
        let history = self.read();
        let n = history.patterns.len();
        if n == 0 {
            return FocusStats {
                frequency_shifts: history.frequency_shifts,
                ..FocusStats::default()
            };
        }
        let intensity: f64 = history.patterns.iter().map(|p| p.intensity).sum();
        let binding: f64 = history.patterns.iter().map(|p| p.binding).sum();
        FocusStats {
            patterns: n,
            mean_intensity: intensity / n as f64,
            mean_binding: binding / n as f64,
            frequency_shifts: history.frequency_shifts,
        }
    }

    pub fn reset(&self) {
        *self.write() = FocusHistory::new(self.config.history_capacity);
    }
}

fn record(history: &mut FocusHistory, pattern: &mut InterferencePattern, inputs: usize) {
    let moved = history
        .patterns
        .latest()
        .map_or(false, |previous| {
            (pattern.frequency - previous.frequency).abs() > FREQUENCY_SHIFT_HZ
        });
    if moved {
        history.frequency_shifts += 1;
    }
    let sequence = history.next_sequence;
    pattern.sequence = Some(sequence);
    history.next_sequence += 1;
    history.patterns.push(pattern.clone());

    debug!(
        "pattern #{}: intensity {:.3} binding {:.3} at {:.1} Hz over {} signals",
        sequence, pattern.intensity, pattern.binding, pattern.frequency, inputs
    );
}

/// Newest stored pattern older than `candidate`.
fn predecessor<'a>(
    patterns: &'a RingBuffer<InterferencePattern>,
    candidate: &InterferencePattern,
) -> Option<&'a InterferencePattern> {
    match candidate.sequence {
        Some(seq) => patterns
            .iter()
            .rev()
            .find(|p| p.sequence.map_or(false, |s| s < seq)),
        None => patterns.latest(),
    }
}

fn judge(patterns: &RingBuffer<InterferencePattern>, candidate: &InterferencePattern) -> bool {
    match predecessor(patterns, candidate) {
        None => true,
        Some(previous) => shift_between(previous, candidate),
    }
}

/// Coherent superposition of `signals` without touching any history.
pub fn superpose(signals: &[Signal], config: &FocusConfig) -> InterferencePattern {
    if signals.is_empty() {
        return InterferencePattern::empty();
    }

    let (re, im) = signals.iter().fold((0.0f64, 0.0f64), |(re, im), s| {
        (re + s.amplitude * s.phase.cos(), im + s.amplitude * s.phase.sin())
    });
    let intensity = re.hypot(im) / signals.len() as f64;

    let mut dominant = &signals[0];
    for signal in &signals[1..] {
        if signal.amplitude > dominant.amplitude {
            dominant = signal;
        }
    }

    InterferencePattern {
        intensity,
        binding: binding(signals, config),
        frequency: dominant.frequency,
        phase: wrap_phase(im.atan2(re)),
        locations: signals.iter().flat_map(|s| s.route.iter().cloned()).collect(),
        sequence: None,
    }
}

/// Phase coherence `|Σ e^{iφ}| / m` over signals inside the reference band.
fn binding(signals: &[Signal], config: &FocusConfig) -> f64 {
    let (re, im, m) = signals
        .iter()
        .filter(|s| config.in_reference_band(s.frequency))
        .fold((0.0f64, 0.0f64, 0usize), |(re, im, m), s| {
            (re + s.phase.cos(), im + s.phase.sin(), m + 1)
        });
    if m == 0 {
        return 0.0;
    }
    (re.hypot(im) / m as f64).clamp(0.0, 1.0)
}

fn shift_between(previous: &InterferencePattern, candidate: &InterferencePattern) -> bool {
    let stronger = candidate.intensity / (previous.intensity + EPSILON) > INTENSITY_SHIFT_RATIO;
    let breakthrough = candidate.binding > BREAKTHROUGH_BINDING && previous.binding < WEAK_BINDING;
    let elsewhere = candidate.location_overlap(previous) < MIN_LOCATION_OVERLAP;
    stronger || breakthrough || elsewhere
}

/// `(cos(Δφ) + 1) / (1 + |Δf|)`; non-finite inputs give zero gain.
pub fn attention_gain(signal: &Signal, focus: &InterferencePattern) -> f64 {
    let phase_alignment = (signal.phase - focus.phase).cos();
    let freq_alignment = 1.0 / (1.0 + (signal.frequency - focus.frequency).abs());
    let gain = (phase_alignment + 1.0) * freq_alignment;
    if gain.is_finite() {
        gain.max(0.0)
    } else {
        0.0
    }
}

/// Re-scored copies of `signals`; the inputs are left as they were.
pub fn apply_gain(signals: &[Signal], focus: &InterferencePattern) -> Vec<Signal> {
    signals
        .iter()
        .map(|signal| {
            let gain = attention_gain(signal, focus);
            let mut boosted = signal.clone();
            boosted.amplitude = (signal.amplitude * gain).min(1.0);
            if gain > FOCUSED_GAIN {
                boosted.set_priority_class(PriorityClass::MAX);
            }
            let bump = (gain * 10.0).floor() as u32;
            let score = u32::from(signal.qos.priority_score) + bump;
            boosted.qos.priority_score = score.min(u32::from(MAX_PRIORITY_SCORE)) as u8;
            boosted
        })
        .collect()
}
