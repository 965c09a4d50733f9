//! Signal synchronizer - slices input frames into phase-tagged bursts
//!
//! Each frame yields `floor(target / frameRate)` bursts plus one extra whenever
//! the fractional carry crosses 1, so the long-run burst rate converges to the
//! configured target. Burst amplitude is modulated by a slower theta oscillation
//! (cross-frequency coupling); strongly modulated bursts can also emit phase-locked
//! 2x/3x harmonic satellites for the aggregator.

use burstrace_core::{
    wrap_phase, PriorityClass, Qos, Result, Signal, SignalId, StreamId, SyncConfig,
};
use serde::Serialize;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Bursts above this modulation strength grow satellites.
pub const SATELLITE_MODULATION_THRESHOLD: f64 = 0.7;
pub const SATELLITE_HARMONICS: [u32; 2] = [2, 3];

const BRIGHTNESS_MIN_HZ: f64 = 80.0;
const BRIGHTNESS_MAX_HZ: f64 = 8_000.0;

const BURST_LATENCY_MS: f64 = 20.0;
const BURST_JITTER_MS: f64 = 4.0;
const BURST_MIN_BANDWIDTH: f64 = 50.0;
const BURST_BANDWIDTH_SPAN: f64 = 150.0;
const BURST_LOSS_PROBABILITY: f64 = 0.02;

// Absorbs float drift so 0.2 * 5 still counts as a whole burst.
const CARRY_EPSILON: f64 = 1e-9;

/// Shared allocator so ids stay unique across every stream's synchronizer.
#[derive(Clone, Debug, Default)]
pub struct SignalIds(Arc<AtomicU64>);

impl SignalIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> SignalId {
        SignalId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-stream oscillator state. Mutated once per frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SynchronizerState {
    pub gamma_phase: f64,
    pub theta_phase: f64,
    /// Fractional burst carry, kept in `[0, 1)`
    pub phase_accumulator: f64,
    pub frames_processed: u64,
}

/// One sub-frame emission with the estimators it was derived from.
#[derive(Clone, Debug, PartialEq)]
pub struct Burst {
    pub index: usize,
    pub signal: Signal,
    pub satellites: Vec<Signal>,
    /// RMS of the burst's segment
    pub energy: f64,
    /// Zero-crossing rate mapped onto 80..8000 Hz
    pub brightness_hz: f64,
    /// 0.5..=1
    pub modulation: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncOutput {
    pub frame_index: u64,
    pub bursts: Vec<Burst>,
}

impl SyncOutput {
    pub fn len(&self) -> usize {
        self.bursts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bursts.is_empty()
    }

    /// Primary signals, the race candidates.
    pub fn primaries(&self) -> Vec<Signal> {
        self.bursts.iter().map(|b| b.signal.clone()).collect()
    }

    pub fn satellites(&self) -> impl Iterator<Item = &Signal> {
        self.bursts.iter().flat_map(|b| b.satellites.iter())
    }

    /// The burst whose primary carries `id`.
    pub fn burst_for(&self, id: SignalId) -> Option<&Burst> {
        self.bursts.iter().find(|b| b.signal.id == id)
    }
}

pub struct Synchronizer {
    stream_id: StreamId,
    config: SyncConfig,
    state: SynchronizerState,
    ids: SignalIds,
}

impl Synchronizer {
    pub fn new(stream_id: StreamId, config: SyncConfig) -> Result<Self> {
        Self::with_ids(stream_id, config, SignalIds::new())
    }

    pub fn with_ids(stream_id: StreamId, config: SyncConfig, ids: SignalIds) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            stream_id,
            config,
            state: SynchronizerState::default(),
            ids,
        })
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> &SynchronizerState {
        &self.state
    }

    /// Number of bursts the next frame will carry, advancing the carry.
    fn next_burst_count(&mut self) -> usize {
        let ratio = self.config.bursts_per_frame();
        let whole = ratio.floor();
        self.state.phase_accumulator += ratio - whole;

        let mut total = whole as usize;
        if self.state.phase_accumulator + CARRY_EPSILON >= 1.0 {
            total += 1;
            self.state.phase_accumulator = (self.state.phase_accumulator - 1.0).max(0.0);
        }
        total
    }

    /// Turn one input frame into a burst of candidate signals.
    pub fn process_frame(&mut self, frame: &[f32]) -> Result<SyncOutput> {
        let frame_index = self.state.frames_processed;
        let total = self.next_burst_count();
        let frame_rate = self.config.input_frame_rate_hz;
        let frame_start_s = frame_index as f64 / frame_rate;

        let mut bursts = Vec::with_capacity(total);
        for i in 0..total {
            self.state.gamma_phase = wrap_phase(self.state.gamma_phase + TAU / total as f64);

            let burst_time_s = frame_start_s + (i as f64 / total as f64) / frame_rate;
            self.state.theta_phase =
                wrap_phase(TAU * self.config.modulation_freq_hz * burst_time_s);
            let modulation = modulation_strength(self.state.theta_phase);

            let samples = segment(frame, i, total);
            let energy = rms(samples);
            let zcr = zero_crossing_rate(samples);
            let brightness_hz = BRIGHTNESS_MIN_HZ + zcr * (BRIGHTNESS_MAX_HZ - BRIGHTNESS_MIN_HZ);

            let signal = self.primary_signal(energy, zcr, modulation)?;
            let satellites = if self.config.phase_alignment
                && modulation > SATELLITE_MODULATION_THRESHOLD
            {
                self.satellites_of(&signal)?
            } else {
                Vec::new()
            };

            bursts.push(Burst {
                index: i,
                signal,
                satellites,
                energy,
                brightness_hz,
                modulation,
            });
        }

        self.state.frames_processed += 1;
        debug!(
            "stream {} frame {}: {} bursts (carry {:.3})",
            self.stream_id, frame_index, total, self.state.phase_accumulator
        );
        Ok(SyncOutput { frame_index, bursts })
    }

    fn primary_signal(&self, energy: f64, zcr: f64, modulation: f64) -> Result<Signal> {
        let id = self.ids.next();
        let class = PriorityClass::from_energy(energy);
        // Louder bursts propagate faster, brighter bursts carry more bandwidth.
        let latency = BURST_LATENCY_MS * (1.0 - 0.5 * energy.min(1.0));
        let bandwidth = BURST_MIN_BANDWIDTH + BURST_BANDWIDTH_SPAN * zcr;
        let qos = Qos::new(id, class, latency, BURST_JITTER_MS, bandwidth, BURST_LOSS_PROBABILITY)?;
        Signal::new(
            id,
            self.stream_id.clone(),
            energy * modulation,
            self.config.target_burst_freq_hz,
            self.state.gamma_phase,
            qos,
        )
    }

    fn satellites_of(&self, primary: &Signal) -> Result<Vec<Signal>> {
        SATELLITE_HARMONICS
            .iter()
            .map(|&h| {
                let h = f64::from(h);
                Signal::new(
                    self.ids.next(),
                    self.stream_id.clone(),
                    primary.amplitude / h,
                    primary.frequency * h,
                    primary.phase * h,
                    primary.qos.clone(),
                )
            })
            .collect()
    }

    /// Zero all phase and carry state.
    pub fn reset(&mut self) {
        self.state = SynchronizerState::default();
    }
}

/// `0.5 + 0.5 * (sin θ + 1) / 2`, always in `[0.5, 1]`.
pub fn modulation_strength(theta_phase: f64) -> f64 {
    0.5 + 0.5 * (theta_phase.sin() + 1.0) / 2.0
}

/// Contiguous equal-width slice `i` of `total`; the last absorbs the remainder.
fn segment(frame: &[f32], i: usize, total: usize) -> &[f32] {
    let width = frame.len() / total;
    let start = i * width;
    let end = if i + 1 == total { frame.len() } else { start + width };
    &frame[start..end]
}

fn sample(s: f32) -> f64 {
    if s.is_finite() {
        f64::from(s)
    } else {
        0.0
    }
}

pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| sample(s).powi(2)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Sign changes per adjacent pair, 0..=1.
pub fn zero_crossing_rate(samples: &[f32]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (sample(w[0]) >= 0.0) != (sample(w[1]) >= 0.0))
        .count();
    crossings as f64 / (samples.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_cover_frame_without_overlap() {
        let frame: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let parts: Vec<&[f32]> = (0..3).map(|i| segment(&frame, i, 3)).collect();
        assert_eq!(parts[0], &frame[0..3]);
        assert_eq!(parts[1], &frame[3..6]);
        assert_eq!(parts[2], &frame[6..10]);
    }

    #[test]
    fn short_frame_yields_empty_leading_segments() {
        let frame = [0.5f32, -0.5];
        assert!(segment(&frame, 0, 4).is_empty());
        assert_eq!(segment(&frame, 3, 4), &frame[..]);
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-12);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn non_finite_samples_count_as_silence() {
        assert_eq!(rms(&[f32::NAN, f32::INFINITY]), 0.0);
    }

    #[test]
    fn zero_crossing_rate_of_alternating_signal_is_one() {
        assert_eq!(zero_crossing_rate(&[1.0, -1.0, 1.0, -1.0]), 1.0);
        assert_eq!(zero_crossing_rate(&[1.0, 1.0, 1.0]), 0.0);
        assert_eq!(zero_crossing_rate(&[1.0]), 0.0);
    }

    #[test]
    fn modulation_strength_stays_in_range() {
        for step in 0..64 {
            let m = modulation_strength(step as f64 * TAU / 64.0);
            assert!((0.5..=1.0).contains(&m), "modulation {} out of range", m);
        }
    }

    #[test]
    fn signal_ids_are_shared_between_clones() {
        let ids = SignalIds::new();
        let other = ids.clone();
        assert_eq!(ids.next(), SignalId(0));
        assert_eq!(other.next(), SignalId(1));
    }
}
