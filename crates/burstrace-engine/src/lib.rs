//! Burstrace Engine - burst synchronizer, race arbitration, and focus aggregation
//!
//! Data flow per frame:
//! - Synchronizer: frame -> phase-tagged bursts (+ harmonic satellites)
//! - RaceEngine: bursts race under simulated delay/jitter/loss -> one winner
//! - WeightStore: winner reinforced, losers decayed, all bounded to [0.1, 10]
//! - Aggregator: winner superposed into the focus history -> shift decision and
//!   attention gain for the next frame's candidates

pub mod aggregator;
pub mod pipeline;
pub mod race;
pub mod synchronizer;
pub mod weights;

pub use aggregator::{apply_gain, attention_gain, superpose, Aggregator, FocusStats};
pub use pipeline::{ArbiterEvent, ArbitrationLoop, CycleReport, Telemetry};
pub use race::{Participant, RaceEngine, RaceResult, RaceStats};
pub use synchronizer::{Burst, SignalIds, SyncOutput, Synchronizer, SynchronizerState};
pub use weights::{WeightEntry, WeightStore, MAX_WEIGHT, MIN_WEIGHT};
