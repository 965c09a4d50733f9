//! Arbitration loop - one full synchronize / race / aggregate cycle per frame
//!
//! Frames enter per stream. Each stream owns its own synchronizer; the weight
//! store, race engine and aggregator are shared. The current focus biases the
//! next cycle's candidates through attention gain, and every cycle emits
//! `ArbiterEvent`s to all subscribers.

use crate::aggregator::{Aggregator, FocusStats};
use crate::race::{RaceEngine, RaceResult, RaceStats};
use crate::synchronizer::{SignalIds, Synchronizer, SynchronizerState};
use crate::weights::{WeightEntry, WeightStore};
use burstrace_core::{ArbiterConfig, InterferencePattern, Result, Signal, StreamId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Events and reports
// ---------------------------------------------------------------------------

/// Notifications for transport and UI collaborators.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArbiterEvent {
    /// A race produced a winner to forward downstream
    Winner {
        stream: StreamId,
        race_id: Uuid,
        signal: Signal,
        duration_ms: f64,
        at: DateTime<Utc>,
    },
    /// Every candidate was lost; nothing was committed
    RaceFailed {
        stream: StreamId,
        race_id: Uuid,
        candidates: usize,
        at: DateTime<Utc>,
    },
    /// Attention moved to a new pattern
    FocusShift {
        stream: StreamId,
        pattern: InterferencePattern,
        at: DateTime<Utc>,
    },
}

/// What one frame produced.
#[derive(Clone, Debug, Serialize)]
pub struct CycleReport {
    pub stream: StreamId,
    pub frame_index: u64,
    pub bursts: usize,
    pub satellites: usize,
    /// `None` when the frame carried no bursts
    pub race: Option<RaceResult>,
    /// `None` unless the race had a winner
    pub pattern: Option<InterferencePattern>,
    pub shifted: bool,
}

impl CycleReport {
    pub fn winner(&self) -> Option<&Signal> {
        self.race.as_ref().and_then(|r| r.winner.as_ref())
    }
}

/// Diagnostics snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct Telemetry {
    pub streams: usize,
    pub races: RaceStats,
    pub focus: FocusStats,
    pub current_focus: Option<InterferencePattern>,
    pub weights: Vec<WeightEntry>,
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct ArbitrationLoop {
    config: ArbiterConfig,
    ids: SignalIds,
    synchronizers: DashMap<StreamId, Arc<Mutex<Synchronizer>>>,
    weights: Arc<WeightStore>,
    engine: RaceEngine,
    aggregator: Aggregator,
    focus: RwLock<Option<InterferencePattern>>,
    events: broadcast::Sender<ArbiterEvent>,
}

impl ArbitrationLoop {
    pub fn new(config: ArbiterConfig) -> Result<Self> {
        Self::with_weights(config, Arc::new(WeightStore::new()))
    }

    /// Build around an existing weight store, e.g. one shared with other loops.
    pub fn with_weights(config: ArbiterConfig, weights: Arc<WeightStore>) -> Result<Self> {
        config.validate()?;
        let engine = RaceEngine::new(weights.clone(), config.race.clone())?;
        let aggregator = Aggregator::new(config.focus.clone())?;
        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            config,
            ids: SignalIds::new(),
            synchronizers: DashMap::new(),
            weights,
            engine,
            aggregator,
            focus: RwLock::new(None),
            events,
        })
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn engine(&self) -> &RaceEngine {
        &self.engine
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn weights(&self) -> &Arc<WeightStore> {
        &self.weights
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArbiterEvent> {
        self.events.subscribe()
    }

    pub fn current_focus(&self) -> Option<InterferencePattern> {
        self.focus.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn synchronizer_state(&self, stream: &StreamId) -> Option<SynchronizerState> {
        self.synchronizers.get(stream).map(|s| {
            s.lock().unwrap_or_else(|e| e.into_inner()).state().clone()
        })
    }

    fn synchronizer(&self, stream: &StreamId) -> Result<Arc<Mutex<Synchronizer>>> {
        if let Some(existing) = self.synchronizers.get(stream) {
            return Ok(existing.clone());
        }
        let created = Synchronizer::with_ids(stream.clone(), self.config.sync.clone(), self.ids.clone())?;
        Ok(self
            .synchronizers
            .entry(stream.clone())
            .or_insert_with(|| Arc::new(Mutex::new(created)))
            .clone())
    }

    /// Run one cycle without cancellation support.
    pub async fn process_frame(&self, stream: &StreamId, frame: &[f32]) -> Result<CycleReport> {
        self.process_frame_cancellable(stream, frame, CancellationToken::new())
            .await
    }

    /// Run one cycle: synchronize, bias by focus, race, aggregate.
    pub async fn process_frame_cancellable(
        &self,
        stream: &StreamId,
        frame: &[f32],
        cancel: CancellationToken,
    ) -> Result<CycleReport> {
        let output = {
            let sync = self.synchronizer(stream)?;
            let mut sync = sync.lock().unwrap_or_else(|e| e.into_inner());
            sync.process_frame(frame)?
        };

        let mut report = CycleReport {
            stream: stream.clone(),
            frame_index: output.frame_index,
            bursts: output.len(),
            satellites: output.satellites().count(),
            race: None,
            pattern: None,
            shifted: false,
        };
        if output.is_empty() {
            debug!("stream {} frame {}: no bursts", stream, output.frame_index);
            return Ok(report);
        }

        let candidates = match self.current_focus() {
            Some(focus) => self.aggregator.apply_gain(&output.primaries(), &focus),
            None => output.primaries(),
        };
        let race = self.engine.race_cancellable(candidates, cancel).await?;

        match &race.winner {
            Some(winner) => {
                let mut inputs = vec![winner.clone()];
                if let Some(burst) = output.burst_for(winner.id) {
                    inputs.extend(burst.satellites.iter().cloned());
                }
                let (pattern, shifted) = self.aggregator.record_and_judge(&inputs);

                let _ = self.events.send(ArbiterEvent::Winner {
                    stream: stream.clone(),
                    race_id: race.race_id,
                    signal: winner.clone(),
                    duration_ms: race.duration_ms.unwrap_or_default(),
                    at: Utc::now(),
                });
                if shifted {
                    info!(
                        "focus shift on {}: {:.1} Hz, intensity {:.3}, binding {:.3}",
                        stream, pattern.frequency, pattern.intensity, pattern.binding
                    );
                    *self.focus.write().unwrap_or_else(|e| e.into_inner()) = Some(pattern.clone());
                    let _ = self.events.send(ArbiterEvent::FocusShift {
                        stream: stream.clone(),
                        pattern: pattern.clone(),
                        at: Utc::now(),
                    });
                }
                report.pattern = Some(pattern);
                report.shifted = shifted;
            }
            None => {
                warn!("stream {} frame {}: race failed", stream, output.frame_index);
                let _ = self.events.send(ArbiterEvent::RaceFailed {
                    stream: stream.clone(),
                    race_id: race.race_id,
                    candidates: race.participants.len(),
                    at: Utc::now(),
                });
            }
        }

        report.race = Some(race);
        Ok(report)
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            streams: self.synchronizers.len(),
            races: self.engine.stats(),
            focus: self.aggregator.stats(),
            current_focus: self.current_focus(),
            weights: self.weights.snapshot(),
        }
    }

    /// Return every component to its initial state.
    pub fn reset(&self) {
        for entry in self.synchronizers.iter() {
            entry.value().lock().unwrap_or_else(|e| e.into_inner()).reset();
        }
        self.weights.reset();
        self.engine.reset();
        self.aggregator.reset();
        *self.focus.write().unwrap_or_else(|e| e.into_inner()) = None;
        info!("arbitration state reset ({} streams)", self.synchronizers.len());
    }
}
