//! Race engine - picks one winner among competing signals
//!
//! Every candidate gets a sampled propagation delay and its own spawned wait.
//! The first arrival resolves the race; the remaining waits are cancelled through
//! a shared `CancellationToken`. Lost candidates park until cancelled, and the
//! whole race is bounded by `max_wait_ms`, so a race where everything is lost
//! ends as a failure instead of hanging.
//!
//! Weight and win-history updates are applied synchronously after the winner is
//! settled, with no await point in between: a race either commits all of its
//! updates or none.

use crate::weights::{WeightStore, MAX_WEIGHT};
use burstrace_core::{
    Error, PriorityClass, Qos, RaceConfig, Result, RouteKey, Signal, SignalId, MAX_PRIORITY_SCORE,
};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Winner weight above which its class is promoted one step.
pub const PROMOTE_ABOVE: f64 = 1.5;
/// Loser weight below which its class is demoted one step.
pub const DEMOTE_BELOW: f64 = 0.5;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// How one candidate fared.
#[derive(Clone, Debug, Serialize)]
pub struct Participant {
    pub signal_id: SignalId,
    pub key: RouteKey,
    /// QoS after weight scaling
    pub effective_qos: Qos,
    /// `None` when the candidate was lost
    pub delay_ms: Option<f64>,
    pub weight_before: f64,
    pub weight_after: f64,
    /// Class the candidate leaves the race with. For the winner this matches
    /// `RaceResult::winner`. Losers are not handed back, so a demotion exists
    /// only here; their weights stay under `key`.
    pub class_after: PriorityClass,
}

impl Participant {
    pub fn is_lost(&self) -> bool {
        self.delay_ms.is_none()
    }
}

/// Outcome of one race. `winner` is `None` when every candidate was lost or
/// nothing arrived within the wait bound; in that case no state was touched.
#[derive(Clone, Debug, Serialize)]
pub struct RaceResult {
    pub race_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// The winning signal with its post-race priority class
    pub winner: Option<Signal>,
    /// Simulated time until the winner arrived
    pub duration_ms: Option<f64>,
    pub participants: Vec<Participant>,
}

impl RaceResult {
    pub fn is_failure(&self) -> bool {
        self.winner.is_none()
    }

    pub fn participant(&self, id: SignalId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.signal_id == id)
    }
}

/// Race counters for telemetry.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RaceStats {
    pub started: u64,
    pub won: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct RaceCounters {
    started: AtomicU64,
    won: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

// ---------------------------------------------------------------------------
// Delay model
// ---------------------------------------------------------------------------

/// Scale a signal's QoS by its routing weight: latency down, bandwidth and
/// priority score up.
pub fn effective_qos(qos: &Qos, weight: f64) -> Qos {
    let score = (f64::from(qos.priority_score) * weight).round();
    Qos {
        latency_ms: qos.latency_ms / weight,
        bandwidth: qos.bandwidth * weight,
        priority_score: score.clamp(0.0, f64::from(MAX_PRIORITY_SCORE)) as u8,
        ..qos.clone()
    }
}

/// Milliseconds removed from the delay for a priority class.
pub fn priority_bonus_ms(class: PriorityClass, config: &RaceConfig) -> f64 {
    f64::from(class.rank()) * config.priority_bonus_ms
}

/// `max(0, latency + jitter + load - bonus)`, or `None` if the sample is lost.
pub fn sample_delay<R: Rng + ?Sized>(qos: &Qos, config: &RaceConfig, rng: &mut R) -> Option<f64> {
    // gen::<f64>() is in [0, 1): probability 1.0 always loses, 0.0 never does
    if rng.gen::<f64>() < qos.loss_probability {
        return None;
    }
    let half = qos.jitter_ms / 2.0;
    let jitter = if half > 0.0 { rng.gen_range(-half..=half) } else { 0.0 };
    let load = config.load_delay_factor / qos.bandwidth;
    let delay = qos.latency_ms + jitter + load - priority_bonus_ms(qos.priority_class, config);
    Some(delay.max(0.0))
}

/// How long a candidate's wait sleeps before arriving. Lost samples and delays
/// past `max_wait_ms` (including non-finite ones) never arrive.
pub fn arrival_wait(delay_ms: Option<f64>, max_wait_ms: u64) -> Option<Duration> {
    let ms = delay_ms?;
    if ms.is_nan() || ms > max_wait_ms as f64 {
        return None;
    }
    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

/// Index of the smallest finite delay, lowest id on ties.
pub fn settle(samples: &[(SignalId, Option<f64>)]) -> Option<usize> {
    samples
        .iter()
        .enumerate()
        .filter_map(|(i, (id, delay))| delay.map(|d| (i, *id, d)))
        .min_by(|a, b| a.2.total_cmp(&b.2).then(a.1.cmp(&b.1)))
        .map(|(i, _, _)| i)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RaceEngine {
    weights: Arc<WeightStore>,
    config: RaceConfig,
    rng: Mutex<StdRng>,
    counters: RaceCounters,
}

impl RaceEngine {
    pub fn new(weights: Arc<WeightStore>, config: RaceConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            weights,
            config,
            rng: Mutex::new(rng),
            counters: RaceCounters::default(),
        })
    }

    pub fn weights(&self) -> &Arc<WeightStore> {
        &self.weights
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    pub fn stats(&self) -> RaceStats {
        RaceStats {
            started: self.counters.started.load(Ordering::Relaxed),
            won: self.counters.won.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Run a race without cancellation support.
    pub async fn race(&self, signals: Vec<Signal>) -> Result<RaceResult> {
        // Use a token that is never cancelled
        self.race_cancellable(signals, CancellationToken::new()).await
    }

    /// Run a race with cancellation support.
    ///
    /// When `cancel` fires before a winner is settled, all pending waits are
    /// cancelled and `Error::Cancelled` is returned with no state changes.
    /// Dropping the returned future has the same effect.
    pub async fn race_cancellable(
        &self,
        signals: Vec<Signal>,
        cancel: CancellationToken,
    ) -> Result<RaceResult> {
        if signals.is_empty() {
            return Err(Error::EmptyRace);
        }
        for signal in &signals {
            signal.qos.validate(signal.id)?;
        }

        let race_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.counters.started.fetch_add(1, Ordering::Relaxed);

        let mut participants = self.sample_participants(&signals);
        let samples: Vec<(SignalId, Option<f64>)> =
            participants.iter().map(|p| (p.signal_id, p.delay_ms)).collect();

        // Fan out one wait per candidate. Dropping the guard cancels whatever
        // is still pending, including when this future itself is dropped.
        let waits = cancel.child_token();
        let _guard = waits.clone().drop_guard();
        let (arrival_tx, mut arrival_rx) = mpsc::channel::<usize>(samples.len());
        for (idx, (_, delay)) in samples.iter().enumerate() {
            let tx = arrival_tx.clone();
            let token = waits.clone();
            let wait = arrival_wait(*delay, self.config.max_wait_ms);
            tokio::spawn(async move {
                match wait {
                    Some(wait) => {
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {
                                let _ = tx.send(idx).await;
                            }
                            _ = token.cancelled() => {}
                        }
                    }
                    // Lost or past the bound: never arrives, only waits to be abandoned
                    None => token.cancelled().await,
                }
            });
        }
        drop(arrival_tx);

        let max_wait = Duration::from_millis(self.config.max_wait_ms);
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!("race {} cancelled by caller", race_id);
                return Err(Error::Cancelled);
            }
            arrival = tokio::time::timeout(max_wait, arrival_rx.recv()) => arrival,
        };
        waits.cancel();

        let arrived = matches!(first, Ok(Some(_)));
        // Timers sharing a tick may fire in either order, so the first arrival
        // only marks resolution; the winner is the smallest sampled delay.
        let winner_idx = if arrived { settle(&samples) } else { None };
        let Some(winner_idx) = winner_idx else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                "race {} failed: no arrival among {} candidates within {} ms",
                race_id,
                signals.len(),
                self.config.max_wait_ms
            );
            return Ok(RaceResult {
                race_id,
                started_at,
                winner: None,
                duration_ms: None,
                participants,
            });
        };

        let duration_ms = samples[winner_idx].1.unwrap_or_default();
        let winner = self.commit(&signals, &mut participants, winner_idx, duration_ms);
        self.counters.won.fetch_add(1, Ordering::Relaxed);

        debug!(
            "race {}: {} won in {:.2} ms against {} candidates",
            race_id,
            winner.id,
            duration_ms,
            signals.len() - 1
        );

        Ok(RaceResult {
            race_id,
            started_at,
            winner: Some(winner),
            duration_ms: Some(duration_ms),
            participants,
        })
    }

    fn sample_participants(&self, signals: &[Signal]) -> Vec<Participant> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        signals
            .iter()
            .map(|signal| {
                let key = signal.route_key();
                let weight = self.weights.weight(&key);
                let effective_qos = effective_qos(&signal.qos, weight);
                let delay_ms = sample_delay(&effective_qos, &self.config, &mut *rng);
                Participant {
                    signal_id: signal.id,
                    key,
                    effective_qos,
                    delay_ms,
                    weight_before: weight,
                    weight_after: weight,
                    class_after: signal.qos.priority_class,
                }
            })
            .collect()
    }

    /// Apply winner reinforcement and loser decay, once per distinct key.
    /// The winner's key is never decayed in the same race.
    fn commit(
        &self,
        signals: &[Signal],
        participants: &mut [Participant],
        winner_idx: usize,
        duration_ms: f64,
    ) -> Signal {
        let winner_key = participants[winner_idx].key.clone();
        let winner_weight = self.weights.reinforce(&winner_key, duration_ms);

        let mut decayed: HashSet<RouteKey> = HashSet::new();
        for (idx, participant) in participants.iter_mut().enumerate() {
            if idx == winner_idx || participant.is_lost() || participant.key == winner_key {
                continue;
            }
            let weight = if decayed.insert(participant.key.clone()) {
                self.weights.decay(&participant.key)
            } else {
                self.weights.weight(&participant.key)
            };
            participant.weight_after = weight;
            let class = signals[idx].qos.priority_class;
            if weight < DEMOTE_BELOW && class > PriorityClass::MIN {
                participant.class_after = class.demote();
            }
        }

        for participant in participants.iter_mut().filter(|p| p.key == winner_key) {
            participant.weight_after = winner_weight;
        }

        let mut winner = signals[winner_idx].clone();
        let class = winner.qos.priority_class;
        if winner_weight > PROMOTE_ABOVE && class < PriorityClass::MAX {
            winner.set_priority_class(class.promote());
            debug!(
                "{} promoted {} -> {} (weight {:.2}/{})",
                winner.id, class, winner.qos.priority_class, winner_weight, MAX_WEIGHT
            );
        }
        participants[winner_idx].class_after = winner.qos.priority_class;
        winner
    }

    /// Zero the counters. The weight store is reset separately since it may be shared.
    pub fn reset(&self) {
        self.counters.started.store(0, Ordering::Relaxed);
        self.counters.won.store(0, Ordering::Relaxed);
        self.counters.failed.store(0, Ordering::Relaxed);
        self.counters.cancelled.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qos(class: PriorityClass, latency: f64) -> Qos {
        Qos::reliable(SignalId(0), class, latency).unwrap()
    }

    #[test]
    fn settle_prefers_smallest_delay() {
        let samples = [
            (SignalId(3), Some(12.0)),
            (SignalId(1), Some(9.0)),
            (SignalId(2), None),
        ];
        assert_eq!(settle(&samples), Some(1));
    }

    #[test]
    fn settle_breaks_ties_by_lower_id() {
        let samples = [(SignalId(7), Some(5.0)), (SignalId(4), Some(5.0))];
        assert_eq!(settle(&samples), Some(1));
    }

    #[test]
    fn waits_past_the_bound_never_arrive() {
        assert_eq!(arrival_wait(Some(250.0), 1_000), Some(Duration::from_millis(250)));
        assert_eq!(arrival_wait(Some(1_000.0), 1_000), Some(Duration::from_secs(1)));
        assert_eq!(arrival_wait(Some(1_000.5), 1_000), None);
        assert_eq!(arrival_wait(Some(1e30), 1_000), None);
        assert_eq!(arrival_wait(Some(f64::INFINITY), 1_000), None);
        assert_eq!(arrival_wait(Some(f64::NAN), 1_000), None);
        assert_eq!(arrival_wait(None, 1_000), None);
    }

    #[test]
    fn settle_all_lost_is_none() {
        assert_eq!(settle(&[(SignalId(1), None), (SignalId(2), None)]), None);
    }

    #[test]
    fn effective_qos_scales_with_weight() {
        let base = qos(PriorityClass::Normal, 10.0);
        let scaled = effective_qos(&base, 2.0);
        assert_eq!(scaled.latency_ms, 5.0);
        assert_eq!(scaled.bandwidth, 200.0);
        assert_eq!(scaled.priority_score, 40);
        assert_eq!(effective_qos(&base, 10.0).priority_score, MAX_PRIORITY_SCORE);
    }

    #[test]
    fn delay_never_negative() {
        let config = RaceConfig { priority_bonus_ms: 50.0, ..RaceConfig::default() };
        let mut rng = StdRng::seed_from_u64(1);
        let d = sample_delay(&qos(PriorityClass::Focused, 1.0), &config, &mut rng);
        assert_eq!(d, Some(0.0));
    }

    #[test]
    fn jitter_stays_within_half_width() {
        let config = RaceConfig { load_delay_factor: 0.0, priority_bonus_ms: 0.0, ..RaceConfig::default() };
        let mut rng = StdRng::seed_from_u64(9);
        let mut q = qos(PriorityClass::Dormant, 10.0);
        q.jitter_ms = 4.0;
        for _ in 0..1000 {
            let d = sample_delay(&q, &config, &mut rng).unwrap();
            assert!((8.0..=12.0).contains(&d), "delay {} outside jitter window", d);
        }
    }

    #[test]
    fn full_loss_is_always_lost() {
        let config = RaceConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut q = qos(PriorityClass::Normal, 10.0);
        q.loss_probability = 1.0;
        assert!((0..1000).all(|_| sample_delay(&q, &config, &mut rng).is_none()));
    }

    #[tokio::test]
    async fn empty_race_is_a_config_error() {
        let engine = RaceEngine::new(Arc::new(WeightStore::new()), RaceConfig::default()).unwrap();
        let err = engine.race(Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::EmptyRace));
        assert!(err.is_config());
        assert_eq!(engine.stats(), RaceStats::default());
    }

    #[test]
    fn zero_wait_bound_is_rejected() {
        let config = RaceConfig { max_wait_ms: 0, ..RaceConfig::default() };
        assert!(RaceEngine::new(Arc::new(WeightStore::new()), config).is_err());
    }
}
