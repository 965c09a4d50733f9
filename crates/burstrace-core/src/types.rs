//! Core types for Burstrace

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::Arc;

/// Highest value a signal's priority score can reach.
pub const MAX_PRIORITY_SCORE: u8 = 100;

/// Signals above this frequency take an extra relay hop.
pub const HIGH_FREQUENCY_HZ: f64 = 60.0;

/// Wrap an angle into `[0, 2π)`.
pub fn wrap_phase(phase: f64) -> f64 {
    if !phase.is_finite() {
        return 0.0;
    }
    let wrapped = phase.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Numeric signal identifier. Lower ids win ties.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub u64);

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sig-{}", self.0)
    }
}

/// Stream identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StreamId(Arc<str>);

impl StreamId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0.to_string()
    }
}

// ---------------------------------------------------------------------------
// Priority class
// ---------------------------------------------------------------------------

/// Six ordered priority levels, lowest first.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Dormant = 0,
    Background = 1,
    Normal = 2,
    Elevated = 3,
    Urgent = 4,
    /// Reserved for signals aligned with the current focus
    Focused = 5,
}

impl PriorityClass {
    pub const MIN: PriorityClass = PriorityClass::Dormant;
    pub const MAX: PriorityClass = PriorityClass::Focused;

    pub const ALL: [PriorityClass; 6] = [
        PriorityClass::Dormant,
        PriorityClass::Background,
        PriorityClass::Normal,
        PriorityClass::Elevated,
        PriorityClass::Urgent,
        PriorityClass::Focused,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: u8) -> Self {
        Self::ALL[usize::from(rank.min(Self::MAX.rank()))]
    }

    /// One step up, saturating at `Focused`.
    pub fn promote(self) -> Self {
        Self::from_rank(self.rank().saturating_add(1))
    }

    /// One step down, saturating at `Dormant`.
    pub fn demote(self) -> Self {
        Self::from_rank(self.rank().saturating_sub(1))
    }

    /// Class for a burst with the given RMS energy.
    pub fn from_energy(energy: f64) -> Self {
        if energy >= 0.8 {
            PriorityClass::Urgent
        } else if energy >= 0.5 {
            PriorityClass::Elevated
        } else if energy >= 0.2 {
            PriorityClass::Normal
        } else if energy >= 0.05 {
            PriorityClass::Background
        } else {
            PriorityClass::Dormant
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityClass::Dormant => "dormant",
            PriorityClass::Background => "background",
            PriorityClass::Normal => "normal",
            PriorityClass::Elevated => "elevated",
            PriorityClass::Urgent => "urgent",
            PriorityClass::Focused => "focused",
        }
    }
}

impl std::fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// QoS
// ---------------------------------------------------------------------------

/// Delivery characteristics of a signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Qos {
    pub priority_class: PriorityClass,
    /// 0..=100, boosted by weight and attention gain
    pub priority_score: u8,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub bandwidth: f64,
    pub loss_probability: f64,
}

impl Qos {
    /// Build a validated QoS record. `id` is only used for error reporting.
    pub fn new(
        id: SignalId,
        priority_class: PriorityClass,
        latency_ms: f64,
        jitter_ms: f64,
        bandwidth: f64,
        loss_probability: f64,
    ) -> Result<Self> {
        let qos = Self {
            priority_class,
            priority_score: default_score(priority_class),
            latency_ms,
            jitter_ms,
            bandwidth,
            loss_probability,
        };
        qos.validate(id)?;
        Ok(qos)
    }

    /// Zero-jitter, lossless QoS with the given latency.
    pub fn reliable(id: SignalId, priority_class: PriorityClass, latency_ms: f64) -> Result<Self> {
        Self::new(id, priority_class, latency_ms, 0.0, 100.0, 0.0)
    }

    pub fn validate(&self, id: SignalId) -> Result<()> {
        if !self.latency_ms.is_finite() || self.latency_ms < 0.0 {
            return Err(Error::invalid_signal(id.0, format!("latency {} ms", self.latency_ms)));
        }
        if !self.jitter_ms.is_finite() || self.jitter_ms < 0.0 {
            return Err(Error::invalid_signal(id.0, format!("jitter {} ms", self.jitter_ms)));
        }
        if !self.bandwidth.is_finite() || self.bandwidth <= 0.0 {
            return Err(Error::invalid_signal(id.0, format!("bandwidth {}", self.bandwidth)));
        }
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(Error::invalid_signal(
                id.0,
                format!("loss probability {}", self.loss_probability),
            ));
        }
        if self.priority_score > MAX_PRIORITY_SCORE {
            return Err(Error::invalid_signal(id.0, format!("priority score {}", self.priority_score)));
        }
        Ok(())
    }
}

fn default_score(class: PriorityClass) -> u8 {
    class.rank() * 10
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A candidate competing for selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub stream_id: StreamId,
    /// 0..=1
    pub amplitude: f64,
    pub frequency: f64,
    /// Radians in `[0, 2π)`
    pub phase: f64,
    pub qos: Qos,
    pub route: Vec<String>,
}

impl Signal {
    /// Build a signal, clamping amplitude and wrapping phase. The route is
    /// assembled from frequency and priority class.
    pub fn new(
        id: SignalId,
        stream_id: StreamId,
        amplitude: f64,
        frequency: f64,
        phase: f64,
        qos: Qos,
    ) -> Result<Self> {
        qos.validate(id)?;
        if !frequency.is_finite() || frequency < 0.0 {
            return Err(Error::invalid_signal(id.0, format!("frequency {} Hz", frequency)));
        }
        let amplitude = if amplitude.is_finite() {
            amplitude.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let route = assemble_route(frequency, qos.priority_class);
        Ok(Self {
            id,
            stream_id,
            amplitude,
            frequency,
            phase: wrap_phase(phase),
            qos,
            route,
        })
    }

    /// Key under which this signal's weight and win history live.
    pub fn route_key(&self) -> RouteKey {
        RouteKey::new(self.stream_id.clone(), self.qos.priority_class)
    }

    pub fn priority_class(&self) -> PriorityClass {
        self.qos.priority_class
    }

    /// Change the priority class and reassemble the route to match its lane.
    pub fn set_priority_class(&mut self, class: PriorityClass) {
        self.qos.priority_class = class;
        self.route = assemble_route(self.frequency, class);
    }
}

/// Region tag for the oscillation band a frequency falls into.
pub fn band_region(frequency: f64) -> &'static str {
    match frequency {
        f if f < 4.0 => "delta",
        f if f < 8.0 => "theta",
        f if f < 13.0 => "alpha",
        f if f < 30.0 => "beta",
        f if f < 80.0 => "gamma",
        _ => "high-gamma",
    }
}

/// Deterministic hop list: band region, an extra relay for high frequencies,
/// then the lane implied by the priority class.
pub fn assemble_route(frequency: f64, class: PriorityClass) -> Vec<String> {
    let mut route = vec![band_region(frequency).to_string()];
    if frequency > HIGH_FREQUENCY_HZ {
        route.push("relay".to_string());
    }
    let lane = if class >= PriorityClass::Urgent {
        "fast-lane"
    } else {
        "standard-lane"
    };
    route.push(lane.to_string());
    route
}

// ---------------------------------------------------------------------------
// Route key
// ---------------------------------------------------------------------------

/// Weight-table key: `(stream, priority class)`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RouteKey {
    pub stream_id: StreamId,
    pub class: PriorityClass,
}

impl RouteKey {
    pub fn new(stream_id: StreamId, class: PriorityClass) -> Self {
        Self { stream_id, class }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stream_id, self.class)
    }
}
