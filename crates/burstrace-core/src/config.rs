//! Arbitration configuration
//!
//! All tunable parameters in one place. Loaded from TOML or JSON at startup,
//! falls back to defaults if no config file exists. Accepts either the nested
//! layout (`sync` / `race` / `focus` sections) or the flat collaborator layout
//! with `inputFrameRateHz`, `referenceBandLowHz`, ... at top level.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level arbitration configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArbiterConfig {
    /// Burst slicing and phase modulation.
    pub sync: SyncConfig,
    /// Delay simulation and race timeout.
    pub race: RaceConfig,
    /// Interference aggregation and focus history.
    pub focus: FocusConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Rate at which input frames arrive. Must be > 0.
    pub input_frame_rate_hz: f64,
    /// Burst rate the synchronizer emits on average.
    pub target_burst_freq_hz: f64,
    /// Slow oscillation that modulates burst amplitude.
    pub modulation_freq_hz: f64,
    /// Emit 2x/3x harmonic satellites on strongly modulated bursts.
    pub phase_alignment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RaceConfig {
    /// Upper bound on how long a race waits for any arrival.
    pub max_wait_ms: u64,
    /// `loadDelay = loadDelayFactor / bandwidth` (ms).
    pub load_delay_factor: f64,
    /// Delay removed per priority class step (ms).
    pub priority_bonus_ms: f64,
    /// Fixed RNG seed for reproducible races; entropy-seeded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FocusConfig {
    pub reference_band_low_hz: f64,
    pub reference_band_high_hz: f64,
    /// Maximum stored patterns before the oldest is evicted.
    pub history_capacity: usize,
}

/// The flat JSON-like shape external collaborators send.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FlatConfig {
    input_frame_rate_hz: f64,
    target_burst_freq_hz: f64,
    modulation_freq_hz: f64,
    phase_alignment: bool,
    reference_band_low_hz: f64,
    reference_band_high_hz: f64,
}

// ============================================================
// Defaults
// ============================================================

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            race: RaceConfig::default(),
            focus: FocusConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            input_frame_rate_hz: 12.5,
            target_burst_freq_hz: 40.0,
            modulation_freq_hz: 6.0,
            phase_alignment: true,
        }
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self { max_wait_ms: 500, load_delay_factor: 100.0, priority_bonus_ms: 2.0, seed: None }
    }
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self { reference_band_low_hz: 30.0, reference_band_high_hz: 50.0, history_capacity: 100 }
    }
}

impl Default for FlatConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        let focus = FocusConfig::default();
        Self {
            input_frame_rate_hz: sync.input_frame_rate_hz,
            target_burst_freq_hz: sync.target_burst_freq_hz,
            modulation_freq_hz: sync.modulation_freq_hz,
            phase_alignment: sync.phase_alignment,
            reference_band_low_hz: focus.reference_band_low_hz,
            reference_band_high_hz: focus.reference_band_high_hz,
        }
    }
}

impl From<FlatConfig> for ArbiterConfig {
    fn from(flat: FlatConfig) -> Self {
        Self {
            sync: SyncConfig {
                input_frame_rate_hz: flat.input_frame_rate_hz,
                target_burst_freq_hz: flat.target_burst_freq_hz,
                modulation_freq_hz: flat.modulation_freq_hz,
                phase_alignment: flat.phase_alignment,
            },
            race: RaceConfig::default(),
            focus: FocusConfig {
                reference_band_low_hz: flat.reference_band_low_hz,
                reference_band_high_hz: flat.reference_band_high_hz,
                ..FocusConfig::default()
            },
        }
    }
}

// ============================================================
// Validation
// ============================================================

fn finite_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::invalid_config(format!("{} must be finite and >= 0, got {}", name, value)));
    }
    Ok(())
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.input_frame_rate_hz.is_finite() || self.input_frame_rate_hz <= 0.0 {
            return Err(Error::invalid_config(format!(
                "inputFrameRateHz must be > 0, got {}",
                self.input_frame_rate_hz
            )));
        }
        finite_non_negative("targetBurstFreqHz", self.target_burst_freq_hz)?;
        finite_non_negative("modulationFreqHz", self.modulation_freq_hz)?;
        Ok(())
    }

    /// Exact (fractional) bursts per frame.
    pub fn bursts_per_frame(&self) -> f64 {
        self.target_burst_freq_hz / self.input_frame_rate_hz
    }
}

impl RaceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_wait_ms == 0 {
            return Err(Error::invalid_config("maxWaitMs must be > 0"));
        }
        finite_non_negative("loadDelayFactor", self.load_delay_factor)?;
        finite_non_negative("priorityBonusMs", self.priority_bonus_ms)?;
        Ok(())
    }
}

impl FocusConfig {
    pub fn validate(&self) -> Result<()> {
        finite_non_negative("referenceBandLowHz", self.reference_band_low_hz)?;
        finite_non_negative("referenceBandHighHz", self.reference_band_high_hz)?;
        if self.reference_band_low_hz > self.reference_band_high_hz {
            return Err(Error::invalid_config(format!(
                "reference band is inverted: {} > {}",
                self.reference_band_low_hz, self.reference_band_high_hz
            )));
        }
        if self.history_capacity == 0 {
            return Err(Error::invalid_config("historyCapacity must be > 0"));
        }
        Ok(())
    }

    pub fn in_reference_band(&self, frequency: f64) -> bool {
        frequency >= self.reference_band_low_hz && frequency <= self.reference_band_high_hz
    }
}

// ============================================================
// Loading
// ============================================================

impl ArbiterConfig {
    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        self.race.validate()?;
        self.focus.validate()
    }

    /// Load config from a TOML or JSON file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(Error::IoError(_)) => {
                tracing::info!("No config at {} - using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to load {}: {} - using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load and validate, surfacing every failure.
    pub fn try_load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_str_json(&content),
            _ => Self::from_str_toml(&content),
        }
    }

    pub fn from_str_json(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        Self::from_value(value)
    }

    pub fn from_str_toml(content: &str) -> Result<Self> {
        let value: serde_json::Value = toml::from_str(content)?;
        Self::from_value(value)
    }

    fn from_value(value: serde_json::Value) -> Result<Self> {
        let nested = ["sync", "race", "focus"]
            .iter()
            .any(|section| value.get(section).map_or(false, |v| v.is_object()));
        let config = if nested {
            serde_json::from_value::<ArbiterConfig>(value)?
        } else {
            serde_json::from_value::<FlatConfig>(value)?.into()
        };
        config.validate()?;
        Ok(config)
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
