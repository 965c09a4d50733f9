//! Burstrace Core - Signal types, bounded buffers, configuration, and error handling

pub mod config;
pub mod error;
pub mod pattern;
pub mod ring;
pub mod types;

pub use config::{ArbiterConfig, FocusConfig, RaceConfig, SyncConfig};
pub use error::{Error, Result};
pub use pattern::InterferencePattern;
pub use ring::RingBuffer;
pub use types::*;
