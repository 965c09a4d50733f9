//! Error types for Burstrace

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("race has no candidates")]
    EmptyRace,

    #[error("invalid signal {id}: {reason}")]
    InvalidSignal { id: u64, reason: String },

    #[error("race cancelled before a winner was chosen")]
    Cancelled,

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    pub fn invalid_signal(id: u64, reason: impl Into<String>) -> Self {
        Self::InvalidSignal {
            id,
            reason: reason.into(),
        }
    }

    /// Configuration errors are fatal to the call and never worth retrying.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::EmptyRace)
    }
}
