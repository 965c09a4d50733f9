//! Burstrace - competitive signal arbitration driver
//!
//! The engine lives in `burstrace-engine`; this crate adds the synthetic frame
//! source the simulation binary feeds through it.

pub mod frames;

pub use frames::{FrameSource, Voice, DEFAULT_SAMPLE_RATE_HZ};
