//! Synthetic frame source
//!
//! Produces audio-like frames for driving the arbitration loop without a capture
//! device: a carrier tone under a slow amplitude envelope plus seeded noise, so
//! burst energy (and with it priority class and focus) drifts over time.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;

pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 16_000.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Voice {
    /// Carrier frequency in Hz
    pub carrier_hz: f64,
    /// Peak amplitude before the envelope, 0..=1
    pub level: f64,
    /// Envelope rate in Hz; 0 keeps the level constant
    pub envelope_hz: f64,
    /// Uniform noise amplitude added to every sample
    pub noise: f64,
}

impl Voice {
    /// A distinct voice per stream index so streams compete on different terms.
    pub fn for_stream(index: usize) -> Self {
        let i = index as f64;
        Self {
            carrier_hz: 220.0 * (1.0 + 0.5 * i),
            level: 0.9 - 0.15 * (i % 4.0),
            envelope_hz: 0.3 + 0.2 * i,
            noise: 0.05,
        }
    }
}

pub struct FrameSource {
    voice: Voice,
    sample_rate_hz: f64,
    frame_len: usize,
    sample_index: u64,
    rng: StdRng,
}

impl FrameSource {
    /// `frame_rate_hz` decides the frame length at the given sample rate.
    pub fn new(voice: Voice, sample_rate_hz: f64, frame_rate_hz: f64, seed: u64) -> Self {
        let frame_len = if frame_rate_hz > 0.0 {
            (sample_rate_hz / frame_rate_hz).round().max(1.0) as usize
        } else {
            1
        };
        Self {
            voice,
            sample_rate_hz,
            frame_len,
            sample_index: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn next_frame(&mut self) -> Vec<f32> {
        let mut frame = Vec::with_capacity(self.frame_len);
        for _ in 0..self.frame_len {
            let t = self.sample_index as f64 / self.sample_rate_hz;
            let envelope = 0.5 + 0.5 * (TAU * self.voice.envelope_hz * t).sin();
            let tone = self.voice.level * envelope * (TAU * self.voice.carrier_hz * t).sin();
            let noise = if self.voice.noise > 0.0 {
                self.rng.gen_range(-self.voice.noise..=self.voice.noise)
            } else {
                0.0
            };
            frame.push((tone + noise).clamp(-1.0, 1.0) as f32);
            self.sample_index += 1;
        }
        frame
    }
}

impl Iterator for FrameSource {
    type Item = Vec<f32>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_frame())
    }
}
