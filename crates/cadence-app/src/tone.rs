//! Sine tone source.

use cadence_core::PcmSample;
use std::f32::consts::TAU;

/// A sample type the tone generator can produce.
pub trait ToneSample: PcmSample {
    /// Convert from the `-1.0..=1.0` range.
    fn from_unit(value: f32) -> Self;
}

impl ToneSample for i16 {
    fn from_unit(value: f32) -> Self {
        (value.clamp(-1.0, 1.0) * f32::from(Self::MAX)) as Self
    }
}

impl ToneSample for f32 {
    fn from_unit(value: f32) -> Self {
        value.clamp(-1.0, 1.0)
    }
}

/// Continuous sine wave written to every channel of each frame.
pub struct ToneGenerator {
    phase: f32,
    step: f32,
    volume: f32,
    channels: usize,
}

impl ToneGenerator {
    pub fn new(frequency: f32, sample_rate: u32, channels: u16, volume: f32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / sample_rate as f32,
            volume: volume.clamp(0.0, 1.0),
            channels: usize::from(channels),
        }
    }

    /// Replace `out` with the next `frames` interleaved frames.
    pub fn fill<S: ToneSample>(&mut self, frames: usize, out: &mut Vec<S>) {
        out.clear();
        out.reserve(frames * self.channels);

        for _ in 0..frames {
            let sample = S::from_unit(self.phase.sin() * self.volume);
            out.extend(std::iter::repeat(sample).take(self.channels));
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}
