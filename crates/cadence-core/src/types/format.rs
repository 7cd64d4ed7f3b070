//! PCM stream format and the buffer geometry derived from it.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Storage type of one PCM sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit integer samples.
    #[default]
    I16,
    /// 32-bit float samples.
    F32,
}

impl SampleFormat {
    /// Size in bytes of one sample of one channel.
    pub const fn bytes_per_sample(&self) -> u32 {
        match self {
            Self::I16 => 2,
            Self::F32 => 4,
        }
    }

    /// Parse from a short name such as `i16` or `f32`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "i16" | "s16" | "int16" => Ok(Self::I16),
            "f32" | "float" | "float32" => Ok(Self::F32),
            other => Err(Error::UnsupportedFormat(format!(
                "unknown sample format '{other}'"
            ))),
        }
    }
}

/// Interleaved PCM format of an audio session. Immutable once a session is open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample storage type.
    #[serde(default)]
    pub sample_format: SampleFormat,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
    /// WAVE-style speaker position bitmask, if the caller cares about layout.
    #[serde(default)]
    pub channel_mask: Option<u32>,
}

impl AudioFormat {
    pub const fn new(sample_format: SampleFormat, channels: u16, sample_rate: u32) -> Self {
        Self {
            sample_format,
            channels,
            sample_rate,
            channel_mask: None,
        }
    }

    /// Attach a channel layout mask.
    pub const fn with_channel_mask(mut self, mask: u32) -> Self {
        self.channel_mask = Some(mask);
        self
    }

    /// Size in bytes of one sample of one channel.
    pub const fn bytes_per_sample(&self) -> u32 {
        self.sample_format.bytes_per_sample()
    }

    /// Size in bytes of one frame (one sample from every channel).
    pub const fn frame_size(&self) -> u32 {
        self.channels as u32 * self.bytes_per_sample()
    }

    /// Check that the format can describe a real stream.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::InvalidArgument(
                "audio format needs at least one channel".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(Error::InvalidArgument(
                "audio format needs a non-zero sample rate".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(SampleFormat::I16, 2, 48000)
    }
}

/// Buffer geometry derived from an [`AudioFormat`] and the min/max watermarks.
///
/// Capacity is always one second of audio at the configured sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferConfig {
    /// Bytes per frame.
    pub frame_size: u32,
    /// Storage capacity in frames.
    pub capacity_frames: u32,
    /// Frames that must be queued before playback starts.
    pub min_buffer_frames: u32,
    /// Queued frames above which a playing buffer is flushed.
    pub max_buffer_frames: u32,
    /// Frames per millisecond, rounded to nearest.
    pub samples_per_ms: u32,
    /// Frames per second.
    pub sample_rate: u32,
}

impl RingBufferConfig {
    /// Derive the buffer geometry.
    ///
    /// # Panics
    /// Panics if the format has no channels or a zero sample rate.
    pub fn new(format: &AudioFormat, min_buffer_ms: u32, max_buffer_ms: u32) -> Self {
        assert!(format.channels > 0, "audio format has no channels");
        assert!(format.sample_rate > 0, "audio format has a zero sample rate");

        let samples_per_ms = (f64::from(format.sample_rate) / 1000.0).round() as u32;

        Self {
            frame_size: format.frame_size(),
            capacity_frames: format.sample_rate,
            min_buffer_frames: min_buffer_ms.saturating_mul(samples_per_ms),
            max_buffer_frames: max_buffer_ms.saturating_mul(samples_per_ms),
            samples_per_ms,
            sample_rate: format.sample_rate,
        }
    }

    /// Storage capacity in bytes.
    pub const fn capacity_bytes(&self) -> usize {
        self.capacity_frames as usize * self.frame_size as usize
    }

    /// Convert a frame count to milliseconds, rounding to nearest.
    pub fn frames_to_ms(&self, frames: u32) -> u32 {
        (f64::from(frames) / (f64::from(self.sample_rate) / 1000.0)).round() as u32
    }
}

/// A sample type that can be stored in a session's byte ring.
pub trait PcmSample: Copy + Send + 'static {
    /// Format tag matching this type.
    const FORMAT: SampleFormat;
    /// Zero-level sample.
    const SILENCE: Self;

    /// Append the native-endian bytes of this sample.
    fn append_ne_bytes(self, out: &mut Vec<u8>);

    /// Read a sample from exactly `FORMAT.bytes_per_sample()` native-endian bytes.
    fn from_ne_slice(bytes: &[u8]) -> Self;
}

impl PcmSample for i16 {
    const FORMAT: SampleFormat = SampleFormat::I16;
    const SILENCE: Self = 0;

    fn append_ne_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }

    fn from_ne_slice(bytes: &[u8]) -> Self {
        Self::from_ne_bytes([bytes[0], bytes[1]])
    }
}

impl PcmSample for f32 {
    const FORMAT: SampleFormat = SampleFormat::F32;
    const SILENCE: Self = 0.0;

    fn append_ne_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }

    fn from_ne_slice(bytes: &[u8]) -> Self {
        Self::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}
