//! Core domain types for Cadence.

pub mod config;
pub mod format;

pub use config::{ReinitPolicy, SessionConfig, DEFAULT_MAX_BUFFER_MS, DEFAULT_MIN_BUFFER_MS};
pub use format::{AudioFormat, PcmSample, RingBufferConfig, SampleFormat};
