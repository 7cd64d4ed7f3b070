//! # cadence-audio
//!
//! Portable audio buffering and playback state machine.
//!
//! Features:
//! - One ring buffer with start/stop hysteresis, shared by every backend
//! - Automatic underrun and overrun recovery
//! - Thin device adapters: in-memory, and cpal output behind the `cpal` feature

pub mod buffer;
pub mod device;
pub mod memory;
#[cfg(feature = "cpal")]
pub mod output;
pub mod playback;
pub mod session;

pub use device::{AudioDevice, Delivery};
pub use memory::{MemoryDevice, MemoryProbe};
#[cfg(feature = "cpal")]
pub use output::CpalDevice;
pub use playback::{AudioRingBuffer, QueueOutcome, RingConsumer, RingStats};
pub use session::AudioSession;
