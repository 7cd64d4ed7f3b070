//! Byte storage for queued PCM frames.

pub mod ring;

pub use ring::ByteRing;
