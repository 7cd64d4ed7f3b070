//! Error types for Cadence.

use thiserror::Error;

/// Result type alias using Cadence's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cadence.
#[derive(Error, Debug)]
pub enum Error {
    // Device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Audio device lost: {0}")]
    DeviceLost(String),

    #[error("Audio device underrun")]
    Underrun,

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    // Configuration errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if the device handle has to be re-created before it can
    /// accept audio again.
    pub const fn requires_reopen(&self) -> bool {
        matches!(self, Self::DeviceLost(_) | Self::AudioOutput(_))
    }

    /// Returns true if this is a device-reported underrun.
    pub const fn is_underrun(&self) -> bool {
        matches!(self, Self::Underrun)
    }
}
