//! Session configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default low watermark in milliseconds.
pub const DEFAULT_MIN_BUFFER_MS: u32 = 20;

/// Default high watermark in milliseconds.
pub const DEFAULT_MAX_BUFFER_MS: u32 = 1000;

/// How a lost device is re-created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReinitPolicy {
    /// Attempts before giving up.
    pub max_tries: u32,
    /// Pause between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl ReinitPolicy {
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReinitPolicy {
    fn default() -> Self {
        Self {
            max_tries: 5,
            delay_ms: 100,
        }
    }
}

/// Watermarks and recovery policy for one audio session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Buffered duration required before playback starts.
    pub min_buffer_ms: u32,
    /// Buffered duration above which a playing session is flushed.
    pub max_buffer_ms: u32,
    /// Device re-creation policy.
    pub reinit: ReinitPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_buffer_ms: DEFAULT_MIN_BUFFER_MS,
            max_buffer_ms: DEFAULT_MAX_BUFFER_MS,
            reinit: ReinitPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(min_buffer_ms: u32, max_buffer_ms: u32) -> Self {
        Self {
            min_buffer_ms,
            max_buffer_ms,
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_buffer_ms > self.max_buffer_ms {
            return Err(Error::Config(format!(
                "min_buffer_ms ({}) exceeds max_buffer_ms ({})",
                self.min_buffer_ms, self.max_buffer_ms
            )));
        }
        if self.reinit.max_tries == 0 {
            return Err(Error::Config(
                "reinit.max_tries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
