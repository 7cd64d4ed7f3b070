//! # cadence-core
//!
//! Core types, configuration, and error handling for Cadence.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
