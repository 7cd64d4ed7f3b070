//! In-process audio device with no hardware behind it.
//!
//! Useful for headless runs and for exercising the playback state machine:
//! a [`MemoryProbe`] observes what the session asked of the device, simulates
//! the hardware draining its backlog, and injects failures.

use crate::device::{AudioDevice, Delivery};
use cadence_core::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct MemoryState {
    running: bool,
    start_count: u32,
    stop_count: u32,
    reopen_attempts: u32,
    hw_queued_frames: u32,
    written: Vec<u8>,
    lost: bool,
    failing_reopens: u32,
    next_start_error: Option<Error>,
    next_write_error: Option<Error>,
}

/// Deterministic device backed by memory.
pub struct MemoryDevice {
    delivery: Delivery,
    frame_size: usize,
    hw_capacity_frames: u32,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDevice {
    /// A device drained by a [`crate::RingConsumer`], like a callback-driven backend.
    pub fn callback() -> Self {
        Self {
            delivery: Delivery::Callback,
            frame_size: 1,
            hw_capacity_frames: 0,
            state: Arc::default(),
        }
    }

    /// A device that accepts frames through `write_raw` into a hardware
    /// queue of `hw_capacity_frames`, like a write-through backend.
    pub fn write_through(hw_capacity_frames: u32, frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be non-zero");
        Self {
            delivery: Delivery::WriteThrough,
            frame_size,
            hw_capacity_frames,
            state: Arc::default(),
        }
    }

    /// Observer sharing this device's state.
    pub fn probe(&self) -> MemoryProbe {
        MemoryProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl AudioDevice for MemoryDevice {
    fn start(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(e) = state.next_start_error.take() {
            return Err(e);
        }
        state.running = true;
        state.start_count += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.running = false;
        state.stop_count += 1;
        state.hw_queued_frames = 0;
        Ok(())
    }

    fn delivery(&self) -> Delivery {
        self.delivery
    }

    fn hardware_backlog(&self) -> Result<u32> {
        let state = self.state.lock();
        if state.lost {
            return Err(Error::DeviceLost("memory device marked lost".to_string()));
        }
        Ok(state.hw_queued_frames)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if let Some(e) = state.next_write_error.take() {
            if matches!(e, Error::DeviceLost(_)) {
                state.lost = true;
            }
            return Err(e);
        }
        if state.lost {
            return Err(Error::DeviceLost("memory device marked lost".to_string()));
        }

        let offered = bytes.len() / self.frame_size;
        let room = self.hw_capacity_frames.saturating_sub(state.hw_queued_frames) as usize;
        let accepted = offered.min(room);

        state.hw_queued_frames += accepted as u32;
        state
            .written
            .extend_from_slice(&bytes[..accepted * self.frame_size]);
        Ok(accepted)
    }

    fn reopen(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.reopen_attempts += 1;
        if state.failing_reopens > 0 {
            state.failing_reopens -= 1;
            return Err(Error::DeviceLost("memory device still unavailable".to_string()));
        }

        debug!("Memory device reopened");
        state.lost = false;
        state.running = false;
        state.hw_queued_frames = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Shared view into a [`MemoryDevice`].
#[derive(Clone)]
pub struct MemoryProbe {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryProbe {
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn start_count(&self) -> u32 {
        self.state.lock().start_count
    }

    pub fn stop_count(&self) -> u32 {
        self.state.lock().stop_count
    }

    pub fn reopen_attempts(&self) -> u32 {
        self.state.lock().reopen_attempts
    }

    /// Frames accepted by `write_raw` and not yet played.
    pub fn hardware_backlog(&self) -> u32 {
        self.state.lock().hw_queued_frames
    }

    /// Every byte accepted by `write_raw`, in order.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Simulate the hardware playing up to `frames` frames. Returns frames played.
    pub fn play_frames(&self, frames: u32) -> u32 {
        let mut state = self.state.lock();
        let played = frames.min(state.hw_queued_frames);
        state.hw_queued_frames -= played;
        played
    }

    /// Make the next `start` fail with `error`.
    pub fn fail_next_start(&self, error: Error) {
        self.state.lock().next_start_error = Some(error);
    }

    /// Make the next `write_raw` fail with `error`. A `DeviceLost` error also
    /// marks the device lost until it is reopened.
    pub fn fail_next_write(&self, error: Error) {
        self.state.lock().next_write_error = Some(error);
    }

    /// Mark the device lost until it is reopened.
    pub fn lose_device(&self) {
        self.state.lock().lost = true;
    }

    /// Make the next `count` reopen attempts fail.
    pub fn fail_reopens(&self, count: u32) {
        self.state.lock().failing_reopens = count;
    }
}
