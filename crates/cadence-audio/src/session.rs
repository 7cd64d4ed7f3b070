//! An open audio session: one ring buffer bound to one device.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::device::AudioDevice;
use crate::playback::{AudioRingBuffer, QueueOutcome, RingConsumer, RingStats};
use cadence_core::{AudioFormat, Error, PcmSample, ReinitPolicy, Result, SessionConfig};
use std::mem::ManuallyDrop;
use std::ptr;
use tracing::{debug, error, info, warn};

/// Ring buffer plus the device it feeds.
///
/// Device failures never reach the caller of [`queue`](Self::queue): the
/// session resets playback and, when the device has to be re-created, retries
/// [`AudioDevice::reopen`] according to the configured [`ReinitPolicy`].
pub struct AudioSession<D: AudioDevice> {
    ring: AudioRingBuffer,
    device: D,
    reinit: ReinitPolicy,
}

impl<D: AudioDevice> AudioSession<D> {
    /// Open a session on an already-created device.
    pub fn new(device: D, format: AudioFormat, config: &SessionConfig) -> Result<Self> {
        Self::with_device(format, config, |_| Ok(device))
    }

    /// Open a session whose device needs the ring's consumer handle, as
    /// callback-driven backends do.
    pub fn with_device<F>(format: AudioFormat, config: &SessionConfig, open: F) -> Result<Self>
    where
        F: FnOnce(RingConsumer) -> Result<D>,
    {
        format.validate()?;
        config.validate()?;

        let ring = AudioRingBuffer::new(format, config.min_buffer_ms, config.max_buffer_ms);
        let device = open(ring.consumer())?;

        info!(
            "Audio session opened on {}: {:?} x{} @ {} Hz, buffer {}-{} ms",
            device.name(),
            format.sample_format,
            format.channels,
            format.sample_rate,
            config.min_buffer_ms,
            config.max_buffer_ms
        );

        Ok(Self {
            ring,
            device,
            reinit: config.reinit,
        })
    }

    /// Enqueue interleaved native-endian frames.
    pub fn queue(&mut self, frames: &[u8]) -> QueueOutcome {
        self.queue_with(|ring, device| ring.queue(device, frames))
    }

    /// Enqueue interleaved samples.
    pub fn queue_samples<S: PcmSample>(&mut self, samples: &[S]) -> QueueOutcome {
        self.queue_with(|ring, device| ring.queue_samples(device, samples))
    }

    /// Stop playback and discard everything queued.
    pub fn reset(&mut self) {
        self.ring.reset(&mut self.device);
    }

    /// Queued duration in milliseconds, including any hardware backlog.
    pub fn queued_ms(&self) -> u32 {
        let backlog = self.device.hardware_backlog().unwrap_or_else(|e| {
            debug!("Could not query hardware backlog: {e}");
            0
        });
        self.ring
            .config()
            .frames_to_ms(self.ring.queued_frames().saturating_add(backlog))
    }

    pub fn is_playing(&self) -> bool {
        self.ring.is_playing()
    }

    pub const fn stats(&self) -> RingStats {
        self.ring.stats()
    }

    pub const fn format(&self) -> &AudioFormat {
        self.ring.format()
    }

    pub const fn ring(&self) -> &AudioRingBuffer {
        &self.ring
    }

    pub fn consumer(&self) -> RingConsumer {
        self.ring.consumer()
    }

    pub const fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Stop playback and hand the device back, discarding the ring.
    pub fn into_device(mut self) -> D {
        self.ring.reset(&mut self.device);

        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so each field is moved out exactly once
        #[allow(unsafe_code)]
        let (ring, device) = unsafe { (ptr::read(&this.ring), ptr::read(&this.device)) };
        drop(ring);
        device
    }

    fn queue_with<F>(&mut self, op: F) -> QueueOutcome
    where
        F: Fn(&mut AudioRingBuffer, &mut D) -> Result<QueueOutcome>,
    {
        let err = match op(&mut self.ring, &mut self.device) {
            Ok(outcome) => return outcome,
            Err(e) => e,
        };

        self.ring.reset(&mut self.device);

        if err.is_underrun() {
            self.ring.note_underrun();
            debug!("{} reported an underrun, playback reset", self.device.name());
            return QueueOutcome::Dropped;
        }

        if !err.requires_reopen() {
            warn!("Audio device error: {err}");
            return QueueOutcome::DeviceUnavailable;
        }

        warn!("{err}. Re-initializing {}", self.device.name());
        if let Err(e) = self.reinit_device() {
            error!("Failed to re-initialize audio device: {e}");
            return QueueOutcome::DeviceUnavailable;
        }

        match op(&mut self.ring, &mut self.device) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ring.reset(&mut self.device);
                error!("Audio device failed again after re-initialization: {e}");
                QueueOutcome::DeviceUnavailable
            }
        }
    }

    fn reinit_device(&mut self) -> Result<()> {
        let mut last_error = None;

        // When the default device is in the middle of changing this can fail a few times
        for attempt in 1..=self.reinit.max_tries {
            match self.device.reopen() {
                Ok(()) => {
                    info!("Re-initialized {} (attempt {attempt})", self.device.name());
                    return Ok(());
                }
                Err(e) => {
                    debug!("Reopen attempt {attempt} failed: {e}");
                    last_error = Some(e);
                }
            }

            if attempt < self.reinit.max_tries {
                std::thread::sleep(self.reinit.delay());
            }
        }

        Err(last_error.unwrap_or_else(|| Error::DeviceLost("no reopen attempts made".to_string())))
    }
}

impl<D: AudioDevice> Drop for AudioSession<D> {
    fn drop(&mut self) {
        self.ring.reset(&mut self.device);
    }
}
