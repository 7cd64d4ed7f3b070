//! Buffering and playback state machine shared by every device backend.
//!
//! Each [`AudioRingBuffer::queue`] call decides, in order, whether to flush a
//! playing buffer (underrun or overrun), whether the new frames fit, and
//! whether enough audio is buffered to start the device.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::buffer::ByteRing;
use crate::device::{AudioDevice, Delivery};
use cadence_core::{AudioFormat, PcmSample, Result, RingBufferConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Result of a single enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// The frames were copied into the ring.
    Queued,
    /// The frames did not fit and were discarded.
    Dropped,
    /// The device could not be recovered; nothing was queued.
    DeviceUnavailable,
}

/// Producer-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Times the device was started.
    pub starts: u64,
    /// Times playback was stopped by a reset.
    pub resets: u64,
    /// Resets caused by the queue running dry while playing.
    pub underruns: u64,
    /// Resets caused by exceeding the high watermark while playing.
    pub overruns: u64,
    /// Frames discarded because they did not fit.
    pub dropped_frames: u64,
    /// Frames accepted into the ring since creation.
    pub queued_frames_total: u64,
}

/// State shared between the enqueuing thread and the device callback.
struct RingState {
    storage: ByteRing,
    queued_frames: u32,
    playing: bool,
    frames_consumed: u64,
}

/// Fixed-capacity PCM ring with low/high watermarks.
///
/// The ring never owns a device handle; every operation that may start or
/// stop playback borrows the device for the duration of the call.
pub struct AudioRingBuffer {
    format: AudioFormat,
    config: RingBufferConfig,
    shared: Arc<Mutex<RingState>>,
    stats: RingStats,
    /// Reused for sample-to-byte conversion.
    sample_bytes: Vec<u8>,
    /// Reused for staging write-through flushes.
    flush_bytes: Vec<u8>,
}

impl AudioRingBuffer {
    /// Create a ring holding one second of `format` audio.
    ///
    /// # Panics
    /// Panics if the format has no channels or a zero sample rate.
    pub fn new(format: AudioFormat, min_buffer_ms: u32, max_buffer_ms: u32) -> Self {
        let config = RingBufferConfig::new(&format, min_buffer_ms, max_buffer_ms);

        debug!(
            "Ring buffer: {} frames x {} bytes, start at {} frames, flush above {} frames",
            config.capacity_frames,
            config.frame_size,
            config.min_buffer_frames,
            config.max_buffer_frames
        );

        Self {
            format,
            config,
            shared: Arc::new(Mutex::new(RingState {
                storage: ByteRing::new(config.capacity_bytes()),
                queued_frames: 0,
                playing: false,
                frames_consumed: 0,
            })),
            stats: RingStats::default(),
            sample_bytes: Vec::new(),
            flush_bytes: Vec::new(),
        }
    }

    pub const fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub const fn config(&self) -> &RingBufferConfig {
        &self.config
    }

    pub const fn stats(&self) -> RingStats {
        self.stats
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().playing
    }

    /// Frames buffered in the ring and not yet consumed.
    pub fn queued_frames(&self) -> u32 {
        self.shared.lock().queued_frames
    }

    /// Frames drained by the consumer since creation.
    pub fn frames_consumed(&self) -> u64 {
        self.shared.lock().frames_consumed
    }

    /// Queued duration in milliseconds, rounded to nearest.
    pub fn queued_ms(&self) -> u32 {
        self.config.frames_to_ms(self.queued_frames())
    }

    /// Handle for the device callback that drains this ring.
    pub fn consumer(&self) -> RingConsumer {
        RingConsumer {
            shared: Arc::clone(&self.shared),
            frame_size: self.config.frame_size as usize,
        }
    }

    /// Enqueue interleaved frames given as native-endian bytes.
    ///
    /// Device errors are returned untouched; the ring state is left as it was
    /// at the failing step and the caller is expected to [`reset`](Self::reset).
    ///
    /// # Panics
    /// Panics if `frames` is not a whole number of frames.
    pub fn queue<D: AudioDevice + ?Sized>(
        &mut self,
        device: &mut D,
        frames: &[u8],
    ) -> Result<QueueOutcome> {
        let frame_size = self.config.frame_size as usize;
        assert!(
            frames.len() % frame_size == 0,
            "{} bytes is not a whole number of {frame_size}-byte frames",
            frames.len()
        );
        let frame_count = (frames.len() / frame_size) as u32;

        let backlog = device.hardware_backlog()?;
        let (software_queued, playing) = {
            let state = self.shared.lock();
            (state.queued_frames, state.playing)
        };
        let mut queued = software_queued.saturating_add(backlog);

        // Stop playing and flush if we've exceeded the maximum buffer or underrun
        if playing && (queued > self.config.max_buffer_frames || queued == 0) {
            if queued == 0 {
                self.stats.underruns += 1;
                debug!("Underrun, resetting playback");
            } else {
                self.stats.overruns += 1;
                debug!(
                    "Overrun: {} frames queued, limit {}",
                    queued, self.config.max_buffer_frames
                );
            }
            self.reset(device);
            queued = 0;
        }

        let outcome = {
            let mut state = self.shared.lock();
            let fits = frames.len() <= self.config.capacity_bytes()
                && frames.len() <= state.storage.free();
            if fits {
                state.storage.write(frames);
                state.queued_frames += frame_count;
                QueueOutcome::Queued
            } else {
                QueueOutcome::Dropped
            }
        };

        let accepted = if outcome == QueueOutcome::Queued {
            self.stats.queued_frames_total += u64::from(frame_count);
            frame_count
        } else {
            self.stats.dropped_frames += u64::from(frame_count);
            trace!("Dropped {} frames, ring cannot hold them", frame_count);
            0
        };

        // Begin playing again when the minimum buffer has been reached
        if !self.is_playing() && queued.saturating_add(accepted) >= self.config.min_buffer_frames {
            self.start(device)?;
        }

        if device.delivery() == Delivery::WriteThrough && self.is_playing() {
            self.flush(device)?;
        }

        Ok(outcome)
    }

    /// Enqueue interleaved samples.
    ///
    /// # Panics
    /// Panics if `S` does not match the ring's sample format or `samples`
    /// is not a whole number of frames.
    pub fn queue_samples<S: PcmSample, D: AudioDevice + ?Sized>(
        &mut self,
        device: &mut D,
        samples: &[S],
    ) -> Result<QueueOutcome> {
        assert_eq!(
            S::FORMAT,
            self.format.sample_format,
            "sample type does not match the ring's format"
        );

        let mut bytes = std::mem::take(&mut self.sample_bytes);
        bytes.clear();
        for &sample in samples {
            sample.append_ne_bytes(&mut bytes);
        }

        let result = self.queue(device, &bytes);
        self.sample_bytes = bytes;
        result
    }

    /// Stop playback and discard everything queued. Idempotent.
    pub fn reset<D: AudioDevice + ?Sized>(&mut self, device: &mut D) {
        let was_playing = {
            let mut state = self.shared.lock();
            let was_playing = state.playing;
            state.playing = false;
            state.queued_frames = 0;
            state.storage.clear();
            was_playing
        };

        if was_playing {
            self.stats.resets += 1;
            if let Err(e) = device.stop() {
                warn!("Failed to stop {}: {e}", device.name());
            }
        }
    }

    pub(crate) fn note_underrun(&mut self) {
        self.stats.underruns += 1;
    }

    fn start<D: AudioDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        device.start()?;
        self.shared.lock().playing = true;
        self.stats.starts += 1;
        debug!("Playback started on {}", device.name());
        Ok(())
    }

    /// Hand staged frames to a write-through device and consume what it took.
    fn flush<D: AudioDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        let frame_size = self.config.frame_size as usize;

        let mut staged = std::mem::take(&mut self.flush_bytes);
        {
            let state = self.shared.lock();
            let (first, second) = state.storage.readable();
            staged.clear();
            staged.extend_from_slice(first);
            staged.extend_from_slice(second);
        }

        let written = if staged.is_empty() {
            Ok(0)
        } else {
            device.write_raw(&staged)
        };
        self.flush_bytes = staged;

        let frames = written?.min(self.queued_frames() as usize);
        if frames > 0 {
            let mut state = self.shared.lock();
            state.storage.skip(frames * frame_size);
            state.queued_frames -= frames as u32;
            state.frames_consumed += frames as u64;
            trace!("Wrote {} frames to {}", frames, device.name());
        }

        Ok(())
    }
}

/// Consumer handle for a device callback thread.
#[derive(Clone)]
pub struct RingConsumer {
    shared: Arc<Mutex<RingState>>,
    frame_size: usize,
}

impl RingConsumer {
    /// Fill `out` with queued frames, oldest first.
    ///
    /// Only whole frames are drained, and only while playing; whatever is
    /// left of `out` is filled with silence. Returns the bytes drained.
    pub fn drain(&self, out: &mut [u8]) -> usize {
        let whole = out.len() - out.len() % self.frame_size;

        let drained = {
            let mut state = self.shared.lock();
            if state.playing {
                let drained = state.storage.read(&mut out[..whole]);
                let frames = drained / self.frame_size;
                state.queued_frames -= frames as u32;
                state.frames_consumed += frames as u64;
                drained
            } else {
                0
            }
        };

        out[drained..].fill(0);
        drained
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().playing
    }

    pub fn queued_frames(&self) -> u32 {
        self.shared.lock().queued_frames
    }

    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDevice;
    use cadence_core::{Error, SampleFormat};
    use proptest::prelude::*;

    fn stereo_i16(rate: u32) -> AudioFormat {
        AudioFormat::new(SampleFormat::I16, 2, rate)
    }

    fn frames(count: usize) -> Vec<u8> {
        vec![1u8; count * 4]
    }

    #[test]
    fn test_initial_state() {
        let ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);

        assert!(!ring.is_playing());
        assert_eq!(ring.queued_frames(), 0);
        assert_eq!(ring.queued_ms(), 0);
        assert_eq!(ring.config().capacity_frames, 48000);
    }

    #[test]
    fn test_start_threshold() {
        let mut device = MemoryDevice::callback();
        let probe = device.probe();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);
        let min = ring.config().min_buffer_frames as usize;
        assert_eq!(min, 480);

        ring.queue(&mut device, &frames(min - 1)).unwrap();
        assert!(!ring.is_playing());
        assert_eq!(probe.start_count(), 0);

        ring.queue(&mut device, &frames(1)).unwrap();
        assert!(ring.is_playing());
        assert_eq!(probe.start_count(), 1);
        assert_eq!(ring.queued_frames(), 480);
    }

    #[test]
    fn test_cd_quality_scenario() {
        let mut device = MemoryDevice::callback();
        let format = stereo_i16(44100);
        let mut ring = AudioRingBuffer::new(format, 20, 1000);

        ring.queue(&mut device, &frames(900)).unwrap();
        assert!(ring.is_playing());
        assert_eq!(ring.queued_frames(), 900);
    }

    #[test]
    fn test_overrun_resets_before_copy() {
        let mut device = MemoryDevice::callback();
        let probe = device.probe();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 20);

        ring.queue(&mut device, &frames(500)).unwrap();
        ring.queue(&mut device, &frames(500)).unwrap();
        assert!(ring.is_playing());
        assert_eq!(ring.queued_frames(), 1000);

        // 1000 > 960: flushed before the (empty) new data is applied
        ring.queue(&mut device, &[]).unwrap();
        assert!(!ring.is_playing());
        assert_eq!(ring.queued_frames(), 0);
        assert_eq!(probe.stop_count(), 1);
        assert_eq!(ring.stats().overruns, 1);

        ring.queue(&mut device, &frames(100)).unwrap();
        assert!(!ring.is_playing());
        assert_eq!(ring.queued_frames(), 100);
    }

    #[test]
    fn test_underrun_resets_then_restarts() {
        let mut device = MemoryDevice::callback();
        let probe = device.probe();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);
        let consumer = ring.consumer();

        ring.queue(&mut device, &frames(480)).unwrap();
        assert!(ring.is_playing());

        let mut out = vec![0u8; 480 * 4];
        assert_eq!(consumer.drain(&mut out), 480 * 4);
        assert_eq!(ring.queued_frames(), 0);

        ring.queue(&mut device, &frames(100)).unwrap();
        assert_eq!(ring.stats().underruns, 1);
        assert_eq!(probe.stop_count(), 1);
        assert!(!ring.is_playing());
        assert_eq!(ring.queued_frames(), 100);

        ring.queue(&mut device, &frames(380)).unwrap();
        assert!(ring.is_playing());
        assert_eq!(probe.start_count(), 2);
    }

    #[test]
    fn test_queued_ms_rounds_to_nearest() {
        let mut device = MemoryDevice::callback();

        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 100, 1000);
        ring.queue(&mut device, &frames(48)).unwrap();
        assert_eq!(ring.queued_ms(), 1);

        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 100, 1000);
        ring.queue(&mut device, &frames(24)).unwrap();
        assert_eq!(ring.queued_ms(), 1);
    }

    #[test]
    fn test_oversize_is_dropped() {
        let mut device = MemoryDevice::callback();
        let mut ring = AudioRingBuffer::new(stereo_i16(8000), 10, 1000);

        ring.queue(&mut device, &frames(10)).unwrap();
        let outcome = ring.queue(&mut device, &frames(8001)).unwrap();

        assert_eq!(outcome, QueueOutcome::Dropped);
        assert_eq!(ring.queued_frames(), 10);
        assert_eq!(ring.stats().dropped_frames, 8001);
    }

    #[test]
    fn test_frames_beyond_free_space_are_dropped() {
        let mut device = MemoryDevice::callback();
        // Start threshold above capacity keeps the ring filling up
        let mut ring = AudioRingBuffer::new(stereo_i16(8000), 2000, 2000);

        assert_eq!(ring.queue(&mut device, &frames(6000)).unwrap(), QueueOutcome::Queued);
        assert_eq!(ring.queue(&mut device, &frames(3000)).unwrap(), QueueOutcome::Dropped);
        assert_eq!(ring.queued_frames(), 6000);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut device = MemoryDevice::callback();
        let probe = device.probe();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);
        ring.queue(&mut device, &frames(600)).unwrap();

        ring.reset(&mut device);
        assert!(!ring.is_playing());
        assert_eq!(ring.queued_frames(), 0);

        ring.reset(&mut device);
        assert!(!ring.is_playing());
        assert_eq!(ring.queued_frames(), 0);
        assert_eq!(probe.stop_count(), 1);
        assert_eq!(ring.stats().resets, 1);
    }

    #[test]
    fn test_consumer_drains_in_order_and_pads_silence() {
        let mut device = MemoryDevice::callback();
        let mut ring = AudioRingBuffer::new(AudioFormat::new(SampleFormat::I16, 1, 8000), 0, 1000);
        let consumer = ring.consumer();

        ring.queue_samples(&mut device, &[1i16, 2, 3]).unwrap();
        assert!(ring.is_playing());

        // Room for four frames plus one stray byte
        let mut out = [0xAAu8; 9];
        assert_eq!(consumer.drain(&mut out), 6);
        assert_eq!(i16::from_ne_slice(&out[0..2]), 1);
        assert_eq!(i16::from_ne_slice(&out[4..6]), 3);
        assert!(out[6..].iter().all(|&b| b == 0));
        assert_eq!(ring.frames_consumed(), 3);
    }

    #[test]
    fn test_consumer_is_silent_until_started() {
        let mut device = MemoryDevice::callback();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);
        let consumer = ring.consumer();

        ring.queue(&mut device, &frames(100)).unwrap();
        let mut out = [0xFFu8; 16];
        assert_eq!(consumer.drain(&mut out), 0);
        assert_eq!(out, [0u8; 16]);
        assert_eq!(ring.queued_frames(), 100);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn test_queue_samples_rejects_wrong_type() {
        let mut device = MemoryDevice::callback();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);
        let _ = ring.queue_samples(&mut device, &[0.0f32, 0.0]);
    }

    #[test]
    #[should_panic(expected = "whole number")]
    fn test_queue_rejects_partial_frame() {
        let mut device = MemoryDevice::callback();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);
        let _ = ring.queue(&mut device, &[0u8; 6]);
    }

    #[test]
    fn test_write_through_flushes_to_device() {
        let mut device = MemoryDevice::write_through(1000, 4);
        let probe = device.probe();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);

        ring.queue(&mut device, &frames(300)).unwrap();
        assert!(!ring.is_playing());
        assert_eq!(probe.hardware_backlog(), 0);

        ring.queue(&mut device, &frames(300)).unwrap();
        assert!(ring.is_playing());
        assert_eq!(ring.queued_frames(), 0);
        assert_eq!(probe.hardware_backlog(), 600);
        assert_eq!(probe.written_bytes().len(), 600 * 4);

        // Hardware holds only 1000 frames; the rest stays staged
        ring.queue(&mut device, &frames(500)).unwrap();
        assert_eq!(probe.hardware_backlog(), 1000);
        assert_eq!(ring.queued_frames(), 100);
    }

    #[test]
    fn test_write_through_underrun_detected_from_backlog() {
        let mut device = MemoryDevice::write_through(48000, 4);
        let probe = device.probe();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);

        ring.queue(&mut device, &frames(480)).unwrap();
        assert!(ring.is_playing());

        probe.play_frames(480);
        ring.queue(&mut device, &frames(10)).unwrap();
        assert_eq!(ring.stats().underruns, 1);
        assert!(!ring.is_playing());
        assert_eq!(ring.queued_frames(), 10);
    }

    #[test]
    fn test_device_error_is_propagated() {
        let mut device = MemoryDevice::write_through(48000, 4);
        let probe = device.probe();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 0, 100);

        probe.fail_next_write(Error::Underrun);
        let err = ring.queue(&mut device, &frames(10)).unwrap_err();
        assert!(err.is_underrun());
    }

    #[test]
    fn test_failed_start_keeps_ring_stopped() {
        let mut device = MemoryDevice::callback();
        let probe = device.probe();
        let mut ring = AudioRingBuffer::new(stereo_i16(48000), 10, 100);

        probe.fail_next_start(Error::AudioOutput("busy".into()));
        assert!(ring.queue(&mut device, &frames(480)).is_err());
        assert!(!ring.is_playing());
        assert_eq!(ring.queued_frames(), 480);

        ring.queue(&mut device, &[]).unwrap();
        assert!(ring.is_playing());
    }

    proptest! {
        #[test]
        fn prop_queued_never_exceeds_capacity(
            ops in prop::collection::vec((0usize..12_000, 0usize..12_000), 1..40),
            min_ms in 0u32..200,
            extra_ms in 0u32..1500,
        ) {
            let mut device = MemoryDevice::callback();
            let mut ring = AudioRingBuffer::new(stereo_i16(8000), min_ms, min_ms + extra_ms);
            let consumer = ring.consumer();
            let capacity = ring.config().capacity_frames;

            for (queue_frames, drain_frames) in ops {
                ring.queue(&mut device, &frames(queue_frames)).unwrap();
                prop_assert!(ring.queued_frames() <= capacity);

                let mut out = vec![0u8; drain_frames * 4];
                consumer.drain(&mut out);
                prop_assert!(ring.queued_frames() <= capacity);
            }
        }

        #[test]
        fn prop_queued_ms_matches_rounded_division(count in 0usize..48_000) {
            let mut device = MemoryDevice::callback();
            let mut ring = AudioRingBuffer::new(stereo_i16(48000), 2000, 2000);
            ring.queue(&mut device, &frames(count)).unwrap();

            let expected = (count as f64 / 48.0).round() as u32;
            prop_assert_eq!(ring.queued_ms(), expected);
        }
    }
}
