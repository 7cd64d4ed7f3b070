//! Platform device adapter interface.

use cadence_core::Result;

/// How queued frames leave the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A device callback drains the ring through a [`crate::RingConsumer`].
    Callback,
    /// Staged frames are handed to [`AudioDevice::write_raw`] and the device
    /// reports its own backlog.
    WriteThrough,
}

/// What a platform backend implements to sit under an [`crate::AudioRingBuffer`].
///
/// The ring buffer decides when to start, stop and flush; the device only
/// carries those decisions out.
pub trait AudioDevice {
    /// Begin pulling or consuming audio.
    fn start(&mut self) -> Result<()>;

    /// Stop playback and discard anything the hardware still holds.
    fn stop(&mut self) -> Result<()>;

    /// How this device consumes queued frames.
    fn delivery(&self) -> Delivery {
        Delivery::Callback
    }

    /// Frames the hardware has accepted but not yet played.
    fn hardware_backlog(&self) -> Result<u32> {
        Ok(0)
    }

    /// Hand interleaved frames to the device. Returns the number of whole
    /// frames accepted. Only called for [`Delivery::WriteThrough`] devices.
    fn write_raw(&mut self, bytes: &[u8]) -> Result<usize> {
        let _ = bytes;
        Ok(0)
    }

    /// Re-create the underlying device handle after it was lost.
    fn reopen(&mut self) -> Result<()> {
        Ok(())
    }

    /// Human-readable device name, for logs.
    fn name(&self) -> &str {
        "audio device"
    }
}

impl<D: AudioDevice + ?Sized> AudioDevice for Box<D> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn delivery(&self) -> Delivery {
        (**self).delivery()
    }

    fn hardware_backlog(&self) -> Result<u32> {
        (**self).hardware_backlog()
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<usize> {
        (**self).write_raw(bytes)
    }

    fn reopen(&mut self) -> Result<()> {
        (**self).reopen()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
