//! Audio output using cpal.

use crate::device::{AudioDevice, Delivery};
use crate::playback::RingConsumer;
use cadence_core::{AudioFormat, Error, PcmSample, Result, SampleFormat};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, Stream, StreamConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Callback-driven output device on top of a cpal stream.
pub struct CpalDevice {
    stream: Stream,
    device_name: String,
    format: AudioFormat,
    requested_device: Option<String>,
    fallback: bool,
    consumer: RingConsumer,
    /// Set by the stream's error callback when the device disappears.
    lost: Arc<AtomicBool>,
}

impl CpalDevice {
    /// Open an output stream on the named device, or the default device when
    /// `device_name` is `None`. With `fallback`, a missing named device falls
    /// back to the default one.
    ///
    /// The stream is created paused; the ring buffer starts it once enough
    /// audio is queued.
    pub fn open(
        format: AudioFormat,
        device_name: Option<&str>,
        fallback: bool,
        consumer: RingConsumer,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_device(&host, device_name, fallback)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {name}");

        if let Some(mask) = format.channel_mask {
            // cpal has no channel map API; the device's default layout is used
            debug!("Ignoring channel mask {mask:#x} on {name}");
        }

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        debug!(
            "Output config: {}Hz, {} channels, {:?}",
            format.sample_rate, format.channels, format.sample_format
        );

        let lost = Arc::new(AtomicBool::new(false));
        let stream = match format.sample_format {
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, consumer.clone(), Arc::clone(&lost))?
            }
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, consumer.clone(), Arc::clone(&lost))?
            }
        };

        // Some hosts start streams on creation
        if let Err(e) = stream.pause() {
            debug!("Could not pause new stream: {e}");
        }

        Ok(Self {
            stream,
            device_name: name,
            format,
            requested_device: device_name.map(String::from),
            fallback,
            consumer,
            lost,
        })
    }
}

impl AudioDevice for CpalDevice {
    fn start(&mut self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))
    }

    fn stop(&mut self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| Error::AudioOutput(format!("Failed to stop stream: {e}")))
    }

    fn delivery(&self) -> Delivery {
        Delivery::Callback
    }

    fn hardware_backlog(&self) -> Result<u32> {
        if self.lost.load(Ordering::Acquire) {
            return Err(Error::DeviceLost(format!(
                "{} is no longer available",
                self.device_name
            )));
        }
        Ok(0)
    }

    fn reopen(&mut self) -> Result<()> {
        *self = Self::open(
            self.format,
            self.requested_device.as_deref(),
            self.fallback,
            self.consumer.clone(),
        )?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

fn select_device(host: &cpal::Host, name: Option<&str>, fallback: bool) -> Result<Device> {
    if let Some(wanted) = name.filter(|n| !n.is_empty()) {
        let found = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
            .find(|d| d.name().is_ok_and(|n| n == wanted));

        match found {
            Some(device) => return Ok(device),
            None if !fallback => {
                return Err(Error::AudioOutput(format!(
                    "Output device '{wanted}' not found"
                )));
            }
            None => warn!("Output device '{wanted}' not found, using the default device"),
        }
    }

    host.default_output_device()
        .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))
}

fn build_stream<T: PcmSample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    consumer: RingConsumer,
    lost: Arc<AtomicBool>,
) -> Result<Stream> {
    let sample_size = T::FORMAT.bytes_per_sample() as usize;
    let mut scratch: Vec<u8> = Vec::new();

    let err_fn = move |err: cpal::StreamError| {
        error!("Audio stream error: {err}");
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            lost.store(true, Ordering::Release);
        }
    };

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len() * sample_size, 0);
                let drained = consumer.drain(&mut scratch);
                let filled = drained / sample_size;

                let samples = scratch[..drained].chunks_exact(sample_size);
                for (sample, bytes) in data.iter_mut().zip(samples) {
                    *sample = T::from_ne_slice(bytes);
                }
                data[filled..].fill(T::SILENCE);

                if drained > 0 && drained < scratch.len() {
                    trace!("Short callback: needed {} bytes, got {}", scratch.len(), drained);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))?;

    Ok(stream)
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// Get the default output device name.
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device().and_then(|d| d.name().ok())
}
