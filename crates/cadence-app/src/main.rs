//! # Cadence
//!
//! Plays a test tone through the Cadence audio core, either on a real output
//! device or headless against an in-memory device.

mod tone;

use anyhow::{bail, Context, Result};
use cadence_audio::{AudioDevice, AudioSession, MemoryDevice, QueueOutcome, RingConsumer};
use cadence_core::{AudioFormat, SampleFormat, SessionConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tone::{ToneGenerator, ToneSample};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often buffer health is logged.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Longest wait for the queue to play out after the last block.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "cadence", version, about = "Play a test tone through the Cadence audio core")]
struct Args {
    /// JSON session config (watermarks, reinit policy)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output device name; the default device when omitted
    #[arg(long)]
    device: Option<String>,

    /// Fail instead of using the default device when --device is not found
    #[arg(long)]
    no_fallback: bool,

    /// Run against an in-memory device drained in real time
    #[arg(long)]
    headless: bool,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,

    /// Playback length in seconds
    #[arg(long, default_value_t = 3.0)]
    seconds: f32,

    /// Frames generated per queue call, in milliseconds
    #[arg(long, default_value_t = 10)]
    block_ms: u32,

    /// Sample format: i16 or f32
    #[arg(long, default_value = "i16")]
    format: String,

    #[arg(long, default_value_t = 2)]
    channels: u16,

    #[arg(long, default_value_t = 48000)]
    sample_rate: u32,

    /// Speaker layout bitmask, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_channel_mask)]
    channel_mask: Option<u32>,

    /// Output volume (0.0 to 1.0)
    #[arg(long, default_value_t = 0.2)]
    volume: f32,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info,cadence_audio=info".into()),
        )
        .init();

    info!("Starting Cadence v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    if args.list_devices {
        return list_devices();
    }

    let config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    debug!("Session config: {:?}", config);

    let sample_format = SampleFormat::from_name(&args.format)?;
    let mut format = AudioFormat::new(sample_format, args.channels, args.sample_rate);
    if let Some(mask) = args.channel_mask {
        format = format.with_channel_mask(mask);
    }
    format.validate()?;

    if args.block_ms == 0 {
        bail!("--block-ms must be at least 1");
    }

    if args.headless {
        run_headless(&args, format, &config)
    } else {
        run_device(&args, format, &config)
    }
}

#[cfg(feature = "cpal")]
fn list_devices() -> Result<()> {
    let default = cadence_audio::output::default_device_name();
    for name in cadence_audio::output::list_output_devices()? {
        let marker = if default.as_deref() == Some(name.as_str()) { " (default)" } else { "" };
        println!("{name}{marker}");
    }
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn list_devices() -> Result<()> {
    bail!("built without device output; rebuild with the `cpal` feature")
}

#[cfg(feature = "cpal")]
fn run_device(args: &Args, format: AudioFormat, config: &SessionConfig) -> Result<()> {
    use cadence_audio::CpalDevice;

    let mut session = AudioSession::with_device(format, config, |consumer| {
        CpalDevice::open(format, args.device.as_deref(), !args.no_fallback, consumer)
    })?;
    play(&mut session, args, config);
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn run_device(args: &Args, format: AudioFormat, config: &SessionConfig) -> Result<()> {
    warn!("Built without device output, running headless");
    run_headless(args, format, config)
}

fn run_headless(args: &Args, format: AudioFormat, config: &SessionConfig) -> Result<()> {
    let mut session = AudioSession::new(MemoryDevice::callback(), format, config)?;

    let done = Arc::new(AtomicBool::new(false));
    let drain = spawn_realtime_drain(session.consumer(), format, args.block_ms, Arc::clone(&done))?;

    play(&mut session, args, config);

    done.store(true, Ordering::Release);
    if drain.join().is_err() {
        warn!("Drain thread panicked");
    }
    Ok(())
}

/// Stand-in for a hardware callback: drains one block every `block_ms`.
fn spawn_realtime_drain(
    consumer: RingConsumer,
    format: AudioFormat,
    block_ms: u32,
    done: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let block_frames = frames_for_ms(format.sample_rate, block_ms);
    let mut out = vec![0u8; block_frames * consumer.frame_size()];

    thread::Builder::new()
        .name("cadence-drain".to_string())
        .spawn(move || {
            let period = Duration::from_millis(u64::from(block_ms));
            while !done.load(Ordering::Acquire) {
                consumer.drain(&mut out);
                thread::sleep(period);
            }
        })
        .context("Failed to spawn drain thread")
}

fn play<D: AudioDevice>(session: &mut AudioSession<D>, args: &Args, config: &SessionConfig) {
    match session.format().sample_format {
        SampleFormat::I16 => play_tone::<D, i16>(session, args, config),
        SampleFormat::F32 => play_tone::<D, f32>(session, args, config),
    }
}

fn play_tone<D: AudioDevice, S: ToneSample>(
    session: &mut AudioSession<D>,
    args: &Args,
    config: &SessionConfig,
) {
    let format = *session.format();
    let block_frames = frames_for_ms(format.sample_rate, args.block_ms);
    let total_frames = (args.seconds.max(0.0) * format.sample_rate as f32) as u64;
    let block_period = Duration::from_millis(u64::from(args.block_ms));

    // Stay comfortably between the watermarks
    let target_ms = (config.min_buffer_ms * 2)
        .max(args.block_ms * 2)
        .min(config.max_buffer_ms);

    let mut tone =
        ToneGenerator::new(args.frequency, format.sample_rate, format.channels, args.volume);
    let mut block: Vec<S> = Vec::with_capacity(block_frames * usize::from(format.channels));

    info!(
        "Playing {} Hz for {:.1}s in {} ms blocks, target buffer {} ms",
        args.frequency, args.seconds, args.block_ms, target_ms
    );

    let mut sent = 0u64;
    let mut last_report = Instant::now();

    while sent < total_frames {
        tone.fill(block_frames, &mut block);

        match session.queue_samples(&block) {
            QueueOutcome::Queued => {}
            QueueOutcome::Dropped => debug!("Block dropped"),
            QueueOutcome::DeviceUnavailable => {
                warn!("Audio device unavailable, retrying in {} ms", args.block_ms);
                thread::sleep(block_period);
            }
        }
        sent += block_frames as u64;

        // A stalled device never drains; the next queue call detects it
        let pace_deadline = Instant::now() + block_period * 2;
        while session.is_playing()
            && session.queued_ms() > target_ms
            && Instant::now() < pace_deadline
        {
            thread::sleep(Duration::from_millis(1));
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            let stats = session.stats();
            info!(
                "queued {} ms, playing {}, underruns {}, overruns {}, dropped {} frames",
                session.queued_ms(),
                session.is_playing(),
                stats.underruns,
                stats.overruns,
                stats.dropped_frames
            );
            last_report = Instant::now();
        }
    }

    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while session.is_playing() && session.queued_ms() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    session.reset();

    let stats = session.stats();
    info!(
        "Done: {} frames queued, {} starts, {} resets, {} underruns, {} overruns, {} dropped",
        stats.queued_frames_total,
        stats.starts,
        stats.resets,
        stats.underruns,
        stats.overruns,
        stats.dropped_frames
    );
}

fn frames_for_ms(sample_rate: u32, ms: u32) -> usize {
    ((u64::from(sample_rate) * u64::from(ms)) / 1000).max(1) as usize
}

fn parse_channel_mask(value: &str) -> std::result::Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid channel mask '{value}': {e}"))
}
