//! Audire listener
//!
//! Joins a room by its 6-digit code and plays the host's stream on a local
//! output device.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audire::{
    audio::format::AudioFormat,
    broadcast::join_code,
    config::AppConfig,
    network::{ExitReason, ListenerClient, ListenerSession},
    playback::{NullSink, OutputSink, PlaybackClock, PlaybackScheduler, SystemClock},
};

#[derive(Parser)]
#[command(name = "audire-listener")]
#[command(about = "Join an Audire room and play its audio")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Room channel URL, e.g. ws://192.168.1.10:5551/ws
    #[arg(short, long)]
    server: Option<String>,

    /// 6-digit join code
    #[arg(short = 'j', long)]
    code: Option<String>,

    /// Name shown to the host and other listeners
    #[arg(short, long, default_value = "Listener")]
    name: String,

    /// Output volume, 0.0 to 1.0
    #[arg(short, long)]
    volume: Option<f32>,

    /// Output device name
    #[arg(short, long)]
    output_device: Option<String>,

    /// Receive and schedule without playing audio
    #[arg(long)]
    no_output: bool,

    /// Print output devices and exit
    #[arg(long)]
    list_outputs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.list_outputs {
        list_outputs();
        return Ok(());
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.listener.server_url = server;
    }
    if let Some(volume) = cli.volume {
        config.playback.volume = volume;
    }
    if cli.output_device.is_some() {
        config.playback.output_device = cli.output_device;
    }
    config.validate()?;

    let Some(code) = cli.code else {
        bail!("a join code is required (--code)");
    };
    if !join_code::is_valid(&code) {
        bail!("join code must be exactly 6 digits, got '{}'", code);
    }

    let format = config.capture.format();
    tracing::info!(
        "Starting Audire listener: {} -> room {}",
        config.listener.server_url,
        code
    );

    if cli.no_output {
        let scheduler =
            PlaybackScheduler::new(SystemClock::new(), NullSink::new(), format, &config.playback);
        return run(&config, scheduler, code, cli.name).await;
    }

    play(&config, format, code, cli.name).await
}

#[cfg(feature = "output")]
async fn play(config: &AppConfig, format: AudioFormat, code: String, name: String) -> Result<()> {
    let sink = audire::playback::CpalSink::new(config.playback.output_device.clone(), format);
    let scheduler = PlaybackScheduler::new(sink.clock(), sink, format, &config.playback);
    run(config, scheduler, code, name).await
}

#[cfg(not(feature = "output"))]
async fn play(config: &AppConfig, format: AudioFormat, code: String, name: String) -> Result<()> {
    tracing::warn!("Built without audio output, frames are scheduled but not played");
    let scheduler =
        PlaybackScheduler::new(SystemClock::new(), NullSink::new(), format, &config.playback);
    run(config, scheduler, code, name).await
}

async fn run<C, S>(
    config: &AppConfig,
    scheduler: PlaybackScheduler<C, S>,
    code: String,
    name: String,
) -> Result<()>
where
    C: PlaybackClock,
    S: OutputSink,
{
    let mut session = ListenerSession::new(scheduler, code, name);
    let client = ListenerClient::new(config.listener.clone());

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let reason = client.run(&mut session, shutdown).await?;

    let stats = session.stats();
    tracing::info!(
        "Session ended: {} frames played, {} underruns, {} backlog resets, {} malformed",
        stats.playback.frames_scheduled,
        stats.playback.underruns,
        stats.playback.backlog_resets,
        stats.playback.malformed_frames
    );

    match reason {
        ExitReason::JoinRejected(error) => bail!("could not join room: {}", error),
        ExitReason::RoomClosed { name } => println!("Room '{}' was closed by the host", name),
        ExitReason::ServerShutdown(message) => println!("Host shut down: {}", message),
        ExitReason::Interrupted => {}
    }
    Ok(())
}

#[cfg(feature = "output")]
fn list_outputs() {
    println!("\n=== Output Devices ===");
    for device in audire::audio::device::list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        let rate_marker = if device.supports_pipeline_rate { "" } else { " (no 48 kHz)" };
        println!("  {}{}{}", device.name, default_marker, rate_marker);
    }
    println!();
}

#[cfg(not(feature = "output"))]
fn list_outputs() {
    println!("Built without audio output support");
}
