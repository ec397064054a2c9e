//! Audire host
//!
//! Captures a system audio device through ffmpeg and streams it to the
//! listeners of one or more rooms. Rooms and streaming are controlled over
//! the HTTP API; `--room` and `--device` set up a room from the command line.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audire::{
    broadcast::RoomHub,
    capture::{platform_capture, CaptureService},
    config::AppConfig,
    server::WebServer,
    stats::StatsAccumulator,
    streaming::StreamingController,
};

const SHUTDOWN_REASON: &str = "Host application closed";

#[derive(Parser)]
#[command(name = "audire-host")]
#[command(about = "Capture system audio and stream it to listening rooms")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP/WebSocket port
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Capture this device id at startup
    #[arg(short, long)]
    device: Option<String>,

    /// Create a room with this name at startup (streams when --device is set)
    #[arg(short, long)]
    room: Option<String>,

    /// Print capture devices and exit
    #[arg(long)]
    list_devices: bool,
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

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.http_port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    config.validate()?;

    let format = config.capture.format();
    let service = CaptureService::new(platform_capture(&config.capture), format);
    let hub = Arc::new(RoomHub::new(config.broadcast));
    let stats = Arc::new(StatsAccumulator::new(format.bitrate()));
    let controller = Arc::new(StreamingController::new(
        service,
        hub.clone(),
        stats,
        config.capture.frame_duration(),
    ));

    if cli.list_devices {
        println!("\n=== Capture Devices ({}) ===", controller.platform().await);
        for source in controller.refresh_sources().await {
            let default_marker = if source.is_default { " [DEFAULT]" } else { "" };
            println!("  {} ({:?}){}", source.name, source.kind, default_marker);
            println!("    ID: {}", source.id);
        }
        println!();
        return Ok(());
    }

    tracing::info!(
        "Starting Audire host: {} Hz, {} ch, {} byte frames",
        format.sample_rate,
        format.channels,
        config.capture.frame_bytes()
    );

    if let Some(device_id) = &cli.device {
        let device = controller.select_source(device_id).await?;
        tracing::info!("Capturing from {} ({})", device.name, device.id);
    }

    if let Some(name) = &cli.room {
        let room = hub.create_room(name)?;
        println!("Room '{}' created, join code: {}", room.name, room.join_code);
        if cli.device.is_some() {
            controller.start_streaming(room.id).await?;
        }
    }

    let server = WebServer::new(config.server.clone(), controller.clone());
    let shutdown_controller = controller.clone();
    let shutdown = async move {
        wait_for_signal().await;
        tracing::info!("Shutting down");
        shutdown_controller.shutdown(SHUTDOWN_REASON).await;
    };

    server.run(shutdown).await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
