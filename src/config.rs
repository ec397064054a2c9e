//! Application configuration
//!
//! Loaded from TOML. Every field has a default matching the reference
//! pipeline, so an absent file or section yields a working setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration shared by host and listener
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub broadcast: BroadcastConfig,
    pub playback: PlaybackConfig,
    pub listener: ListenerConfig,
}

/// Host HTTP/WebSocket listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Capture process and framing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// ffmpeg executable; resolved through PATH when relative
    pub ffmpeg_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
    /// Grace window before a capture process is force-killed
    pub stop_grace_ms: u64,
    pub read_chunk_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            read_chunk_bytes: CAPTURE_READ_CHUNK,
        }
    }
}

impl CaptureConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels, BITS_PER_SAMPLE)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    pub fn frame_bytes(&self) -> usize {
        self.format().frame_bytes(self.frame_duration())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Per-connection outbound queues
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Frames buffered per connection before the oldest is dropped
    pub outbound_frame_capacity: usize,
    /// Lifecycle events buffered per connection before it is disconnected
    pub outbound_event_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            outbound_frame_capacity: OUTBOUND_FRAME_CAPACITY,
            outbound_event_capacity: OUTBOUND_EVENT_CAPACITY,
        }
    }
}

/// Listener-side scheduling and output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub lookahead_ms: u32,
    pub max_buffered_ms: u32,
    /// Output gain, 0.0 to 1.0
    pub volume: f32,
    /// Output device name; `None` selects the system default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: DEFAULT_LOOKAHEAD_MS,
            max_buffered_ms: DEFAULT_MAX_BUFFERED_MS,
            volume: 0.5,
            output_device: None,
        }
    }
}

impl PlaybackConfig {
    pub fn lookahead_seconds(&self) -> f64 {
        self.lookahead_ms as f64 / 1000.0
    }

    pub fn max_buffered_seconds(&self) -> f64 {
        self.max_buffered_ms as f64 / 1000.0
    }
}

/// Listener connection and reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub server_url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub reconnect_delay_max_ms: u64,
    pub stats_interval_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://127.0.0.1:{}/ws", DEFAULT_HTTP_PORT),
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 1_000,
            reconnect_delay_max_ms: 5_000,
            stats_interval_secs: 5,
        }
    }
}

impl AppConfig {
    /// Default config file location (`<config dir>/audire/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "audire", "audire")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from the default location.
    ///
    /// A missing file at the default location yields defaults; a missing
    /// explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(Error::Config(format!("Config file not found: {}", path.display())));
            }
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.sample_rate == 0 {
            return Err(Error::Config("capture.sample_rate must be positive".to_string()));
        }
        if !(1..=8).contains(&capture.channels) {
            return Err(Error::Config(format!(
                "capture.channels must be 1-8, got {}",
                capture.channels
            )));
        }
        if capture.frame_bytes() == 0 {
            return Err(Error::Config("capture.frame_duration_ms yields empty frames".to_string()));
        }
        if capture.read_chunk_bytes == 0 {
            return Err(Error::Config("capture.read_chunk_bytes must be positive".to_string()));
        }

        let broadcast = &self.broadcast;
        if broadcast.outbound_frame_capacity == 0 || broadcast.outbound_event_capacity == 0 {
            return Err(Error::Config("broadcast queue capacities must be positive".to_string()));
        }

        let playback = &self.playback;
        if playback.lookahead_ms >= playback.max_buffered_ms {
            return Err(Error::Config(format!(
                "playback.lookahead_ms ({}) must be below playback.max_buffered_ms ({})",
                playback.lookahead_ms, playback.max_buffered_ms
            )));
        }
        if !(0.0..=1.0).contains(&playback.volume) {
            return Err(Error::Config("playback.volume must be within 0.0-1.0".to_string()));
        }

        if self.listener.reconnect_delay_ms > self.listener.reconnect_delay_max_ms {
            return Err(Error::Config(
                "listener.reconnect_delay_ms exceeds listener.reconnect_delay_max_ms".to_string(),
            ));
        }

        Ok(())
    }
}
