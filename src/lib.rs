//! # Audire
//!
//! Live audio rooms over the LAN: a host captures a system audio device,
//! slices the raw PCM into fixed-size frames and fans them out to every
//! listener joined to a room; each listener schedules those frames for
//! smooth, low-latency playback.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               HOST                                   │
//! │  ┌──────────────┐   s16le bytes   ┌──────────────┐                   │
//! │  │ ffmpeg child │ ──────────────▶ │ Byte stream  │ (capture::ffmpeg) │
//! │  │ (per device) │     stdout      │ + gate       │                   │
//! │  └──────────────┘                 └──────┬───────┘                   │
//! │                                          ▼                           │
//! │                                  ┌──────────────┐                    │
//! │                                  │ FrameChunker │ 19,200 B / 100 ms  │
//! │                                  └──────┬───────┘                    │
//! │                                         ▼                            │
//! │  ┌───────────────────────────────────────────────────────────────┐   │
//! │  │                 RoomHub (broadcast::hub)                      │   │
//! │  │   membership table ── publish ──▶ per-connection Outbox       │   │
//! │  │   (bounded, drop-oldest frames, lifecycle events lane)        │   │
//! │  └───────────────────────────────────────────────────────────────┘   │
//! │             │ WebSocket /ws          │ HTTP /api (control)           │
//! └─────────────┼────────────────────────┼───────────────────────────────┘
//!               ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             LISTENER                                 │
//! │  ┌──────────────┐   ┌───────────────────┐   ┌──────────────────────┐ │
//! │  │ListenerClient│──▶│ PlaybackScheduler │──▶│ OutputSink (cpal)    │ │
//! │  │ reconnect    │   │ decode + nextPlay │   │ mixer on sample clock│ │
//! │  └──────────────┘   └───────────────────┘   └──────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod broadcast;
pub mod capture;
pub mod config;
pub mod error;
pub mod network;
pub mod playback;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod streaming;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate for the whole pipeline
    pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

    /// Channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Bits per sample; samples are signed little-endian
    pub const BITS_PER_SAMPLE: u16 = 16;

    /// Duration of one transport frame in milliseconds
    pub const DEFAULT_FRAME_DURATION_MS: u32 = 100;

    /// Bytes in one 100 ms frame at 48 kHz stereo s16le
    pub const DEFAULT_FRAME_BYTES: usize = 19_200;

    /// Default HTTP/WebSocket port of the host
    pub const DEFAULT_HTTP_PORT: u16 = 5551;

    /// Join codes are exactly this many ASCII digits
    pub const JOIN_CODE_LEN: usize = 6;

    /// Grace window between graceful and forced capture process termination
    pub const DEFAULT_STOP_GRACE_MS: u64 = 2_000;

    /// Playback lookahead applied on first frame and after every reset
    pub const DEFAULT_LOOKAHEAD_MS: u32 = 50;

    /// Maximum audio queued ahead of the playback clock
    pub const DEFAULT_MAX_BUFFERED_MS: u32 = 500;

    /// Per-connection outbound frame queue (frames, drop-oldest)
    pub const OUTBOUND_FRAME_CAPACITY: usize = 32;

    /// Per-connection outbound lifecycle event queue
    pub const OUTBOUND_EVENT_CAPACITY: usize = 256;

    /// Read size for the capture process stdout
    pub const CAPTURE_READ_CHUNK: usize = 8_192;
}
