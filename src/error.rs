//! Error types for the audio room pipeline

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Capture subsystem errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to spawn capture process: {0}")]
    ProcessSpawnFailed(String),

    #[error("Capture stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("No audio source selected")]
    NoActiveSession,

    #[error("Device listing failed: {0}")]
    ListingFailed(String),
}

/// Room membership and lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Invalid join code: {0}")]
    InvalidJoinCode(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room name must not be empty")]
    EmptyName,

    #[error("Unknown connection")]
    UnknownConnection,
}

/// Listener-side playback errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Output device error: {0}")]
    OutputDevice(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedOutputFormat(String),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Reconnect attempts exhausted after {0} tries")]
    RetriesExhausted(u32),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
