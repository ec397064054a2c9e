//! Audio capture through an external, platform-specific process
//!
//! A [`CaptureSource`] enumerates devices and turns one of them into a
//! continuous raw PCM [`ByteStream`]. Only one session is active per source;
//! starting another stops the first. Stopping revokes the stream through its
//! [`SessionGate`] before `stop()` returns, so no byte from a stopped session
//! can reach the chunker afterwards.

pub mod ffmpeg;
pub mod linux;
pub mod macos;
pub mod service;
pub mod windows;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::device::Device;
use crate::audio::format::AudioFormat;
use crate::error::CaptureError;

pub use ffmpeg::FfmpegCapture;
pub use service::{AudioSource, CaptureService};

#[cfg(target_os = "macos")]
pub type PlatformCapture = FfmpegCapture<macos::AvFoundation>;

#[cfg(target_os = "windows")]
pub type PlatformCapture = FfmpegCapture<windows::DirectShow>;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub type PlatformCapture = FfmpegCapture<linux::PulseAudio>;

/// Build the capture source for the running operating system
pub fn platform_capture(config: &crate::config::CaptureConfig) -> PlatformCapture {
    FfmpegCapture::new(Default::default(), config)
}

/// Device enumeration plus start/stop of one capture session
pub trait CaptureSource: Send + Sync + 'static {
    /// Short platform name ("macos", "windows", "linux")
    fn platform(&self) -> &'static str;

    /// Enumerate capture devices. Never fails: a listing that cannot be
    /// obtained or parsed yields a single synthetic default device.
    fn list_devices(&self) -> impl Future<Output = Vec<Device>> + Send;

    /// Start capturing `device_id`, stopping any previous session first.
    fn start(&mut self, device_id: &str, format: AudioFormat) -> Result<ByteStream, CaptureError>;

    /// Stop the active session. Idempotent; safe when never started.
    fn stop(&mut self);

    /// State of the current (or last) session
    fn state(&self) -> SessionState;
}

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped,
    Running,
    Failed,
}

/// Shared session state that decides whether captured bytes may pass.
///
/// `pass` runs its closure while holding the state lock, and `revoke` takes
/// the same lock, so once `revoke` returns no closure is running and none
/// will run again. A failed session keeps its failure reason.
#[derive(Debug, Clone)]
pub struct SessionGate {
    inner: Arc<Mutex<GateInner>>,
}

#[derive(Debug)]
struct GateInner {
    state: SessionState,
    failure: Option<String>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateInner {
                state: SessionState::Running,
                failure: None,
            })),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Close the gate for good (explicit stop)
    pub fn revoke(&self) {
        self.inner.lock().state = SessionState::Stopped;
    }

    /// Mark the session failed. Returns false when it was already closed.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Running {
            inner.state = SessionState::Failed;
            inner.failure = Some(reason.into());
            true
        } else {
            false
        }
    }

    /// Why the session failed, if it did
    pub fn failure(&self) -> Option<String> {
        self.inner.lock().failure.clone()
    }

    /// Run `f` only while the session is running
    pub fn pass<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.inner.lock();
        if inner.state == SessionState::Running {
            Some(f())
        } else {
            None
        }
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

type StreamItem = Result<Bytes, CaptureError>;

/// Producer half, owned by whatever reads the capture process
pub struct ByteSink {
    tx: mpsc::Sender<StreamItem>,
    gate: SessionGate,
}

impl ByteSink {
    /// Forward a chunk. Returns false once the session is closed.
    pub async fn send(&self, bytes: Bytes) -> bool {
        if !self.gate.is_running() {
            return false;
        }
        self.tx.send(Ok(bytes)).await.is_ok()
    }

    /// Report that the capture died underneath a running session
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.gate.fail(reason.clone()) {
            // Wakes a waiting reader; the gate carries the failure if the
            // queue is full
            let _ = self.tx.try_send(Err(CaptureError::StreamInterrupted(reason)));
        }
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }
}

/// Consumer half: the continuous raw PCM stream of one capture session
pub struct ByteStream {
    device_id: String,
    rx: mpsc::Receiver<StreamItem>,
    gate: SessionGate,
    failure_reported: bool,
}

impl ByteStream {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    /// Next chunk of captured bytes.
    ///
    /// `None` once the session was stopped; `Some(Err(StreamInterrupted))`
    /// exactly once when the capture died on its own, ahead of any bytes
    /// still queued.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        if let Some(item) = self.closed_item() {
            return item;
        }
        let next = self.rx.recv().await;
        if let Some(item) = self.closed_item() {
            return item;
        }
        match next {
            Some(item) => Some(item),
            None => {
                self.gate.fail("capture stream closed");
                self.closed_item().flatten()
            }
        }
    }

    /// Run `f` under the session gate; `None` means the session is over.
    pub fn deliver<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        self.gate.pass(f)
    }

    /// What `recv` yields for a session that is no longer running
    fn closed_item(&mut self) -> Option<Option<StreamItem>> {
        match self.gate.state() {
            SessionState::Running => None,
            SessionState::Stopped => Some(None),
            SessionState::Failed if self.failure_reported => Some(None),
            SessionState::Failed => {
                self.failure_reported = true;
                let reason = self
                    .gate
                    .failure()
                    .unwrap_or_else(|| "capture failed".to_string());
                Some(Some(Err(CaptureError::StreamInterrupted(reason))))
            }
        }
    }
}

/// Create a connected sink/stream pair for a new running session
pub fn byte_stream(device_id: impl Into<String>, depth: usize) -> (ByteSink, ByteStream) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let gate = SessionGate::new();
    (
        ByteSink {
            tx,
            gate: gate.clone(),
        },
        ByteStream {
            device_id: device_id.into(),
            rx,
            gate,
            failure_reported: false,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_delivers_until_revoked() {
        let (sink, mut stream) = byte_stream("dev", 8);
        assert!(sink.send(Bytes::from_static(b"abcd")).await);
        assert_eq!(stream.recv().await.unwrap().unwrap(), Bytes::from_static(b"abcd"));

        assert!(sink.send(Bytes::from_static(b"late")).await);
        stream.gate().revoke();
        // queued bytes from before the stop are not handed out
        assert!(stream.recv().await.is_none());
        assert!(!sink.send(Bytes::from_static(b"x")).await);
    }

    #[tokio::test]
    async fn test_fail_is_reported_once() {
        let (sink, mut stream) = byte_stream("dev", 8);
        sink.fail("boom");
        sink.fail("again");
        drop(sink);

        match stream.recv().await {
            Some(Err(CaptureError::StreamInterrupted(reason))) => assert_eq!(reason, "boom"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(stream.recv().await.is_none());
        assert_eq!(stream.gate().state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_fail_overtakes_queued_bytes() {
        let (sink, mut stream) = byte_stream("dev", 8);
        assert!(sink.send(Bytes::from_static(b"tail")).await);
        sink.fail("capture process exited");

        match stream.recv().await {
            Some(Err(CaptureError::StreamInterrupted(reason))) => {
                assert_eq!(reason, "capture process exited")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_with_full_queue_is_reported() {
        let (sink, mut stream) = byte_stream("dev", 1);
        assert!(sink.send(Bytes::from_static(b"full")).await);
        sink.fail("boom");

        assert!(matches!(
            stream.recv().await,
            Some(Err(CaptureError::StreamInterrupted(_)))
        ));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_sink_counts_as_interruption() {
        let (sink, mut stream) = byte_stream("dev", 8);
        drop(sink);
        assert!(matches!(
            stream.recv().await,
            Some(Err(CaptureError::StreamInterrupted(_)))
        ));
    }

    #[test]
    fn test_gate_blocks_after_revoke() {
        let gate = SessionGate::new();
        assert_eq!(gate.pass(|| 1), Some(1));
        gate.revoke();
        assert_eq!(gate.pass(|| 1), None);
        assert!(!gate.fail("late"));
        assert_eq!(gate.state(), SessionState::Stopped);
        assert_eq!(gate.failure(), None);
    }
}
