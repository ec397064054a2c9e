//! Host streaming controller
//!
//! Ties the capture service, the room hub and the stats together. One pump
//! task per capture session moves bytes through the [`FrameChunker`] and
//! publishes every frame to all streaming rooms. Feeding and publishing run
//! under the session gate, so once a stop returns no byte of the stopped
//! session reaches a room.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::audio::chunker::FrameChunker;
use crate::audio::device::Device;
use crate::broadcast::hub::RoomHub;
use crate::broadcast::room::{Room, RoomId};
use crate::capture::{AudioSource, ByteStream, CaptureService, CaptureSource, SessionState};
use crate::error::{CaptureError, Result, RoomError};
use crate::stats::{StatsAccumulator, StatsSummary};

const INTERRUPTED_MESSAGE: &str = "Audio stream interrupted";
const SOURCE_FAILED_MESSAGE: &str = "Audio source failed to start";

/// Fixed stream parameters reported to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub codec: &'static str,
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_bytes: usize,
    pub frame_duration_ms: u64,
}

/// Global streaming status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub is_streaming: bool,
    pub active_rooms: usize,
    pub capture_state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Device>,
    pub config: StreamConfig,
}

/// Status of one room plus the global status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStreamStatus {
    pub room_id: RoomId,
    pub is_streaming: bool,
    pub global_status: StreamStatus,
}

pub struct StreamingController<S: CaptureSource> {
    capture: tokio::sync::Mutex<CaptureService<S>>,
    hub: Arc<RoomHub>,
    stats: Arc<StatsAccumulator>,
    frame_duration: Duration,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<S: CaptureSource> StreamingController<S> {
    pub fn new(
        capture: CaptureService<S>,
        hub: Arc<RoomHub>,
        stats: Arc<StatsAccumulator>,
        frame_duration: Duration,
    ) -> Self {
        Self {
            capture: tokio::sync::Mutex::new(capture),
            hub,
            stats,
            frame_duration,
            pump: Mutex::new(None),
        }
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn stats(&self) -> &Arc<StatsAccumulator> {
        &self.stats
    }

    pub async fn platform(&self) -> &'static str {
        self.capture.lock().await.platform()
    }

    pub async fn sources(&self) -> Vec<AudioSource> {
        self.capture.lock().await.sources().await
    }

    pub async fn refresh_sources(&self) -> Vec<AudioSource> {
        let mut capture = self.capture.lock().await;
        capture.refresh_devices().await;
        capture.sources().await
    }

    pub async fn active_source(&self) -> Option<Device> {
        self.capture.lock().await.active_source().cloned()
    }

    /// Capture `device_id` and start pumping its frames.
    ///
    /// Streaming rooms keep streaming across a device switch. When the new
    /// capture cannot start after the old one was stopped, the streaming
    /// rooms get `stream-error` and stop.
    pub async fn select_source(&self, device_id: &str) -> Result<Device> {
        let mut capture = self.capture.lock().await;
        let format = capture.format();
        let chunker = FrameChunker::for_format(&format, self.frame_duration)?;

        let stream = match capture.select_source(device_id).await {
            Ok(stream) => stream,
            Err(e) => {
                if !capture.is_capturing() {
                    tracing::error!("Audio source {} failed to start: {}", device_id, e);
                    if let Some(handle) = self.pump.lock().take() {
                        handle.abort();
                    }
                    for room_id in self.hub.fail_streaming(SOURCE_FAILED_MESSAGE) {
                        self.stats.end(room_id);
                    }
                }
                return Err(e.into());
            }
        };
        let device = capture
            .active_source()
            .cloned()
            .ok_or_else(|| CaptureError::StreamInterrupted("capture ended during start".to_string()))?;

        let handle = tokio::spawn(pump(stream, chunker, self.hub.clone(), self.stats.clone()));
        if let Some(previous) = self.pump.lock().replace(handle) {
            // its session was revoked by select_source above
            previous.abort();
        }

        Ok(device)
    }

    /// Stop capturing. Every streaming room is stopped as well.
    pub async fn stop_capture(&self) {
        self.capture.lock().await.stop_capture();
        for room_id in self.hub.stop_all_streaming() {
            self.stats.end(room_id);
        }
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    /// Start streaming the active capture to `room_id`
    pub async fn start_streaming(&self, room_id: RoomId) -> Result<Room> {
        if !self.capture.lock().await.is_capturing() {
            return Err(CaptureError::NoActiveSession.into());
        }

        self.hub.set_streaming(room_id, true)?;
        // the session may have died between the check and the flag
        if !self.capture.lock().await.is_capturing() {
            self.hub.set_streaming(room_id, false)?;
            return Err(CaptureError::NoActiveSession.into());
        }

        self.stats.begin(room_id);
        let room = self
            .hub
            .room(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;
        tracing::info!("Started streaming to room {} [{}]", room.name, room.join_code);
        Ok(room)
    }

    pub async fn stop_streaming(&self, room_id: RoomId) -> Result<Room> {
        self.hub.set_streaming(room_id, false)?;
        self.stats.end(room_id);
        let room = self
            .hub
            .room(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;
        tracing::info!("Stopped streaming to room {}", room.name);
        Ok(room)
    }

    /// Close a room and drop its stats
    pub fn close_room(&self, room_id: RoomId) -> Result<Room> {
        let room = self.hub.close_room(room_id, None)?;
        self.stats.remove(room_id);
        Ok(room)
    }

    pub async fn status(&self) -> StreamStatus {
        let capture = self.capture.lock().await;
        let format = capture.format();
        let active_rooms = self.hub.streaming_rooms().len();

        StreamStatus {
            is_streaming: active_rooms > 0,
            active_rooms,
            capture_state: capture.session_state(),
            source: capture.active_source().cloned(),
            config: StreamConfig {
                codec: "pcm",
                bitrate: format.bitrate(),
                sample_rate: format.sample_rate,
                channels: format.channels,
                frame_bytes: format.frame_bytes(self.frame_duration),
                frame_duration_ms: self.frame_duration.as_millis() as u64,
            },
        }
    }

    pub async fn room_status(&self, room_id: RoomId) -> Result<RoomStreamStatus> {
        let room = self
            .hub
            .room(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;
        Ok(RoomStreamStatus {
            room_id,
            is_streaming: room.is_streaming,
            global_status: self.status().await,
        })
    }

    pub fn stats_summary(&self) -> StatsSummary {
        self.stats.summary(&self.hub.rooms())
    }

    /// Stop capture and close every room with `reason`
    pub async fn shutdown(&self, reason: &str) {
        self.capture.lock().await.stop_capture();
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        self.hub.shutdown(reason);
    }
}

/// Move one session's bytes into the rooms until it ends
async fn pump(
    mut stream: ByteStream,
    mut chunker: FrameChunker,
    hub: Arc<RoomHub>,
    stats: Arc<StatsAccumulator>,
) {
    tracing::info!("Audio pump started for {}", stream.device_id());
    let mut chunks: u64 = 0;

    while let Some(item) = stream.recv().await {
        match item {
            Ok(bytes) => {
                chunks += 1;
                if chunks <= 5 {
                    tracing::debug!("Capture chunk #{}: {} bytes", chunks, bytes.len());
                }

                let delivered = stream.deliver(|| {
                    chunker.feed_with(&bytes, |frame| {
                        for room_id in hub.publish_streaming(&frame) {
                            stats.add_bytes(room_id, frame.len());
                        }
                    });
                });
                if delivered.is_none() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Audio stream error on {}: {}", stream.device_id(), e);
                for room_id in hub.fail_streaming(INTERRUPTED_MESSAGE) {
                    stats.end(room_id);
                }
                break;
            }
        }
    }

    let frames = chunker.frames_emitted();
    let discarded = chunker.finish();
    tracing::info!(
        "Audio pump for {} ended after {} frames ({} residual bytes discarded)",
        stream.device_id(),
        frames,
        discarded
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::AudioFormat;
    use crate::broadcast::outbox::{Outbound, Outbox};
    use crate::capture::service::testing::FakeCapture;
    use crate::error::Error;
    use crate::protocol::ServerEvent;
    use bytes::Bytes;

    fn setup() -> (StreamingController<FakeCapture>, FakeCapture) {
        let fake = FakeCapture::with_devices(vec![Device::input("mic", "Microphone", true)]);
        let service = CaptureService::new(fake.clone(), AudioFormat::default());
        let controller = StreamingController::new(
            service,
            Arc::new(RoomHub::default()),
            Arc::new(StatsAccumulator::new(AudioFormat::default().bitrate())),
            Duration::from_millis(100),
        );
        (controller, fake)
    }

    async fn next(outbox: &Outbox) -> Option<Outbound> {
        tokio::time::timeout(Duration::from_secs(2), outbox.next())
            .await
            .ok()
            .flatten()
    }

    async fn next_frame(outbox: &Outbox) -> Option<usize> {
        loop {
            match next(outbox).await? {
                Outbound::Frame(frame) => return Some(frame.len()),
                Outbound::Event(_) => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_streaming_requires_active_source() {
        let (controller, _fake) = setup();
        let room = controller.hub().create_room("Main").unwrap();

        let result = controller.start_streaming(room.id).await;
        assert!(matches!(result, Err(Error::Capture(CaptureError::NoActiveSession))));
        assert!(!controller.hub().room(room.id).unwrap().is_streaming);
    }

    #[tokio::test]
    async fn test_frames_reach_joined_listener() {
        let (controller, fake) = setup();
        let hub = controller.hub().clone();
        let room = hub.create_room("Main").unwrap();
        let (conn, outbox) = hub.connect(None);
        hub.join(conn, &room.join_code, "Ana").unwrap();

        controller.select_source("mic").await.unwrap();
        controller.start_streaming(room.id).await.unwrap();

        let sink = fake.take_sink().unwrap();
        for size in [25_000usize, 10_000, 4_200] {
            assert!(sink.send(Bytes::from(vec![0u8; size])).await);
        }

        assert_eq!(next_frame(&outbox).await, Some(19_200));
        assert_eq!(next_frame(&outbox).await, Some(19_200));
        assert_eq!(controller.stats().bytes_transferred(room.id), 38_400);

        let status = controller.status().await;
        assert!(status.is_streaming);
        assert_eq!(status.config.frame_bytes, 19_200);
    }

    #[tokio::test]
    async fn test_stop_capture_cuts_frames_and_stops_rooms() {
        let (controller, fake) = setup();
        let hub = controller.hub().clone();
        let room = hub.create_room("Main").unwrap();
        let (conn, outbox) = hub.connect(None);
        hub.join(conn, &room.join_code, "Ana").unwrap();

        controller.select_source("mic").await.unwrap();
        controller.start_streaming(room.id).await.unwrap();
        let sink = fake.take_sink().unwrap();

        controller.stop_capture().await;
        assert!(!sink.send(Bytes::from(vec![0u8; 19_200])).await);
        assert!(!hub.room(room.id).unwrap().is_streaming);
        assert!(controller.active_source().await.is_none());

        let mut saw_stop = false;
        while let Some(item) = outbox.try_next() {
            match item {
                Outbound::Frame(_) => panic!("frame after stop"),
                Outbound::Event(ServerEvent::StreamStopped { .. }) => saw_stop = true,
                Outbound::Event(_) => {}
            }
        }
        assert!(saw_stop);
    }

    #[tokio::test]
    async fn test_capture_death_reports_stream_error() {
        let (controller, fake) = setup();
        let hub = controller.hub().clone();
        let room = hub.create_room("Main").unwrap();
        let (conn, outbox) = hub.connect(None);
        hub.join(conn, &room.join_code, "Ana").unwrap();

        controller.select_source("mic").await.unwrap();
        controller.start_streaming(room.id).await.unwrap();
        fake.take_sink().unwrap().fail("capture process exited");

        let mut seen = Vec::new();
        while let Some(Outbound::Event(event)) = next(&outbox).await {
            let stop = matches!(event, ServerEvent::StreamStopped { .. });
            seen.push(event);
            if stop {
                break;
            }
        }

        let error_at = seen
            .iter()
            .position(|e| matches!(e, ServerEvent::StreamError { .. }))
            .unwrap();
        assert!(matches!(seen.last(), Some(ServerEvent::StreamStopped { .. })));
        assert!(error_at < seen.len() - 1);

        assert!(!hub.room(room.id).unwrap().is_streaming);
        assert_eq!(controller.status().await.capture_state, SessionState::Failed);
        assert!(controller.active_source().await.is_none());
    }

    #[tokio::test]
    async fn test_capture_death_with_queued_bytes_stops_rooms() {
        let (controller, fake) = setup();
        let hub = controller.hub().clone();
        let room = hub.create_room("Main").unwrap();

        controller.select_source("mic").await.unwrap();
        controller.start_streaming(room.id).await.unwrap();
        let sink = fake.take_sink().unwrap();
        assert!(sink.send(Bytes::from(vec![0u8; 1_000])).await);
        sink.fail("capture process exited");

        let stopped = tokio::time::timeout(Duration::from_secs(2), async {
            while hub.room(room.id).unwrap().is_streaming {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(stopped.is_ok(), "room still streaming after capture died");
        assert_eq!(controller.status().await.capture_state, SessionState::Failed);

        // a late joiner is told the room is idle
        let (conn, _outbox) = hub.connect(None);
        assert!(!hub.join(conn, &room.join_code, "Late").unwrap().is_streaming);
    }

    #[tokio::test]
    async fn test_failed_switch_stops_streaming_rooms() {
        let (controller, fake) = setup();
        let hub = controller.hub().clone();
        let room = hub.create_room("Main").unwrap();
        let (conn, outbox) = hub.connect(None);
        hub.join(conn, &room.join_code, "Ana").unwrap();

        controller.select_source("mic").await.unwrap();
        controller.start_streaming(room.id).await.unwrap();
        let old_sink = fake.take_sink().unwrap();

        fake.fail_next_start("ffmpeg not found");
        let result = controller.select_source("mic").await;
        assert!(matches!(
            result,
            Err(Error::Capture(CaptureError::ProcessSpawnFailed(_)))
        ));

        assert!(!hub.room(room.id).unwrap().is_streaming);
        assert!(!old_sink.send(Bytes::from(vec![0u8; 19_200])).await);
        assert!(controller.active_source().await.is_none());
        assert_eq!(controller.stats_summary().active_rooms, 0);

        let mut saw_error = false;
        let mut saw_stop = false;
        while let Some(item) = outbox.try_next() {
            match item {
                Outbound::Event(ServerEvent::StreamError { .. }) => saw_error = true,
                Outbound::Event(ServerEvent::StreamStopped { .. }) => saw_stop = true,
                _ => {}
            }
        }
        assert!(saw_error && saw_stop);
    }

    #[tokio::test]
    async fn test_unknown_device_keeps_running_session() {
        let (controller, _fake) = setup();
        let hub = controller.hub().clone();
        let room = hub.create_room("Main").unwrap();

        controller.select_source("mic").await.unwrap();
        controller.start_streaming(room.id).await.unwrap();

        let result = controller.select_source("nope").await;
        assert!(matches!(result, Err(Error::Capture(CaptureError::DeviceNotFound(_)))));
        assert!(hub.room(room.id).unwrap().is_streaming);
        assert!(controller.active_source().await.is_some());
    }

    #[tokio::test]
    async fn test_close_room_drops_stats() {
        let (controller, _fake) = setup();
        let room = controller.hub().create_room("Main").unwrap();
        controller.stats().begin(room.id);

        controller.close_room(room.id).unwrap();
        assert!(controller.stats_summary().rooms.is_empty());
        assert!(controller.hub().room(room.id).is_none());
    }
}
