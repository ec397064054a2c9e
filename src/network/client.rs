//! Listener side of the room channel
//!
//! [`ListenerSession`] owns the playback scheduler and reacts to host events
//! and binary frames. [`ListenerClient`] drives one session over a
//! WebSocket, reconnecting with capped exponential backoff and re-joining
//! the room after every reconnect.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::room::{Room, RoomId};
use crate::config::ListenerConfig;
use crate::error::NetworkError;
use crate::playback::{OutputSink, PlaybackClock, PlaybackScheduler, PlaybackStats};
use crate::protocol::{ClientMessage, ServerEvent};
use crate::stats::BitrateMeter;

/// Window for the measured receive rate
const BITRATE_WINDOW: Duration = Duration::from_secs(5);

/// Why a session ended for good
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    RoomClosed { name: String },
    ServerShutdown(String),
    JoinRejected(String),
    Interrupted,
}

/// What the transport loop should do after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(ExitReason),
}

/// Listener receive counters
#[derive(Debug, Clone, Copy)]
pub struct ListenerStats {
    pub playback: PlaybackStats,
    pub kbps: f64,
    pub buffered_ms: f64,
}

/// Room membership and playback for one listener
pub struct ListenerSession<C: PlaybackClock, S: OutputSink> {
    scheduler: PlaybackScheduler<C, S>,
    join_code: String,
    display_name: String,
    room: Option<Room>,
    streaming: bool,
    meter: BitrateMeter,
}

impl<C: PlaybackClock, S: OutputSink> ListenerSession<C, S> {
    pub fn new(
        scheduler: PlaybackScheduler<C, S>,
        join_code: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            scheduler,
            join_code: join_code.into(),
            display_name: display_name.into(),
            room: None,
            streaming: false,
            meter: BitrateMeter::new(BITRATE_WINDOW),
        }
    }

    pub fn join_message(&self) -> ClientMessage {
        ClientMessage::JoinRoom {
            join_code: self.join_code.clone(),
            display_name: self.display_name.clone(),
        }
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<C, S> {
        &self.scheduler
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.scheduler.set_gain(volume);
    }

    pub fn handle_event(&mut self, event: ServerEvent) -> Flow {
        match event {
            ServerEvent::JoinRoomResult {
                ok: true,
                room: Some(room),
                is_streaming,
                ..
            } => {
                // Streaming state may have changed while we were away
                self.streaming = is_streaming.unwrap_or(room.is_streaming);
                tracing::info!(
                    "Joined room '{}' ({})",
                    room.name,
                    if self.streaming { "streaming" } else { "waiting for host" }
                );
                self.room = Some(room);
            }
            ServerEvent::JoinRoomResult { error, .. } => {
                let error = error.unwrap_or_else(|| "join rejected".to_string());
                tracing::error!("Join failed: {}", error);
                return Flow::Exit(ExitReason::JoinRejected(error));
            }
            ServerEvent::StreamStarted { room_id } if self.is_current(room_id) => {
                self.streaming = true;
                tracing::info!("Stream started");
            }
            ServerEvent::StreamStopped { room_id } if self.is_current(room_id) => {
                self.streaming = false;
                self.scheduler.stop();
                tracing::info!("Stream stopped");
            }
            ServerEvent::StreamError { room_id, error } if self.is_current(room_id) => {
                self.streaming = false;
                self.scheduler.stop();
                tracing::warn!("Stream error: {}", error);
            }
            ServerEvent::RoomRenamed { room_id, new_name } if self.is_current(room_id) => {
                tracing::info!("Room renamed to '{}'", new_name);
                if let Some(room) = self.room.as_mut() {
                    room.name = new_name;
                }
            }
            ServerEvent::RoomClosed { room_id, name, reason } if self.is_current(room_id) => {
                self.leave_room();
                match reason {
                    Some(reason) => tracing::info!("Room '{}' closed: {}", name, reason),
                    None => tracing::info!("Room '{}' closed", name),
                }
                return Flow::Exit(ExitReason::RoomClosed { name });
            }
            ServerEvent::ServerShutdown { message } => {
                self.leave_room();
                tracing::info!("Host shut down: {}", message);
                return Flow::Exit(ExitReason::ServerShutdown(message));
            }
            ServerEvent::ListenerJoined { room_id, display_name } if self.is_current(room_id) => {
                tracing::debug!("{} joined", display_name);
            }
            ServerEvent::ListenerDisconnected { room_id, display_name }
                if self.is_current(room_id) =>
            {
                tracing::debug!("{} left", display_name);
            }
            ServerEvent::Error { message } => {
                tracing::warn!("Host reported error: {}", message);
            }
            _ => {}
        }
        Flow::Continue
    }

    /// Feed one binary frame to the scheduler; frames outside a room are
    /// ignored
    pub fn handle_frame(&mut self, bytes: &[u8]) {
        if self.room.is_none() {
            return;
        }
        self.meter.record(bytes.len());
        // Malformed frames are counted by the scheduler and skipped
        let _ = self.scheduler.on_frame(bytes);
    }

    /// Transport lost: halt playback at once. Membership is restored by the
    /// join sent after reconnecting.
    pub fn on_disconnect(&mut self) {
        self.leave_room();
    }

    pub fn stats(&mut self) -> ListenerStats {
        ListenerStats {
            playback: self.scheduler.stats(),
            kbps: self.meter.kbps(),
            buffered_ms: self.scheduler.buffered_ahead() * 1000.0,
        }
    }

    fn is_current(&self, room_id: RoomId) -> bool {
        self.room.as_ref().map(|r| r.id == room_id).unwrap_or(false)
    }

    fn leave_room(&mut self) {
        self.scheduler.stop();
        self.streaming = false;
        self.room = None;
    }
}

/// Delay before reconnect attempt `attempt` (1-based)
pub fn reconnect_delay(config: &ListenerConfig, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let delay = config.reconnect_delay_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(delay.min(config.reconnect_delay_max_ms))
}

enum ConnectionEnd {
    Exit(ExitReason),
    Lost(String),
}

/// WebSocket transport with bounded reconnect
pub struct ListenerClient {
    config: ListenerConfig,
}

impl ListenerClient {
    pub fn new(config: ListenerConfig) -> Self {
        Self { config }
    }

    /// Run until the room closes, the host shuts down, the join is
    /// rejected, `shutdown` resolves or reconnect attempts run out.
    pub async fn run<C, S, F>(
        &self,
        session: &mut ListenerSession<C, S>,
        shutdown: F,
    ) -> Result<ExitReason, NetworkError>
    where
        C: PlaybackClock,
        S: OutputSink,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut failures = 0u32;

        loop {
            let connect = tokio_tungstenite::connect_async(self.config.server_url.as_str());
            let result = tokio::select! {
                result = connect => result,
                _ = &mut shutdown => return Ok(ExitReason::Interrupted),
            };

            let end = match result {
                Ok((ws, _)) => {
                    tracing::info!("Connected to {}", self.config.server_url);
                    failures = 0;
                    self.drive(ws, session, &mut shutdown).await
                }
                Err(e) => ConnectionEnd::Lost(e.to_string()),
            };

            match end {
                ConnectionEnd::Exit(reason) => return Ok(reason),
                ConnectionEnd::Lost(reason) => {
                    session.on_disconnect();
                    failures += 1;
                    if failures > self.config.max_reconnect_attempts {
                        tracing::error!("Giving up after {} reconnect attempts", failures - 1);
                        return Err(NetworkError::RetriesExhausted(failures - 1));
                    }
                    let delay = reconnect_delay(&self.config, failures);
                    tracing::warn!(
                        "Connection lost ({}), reconnecting in {:?} (attempt {}/{})",
                        reason,
                        delay,
                        failures,
                        self.config.max_reconnect_attempts
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = &mut shutdown => return Ok(ExitReason::Interrupted),
                    }
                }
            }
        }
    }

    async fn drive<C, S, F, W>(
        &self,
        ws: W,
        session: &mut ListenerSession<C, S>,
        shutdown: &mut std::pin::Pin<&mut F>,
    ) -> ConnectionEnd
    where
        C: PlaybackClock,
        S: OutputSink,
        F: Future<Output = ()>,
        W: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = ws.split();

        let join = match serde_json::to_string(&session.join_message()) {
            Ok(json) => json,
            Err(e) => return ConnectionEnd::Lost(e.to_string()),
        };
        if let Err(e) = write.send(Message::Text(join)).await {
            return ConnectionEnd::Lost(e.to_string());
        }

        let period = Duration::from_secs(self.config.stats_interval_secs.max(1));
        let mut stats_tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => return ConnectionEnd::Lost(e.to_string()),
                        None => return ConnectionEnd::Lost("connection closed".to_string()),
                    };
                    match msg {
                        Message::Binary(bytes) => session.handle_frame(&bytes),
                        Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if let Flow::Exit(reason) = session.handle_event(event) {
                                    let _ = write.send(Message::Close(None)).await;
                                    return ConnectionEnd::Exit(reason);
                                }
                            }
                            Err(e) => tracing::debug!("Ignoring unknown message: {}", e),
                        },
                        Message::Close(_) => return ConnectionEnd::Lost("closed by host".to_string()),
                        _ => {}
                    }
                }
                _ = stats_tick.tick() => {
                    let stats = session.stats();
                    tracing::info!(
                        "rx {:.0} kbps, {} frames, buffered {:.0} ms, underruns {}, backlog resets {}, malformed {}",
                        stats.kbps,
                        stats.playback.frames_scheduled,
                        stats.buffered_ms,
                        stats.playback.underruns,
                        stats.playback.backlog_resets,
                        stats.playback.malformed_frames
                    );
                }
                _ = shutdown.as_mut() => {
                    if let Ok(json) = serde_json::to_string(&ClientMessage::LeaveRoom) {
                        let _ = write.send(Message::Text(json)).await;
                    }
                    let _ = write.send(Message::Close(None)).await;
                    session.on_disconnect();
                    return ConnectionEnd::Exit(ExitReason::Interrupted);
                }
            }
        }
    }
}
