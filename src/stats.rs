//! Streaming statistics
//!
//! Host side: bytes, bitrate and duration per room. Listener side: a
//! sliding-window bitrate meter. Neither is load-bearing for playback.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::broadcast::room::{Room, RoomId};

#[derive(Debug, Clone, Default)]
struct RoomCounters {
    bytes_transferred: u64,
    started_at: Option<DateTime<Utc>>,
}

/// Per-room stats entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub room_id: RoomId,
    pub room_name: String,
    pub is_streaming: bool,
    /// Nominal stream bitrate in bits per second
    pub bitrate: u32,
    pub listener_count: usize,
    pub bytes_transferred: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
}

/// Totals across all rooms
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub uptime_seconds: u64,
    pub active_rooms: usize,
    pub total_listeners: usize,
    pub bytes_transferred: u64,
    pub rooms: Vec<RoomStats>,
}

/// Host-side counters keyed by room
pub struct StatsAccumulator {
    rooms: DashMap<RoomId, RoomCounters>,
    tracking_since: Mutex<Option<DateTime<Utc>>>,
    bitrate: u32,
}

impl StatsAccumulator {
    pub fn new(bitrate: u32) -> Self {
        Self {
            rooms: DashMap::new(),
            tracking_since: Mutex::new(None),
            bitrate,
        }
    }

    /// Streaming started for `room_id`; keeps previously counted bytes
    pub fn begin(&self, room_id: RoomId) {
        self.tracking_since.lock().get_or_insert_with(Utc::now);
        let mut counters = self.rooms.entry(room_id).or_default();
        if counters.started_at.is_none() {
            counters.started_at = Some(Utc::now());
        }
    }

    /// Streaming stopped for `room_id`; bytes are kept for display
    pub fn end(&self, room_id: RoomId) {
        if let Some(mut counters) = self.rooms.get_mut(&room_id) {
            counters.started_at = None;
        }
    }

    pub fn add_bytes(&self, room_id: RoomId, bytes: usize) {
        if let Some(mut counters) = self.rooms.get_mut(&room_id) {
            counters.bytes_transferred += bytes as u64;
        }
    }

    /// Drop a closed room's counters
    pub fn remove(&self, room_id: RoomId) {
        self.rooms.remove(&room_id);
    }

    pub fn bytes_transferred(&self, room_id: RoomId) -> u64 {
        self.rooms
            .get(&room_id)
            .map(|c| c.bytes_transferred)
            .unwrap_or(0)
    }

    pub fn uptime(&self) -> Duration {
        self.tracking_since
            .lock()
            .and_then(|since| (Utc::now() - since).to_std().ok())
            .unwrap_or_default()
    }

    /// Stats for every tracked room present in `rooms`
    pub fn snapshot(&self, rooms: &[Room]) -> Vec<RoomStats> {
        let now = Utc::now();
        rooms
            .iter()
            .filter_map(|room| {
                let counters = self.rooms.get(&room.id)?;
                let duration = counters
                    .started_at
                    .and_then(|since| (now - since).to_std().ok())
                    .unwrap_or_default();
                Some(RoomStats {
                    room_id: room.id,
                    room_name: room.name.clone(),
                    is_streaming: room.is_streaming,
                    bitrate: self.bitrate,
                    listener_count: room.listener_count,
                    bytes_transferred: counters.bytes_transferred,
                    started_at: counters.started_at,
                    duration_seconds: duration.as_secs(),
                })
            })
            .collect()
    }

    pub fn summary(&self, rooms: &[Room]) -> StatsSummary {
        let room_stats = self.snapshot(rooms);
        StatsSummary {
            uptime_seconds: self.uptime().as_secs(),
            active_rooms: rooms.iter().filter(|r| r.is_streaming).count(),
            total_listeners: rooms.iter().map(|r| r.listener_count).sum(),
            bytes_transferred: room_stats.iter().map(|r| r.bytes_transferred).sum(),
            rooms: room_stats,
        }
    }
}

/// Sliding-window receive rate
pub struct BitrateMeter {
    window: Duration,
    samples: VecDeque<(Instant, usize)>,
    window_bytes: usize,
    total_bytes: u64,
}

impl BitrateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            window_bytes: 0,
            total_bytes: 0,
        }
    }

    pub fn record(&mut self, bytes: usize) {
        self.record_at(Instant::now(), bytes);
    }

    pub fn record_at(&mut self, at: Instant, bytes: usize) {
        self.samples.push_back((at, bytes));
        self.window_bytes += bytes;
        self.total_bytes += bytes as u64;
        self.expire(at);
    }

    /// Kilobits per second over the window ending at `now`
    pub fn kbps_at(&mut self, now: Instant) -> f64 {
        self.expire(now);
        let secs = self.window.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.window_bytes as f64 * 8.0 / 1000.0 / secs
    }

    pub fn kbps(&mut self) -> f64 {
        self.kbps_at(Instant::now())
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.saturating_duration_since(at) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.window_bytes -= bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn room(id: RoomId, streaming: bool, listeners: usize) -> Room {
        Room {
            id,
            join_code: "000001".to_string(),
            name: "Main".to_string(),
            is_streaming: streaming,
            listener_count: listeners,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_bytes_survive_stop_but_not_close() {
        let stats = StatsAccumulator::new(1_536_000);
        let id = Uuid::new_v4();

        stats.add_bytes(id, 100);
        assert_eq!(stats.bytes_transferred(id), 0);

        stats.begin(id);
        stats.add_bytes(id, 19_200);
        stats.end(id);
        stats.add_bytes(id, 19_200);
        assert_eq!(stats.bytes_transferred(id), 38_400);

        let snapshot = stats.snapshot(&[room(id, false, 2)]);
        assert_eq!(snapshot[0].bytes_transferred, 38_400);
        assert_eq!(snapshot[0].started_at, None);
        assert_eq!(snapshot[0].listener_count, 2);

        stats.remove(id);
        assert!(stats.snapshot(&[room(id, false, 2)]).is_empty());
    }

    #[test]
    fn test_summary_totals() {
        let stats = StatsAccumulator::new(1_536_000);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        stats.begin(a);
        stats.begin(b);
        stats.add_bytes(a, 10);
        stats.add_bytes(b, 5);

        let summary = stats.summary(&[room(a, true, 1), room(b, false, 3)]);
        assert_eq!(summary.active_rooms, 1);
        assert_eq!(summary.total_listeners, 4);
        assert_eq!(summary.bytes_transferred, 15);
        assert_eq!(summary.rooms.len(), 2);
    }

    #[test]
    fn test_bitrate_meter_window() {
        let mut meter = BitrateMeter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        for i in 0..10 {
            meter.record_at(t0 + Duration::from_millis(i * 100), 19_200);
        }
        // 192,000 bytes in one second
        let kbps = meter.kbps_at(t0 + Duration::from_millis(950));
        assert!((kbps - 1_536.0).abs() < 1e-6);

        assert_eq!(meter.kbps_at(t0 + Duration::from_secs(5)), 0.0);
        assert_eq!(meter.total_bytes(), 192_000);
    }
}
