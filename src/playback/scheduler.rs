//! Listener-side playback scheduler
//!
//! Decodes each received frame and hands it to the output sink as a unit
//! timestamped on the sink's clock. `next_play_time` advances by each unit's
//! duration, so back-to-back frames play gaplessly. Before every unit two
//! corrections may reset it to `now + lookahead`:
//!
//! - underrun: `next_play_time` already lies in the past
//! - backlog: more than `max_buffered` seconds are queued ahead of `now`
//!
//! Calls must be serialized; the scheduler is owned by one task.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::clock::PlaybackClock;
use crate::audio::decode::{decode_pcm16, DecodedFrame};
use crate::audio::format::AudioFormat;
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;

#[derive(Debug, Default)]
struct UnitState {
    cancelled: AtomicBool,
    finished: AtomicBool,
}

/// Revocable handle shared by the scheduler and the sink
#[derive(Debug, Clone, Default)]
pub struct UnitHandle(Arc<UnitState>);

impl UnitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Called by the sink once the unit has played out
    pub fn finish(&self) {
        self.0.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.0.finished.load(Ordering::Acquire)
    }

    /// Still scheduled or playing
    pub fn is_pending(&self) -> bool {
        !self.is_cancelled() && !self.is_finished()
    }
}

/// A decoded frame to start playing at `start_at` on the sink's clock
#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    pub start_at: f64,
    pub frame: DecodedFrame,
    pub handle: UnitHandle,
}

impl PlaybackUnit {
    pub fn duration(&self) -> f64 {
        self.frame.duration()
    }

    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration()
    }
}

/// Real-time output facility
pub trait OutputSink {
    /// Queue a unit. The sink calls `finish` on its handle after playing it
    /// and must skip it once cancelled.
    fn submit(&mut self, unit: PlaybackUnit) -> Result<(), PlaybackError>;

    /// Output gain, 0.0 to 1.0; applies to queued units too
    fn set_gain(&mut self, gain: f32);

    /// Silence output and free device resources
    fn release(&mut self);
}

/// Correction applied before scheduling a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Correction {
    Underrun,
    Backlog,
}

/// Where a frame was scheduled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub start_at: f64,
    pub duration: f64,
    pub correction: Option<Correction>,
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub frames_scheduled: u64,
    pub malformed_frames: u64,
    pub underruns: u64,
    pub backlog_resets: u64,
    pub submit_failures: u64,
}

pub struct PlaybackScheduler<C: PlaybackClock, S: OutputSink> {
    clock: C,
    sink: S,
    format: AudioFormat,
    lookahead: f64,
    max_buffered: f64,
    next_play_time: Option<f64>,
    in_flight: Vec<UnitHandle>,
    gain: f32,
    stats: PlaybackStats,
}

impl<C: PlaybackClock, S: OutputSink> PlaybackScheduler<C, S> {
    pub fn new(clock: C, mut sink: S, format: AudioFormat, config: &PlaybackConfig) -> Self {
        let gain = config.volume.clamp(0.0, 1.0);
        sink.set_gain(gain);
        Self {
            clock,
            sink,
            format,
            lookahead: config.lookahead_seconds(),
            max_buffered: config.max_buffered_seconds(),
            next_play_time: None,
            in_flight: Vec::new(),
            gain,
            stats: PlaybackStats::default(),
        }
    }

    /// Decode and schedule one received frame.
    ///
    /// A malformed frame is counted and dropped; scheduling state is left
    /// untouched so playback resumes with the next valid frame.
    pub fn on_frame(&mut self, bytes: &[u8]) -> Result<Scheduled, PlaybackError> {
        self.stats.frames_received += 1;
        self.stats.bytes_received += bytes.len() as u64;

        match decode_pcm16(bytes, &self.format) {
            Ok(frame) => Ok(self.schedule(frame)),
            Err(e) => {
                self.stats.malformed_frames += 1;
                tracing::debug!("Dropping frame: {}", e);
                Err(e)
            }
        }
    }

    /// Schedule an already decoded frame
    pub fn schedule(&mut self, frame: DecodedFrame) -> Scheduled {
        let now = self.clock.now();
        self.in_flight.retain(UnitHandle::is_pending);

        let (start_at, correction) = match self.next_play_time {
            None => (now + self.lookahead, None),
            Some(t) if t < now => {
                self.stats.underruns += 1;
                tracing::warn!("Playback underrun ({:.0} ms late), rescheduling", (now - t) * 1000.0);
                (now + self.lookahead, Some(Correction::Underrun))
            }
            Some(t) if t - now > self.max_buffered => {
                self.stats.backlog_resets += 1;
                tracing::warn!(
                    "Playback backlog {:.0} ms over cap, dropping queued lead",
                    (t - now) * 1000.0
                );
                (now + self.lookahead, Some(Correction::Backlog))
            }
            Some(t) => (t, None),
        };

        let duration = frame.duration();
        let handle = UnitHandle::new();
        let unit = PlaybackUnit {
            start_at,
            frame,
            handle: handle.clone(),
        };

        match self.sink.submit(unit) {
            Ok(()) => {
                self.stats.frames_scheduled += 1;
                self.in_flight.push(handle);
            }
            Err(e) => {
                self.stats.submit_failures += 1;
                handle.cancel();
                tracing::warn!("Output rejected frame: {}", e);
            }
        }

        self.next_play_time = Some(start_at + duration);
        Scheduled {
            start_at,
            duration,
            correction,
        }
    }

    /// Cancel every unit not yet played and release the output.
    /// Idempotent; the next frame starts a fresh timeline.
    pub fn stop(&mut self) {
        let cancelled = self.in_flight.iter().filter(|h| h.is_pending()).count();
        for handle in self.in_flight.drain(..) {
            handle.cancel();
        }
        self.sink.release();
        if self.next_play_time.take().is_some() {
            tracing::info!("Playback stopped, {} scheduled units cancelled", cancelled);
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
        self.sink.set_gain(self.gain);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn next_play_time(&self) -> Option<f64> {
        self.next_play_time
    }

    /// Audio queued ahead of the clock, in seconds
    pub fn buffered_ahead(&self) -> f64 {
        self.next_play_time
            .map(|t| (t - self.clock.now()).max(0.0))
            .unwrap_or(0.0)
    }

    /// Units submitted and neither finished nor cancelled
    pub fn pending_units(&self) -> usize {
        self.in_flight.iter().filter(|h| h.is_pending()).count()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<C: PlaybackClock, S: OutputSink> Drop for PlaybackScheduler<C, S> {
    fn drop(&mut self) {
        self.stop();
    }
}
