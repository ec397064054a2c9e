//! Sample-clocked mixer run inside the audio callback
//!
//! Units arrive through a bounded channel and are placed on a timeline
//! counted in output frames. The count of frames rendered is the playback
//! clock, so scheduling and rendering share one notion of time.

use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::clock::PlaybackClock;
use super::scheduler::PlaybackUnit;

/// State shared between the sink and its callback
#[derive(Debug)]
pub struct MixerShared {
    frames_rendered: AtomicU64,
    gain: AtomicU32,
    sample_rate: u32,
}

impl MixerShared {
    pub fn new(sample_rate: u32, gain: f32) -> Self {
        Self {
            frames_rendered: AtomicU64::new(0),
            gain: AtomicU32::new(gain.to_bits()),
            sample_rate,
        }
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }
}

/// Playback clock driven by rendered output frames
#[derive(Debug, Clone)]
pub struct SampleClock {
    shared: Arc<MixerShared>,
}

impl SampleClock {
    pub fn new(shared: Arc<MixerShared>) -> Self {
        Self { shared }
    }
}

impl PlaybackClock for SampleClock {
    fn now(&self) -> f64 {
        self.shared.frames_rendered() as f64 / self.shared.sample_rate.max(1) as f64
    }
}

struct ActiveUnit {
    start_frame: u64,
    unit: PlaybackUnit,
}

impl ActiveUnit {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.unit.frame.samples_per_channel() as u64
    }

    fn sample(&self, position: u64, channel: usize) -> f32 {
        let frame = &self.unit.frame;
        let channels = frame.channel_count();
        if position < self.start_frame || channels == 0 {
            return 0.0;
        }
        let index = (position - self.start_frame) as usize;
        frame
            .channel(channel % channels)
            .get(index)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Mixes scheduled units into interleaved output buffers
pub struct Mixer {
    incoming: Receiver<PlaybackUnit>,
    active: Vec<ActiveUnit>,
    shared: Arc<MixerShared>,
}

impl Mixer {
    pub fn new(incoming: Receiver<PlaybackUnit>, shared: Arc<MixerShared>) -> Self {
        Self {
            incoming,
            active: Vec::with_capacity(16),
            shared,
        }
    }

    /// Render one interleaved buffer of `channels` channels
    pub fn render<T>(&mut self, out: &mut [T], channels: usize, convert: impl Fn(f32) -> T) {
        let channels = channels.max(1);
        let rate = self.shared.sample_rate as f64;

        while let Ok(unit) = self.incoming.try_recv() {
            if unit.handle.is_cancelled() {
                continue;
            }
            let start_frame = (unit.start_at * rate).round().max(0.0) as u64;
            self.active.push(ActiveUnit { start_frame, unit });
        }
        self.active.retain(|a| !a.unit.handle.is_cancelled());

        let start = self.shared.frames_rendered();
        let gain = self.shared.gain();

        for (i, chunk) in out.chunks_mut(channels).enumerate() {
            let position = start + i as u64;
            for (c, sample) in chunk.iter_mut().enumerate() {
                let mixed: f32 = self
                    .active
                    .iter()
                    .filter(|a| a.start_frame <= position && position < a.end_frame())
                    .map(|a| a.sample(position, c))
                    .sum();
                *sample = convert((mixed * gain).clamp(-1.0, 1.0));
            }
        }

        let end = start + (out.len() / channels) as u64;
        self.active.retain(|a| {
            if a.end_frame() <= end {
                a.unit.handle.finish();
                false
            } else {
                true
            }
        });
        self.shared.frames_rendered.store(end, Ordering::Release);
    }

    pub fn active_units(&self) -> usize {
        self.active.len()
    }
}
