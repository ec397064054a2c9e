//! Output sink that discards audio

use super::scheduler::{OutputSink, PlaybackUnit};
use crate::error::PlaybackError;

/// Accepts and immediately retires every unit. Used when the listener runs
/// without an audio device.
#[derive(Debug, Default)]
pub struct NullSink {
    submitted: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl OutputSink for NullSink {
    fn submit(&mut self, unit: PlaybackUnit) -> Result<(), PlaybackError> {
        self.submitted += 1;
        unit.handle.finish();
        Ok(())
    }

    fn set_gain(&mut self, _gain: f32) {}

    fn release(&mut self) {}
}
