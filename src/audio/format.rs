//! PCM format and the fixed-size transport frame

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{BITS_PER_SAMPLE, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Raw linear PCM layout shared by capture, chunking and playback.
///
/// Samples are signed little-endian and interleaved by channel. The format is
/// agreed out-of-band; frames never carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes for one sample across all channels
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }

    /// Nominal bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        (self.bytes_per_second() * 8) as u32
    }

    /// Exact frame length for a frame of `duration`, rounded down to whole samples.
    pub fn frame_bytes(&self, duration: Duration) -> usize {
        let samples = self.sample_rate as u128 * duration.as_micros() / 1_000_000;
        samples as usize * self.block_align()
    }

    /// Playback duration of `bytes` of audio in this format
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let block = self.block_align().max(1);
        let samples = (bytes / block) as u64;
        Duration::from_micros(samples * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS, BITS_PER_SAMPLE)
    }
}

/// One fixed-length slice of raw PCM, the unit of transport.
///
/// Frames are immutable and cheap to clone; fan-out shares one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    pub(crate) fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_frame_bytes() {
        let format = AudioFormat::default();
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.frame_bytes(Duration::from_millis(100)), 19_200);
        assert_eq!(format.bitrate(), 1_536_000);
    }

    #[test]
    fn test_duration_of_frame() {
        let format = AudioFormat::default();
        assert_eq!(format.duration_of(19_200), Duration::from_millis(100));
        assert_eq!(format.duration_of(3), Duration::ZERO);
    }

    #[test]
    fn test_frame_bytes_whole_samples() {
        let format = AudioFormat::new(44_100, 2, 16);
        // 10 ms at 44.1 kHz is 441 samples
        assert_eq!(format.frame_bytes(Duration::from_millis(10)), 441 * 4);
    }
}
