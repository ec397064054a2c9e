//! Raw s16le frame decoding for playback

use crate::audio::format::AudioFormat;
use crate::error::PlaybackError;

/// A decoded frame, one normalized sample sequence per channel
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl DecodedFrame {
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn samples_per_channel(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples_per_channel() as f64 / self.sample_rate as f64
    }
}

/// Decode interleaved signed 16-bit little-endian PCM.
///
/// Each sample is divided by 32768 into [-1.0, 1.0) and de-interleaved:
/// channel `c`, sample `i` comes from interleaved index `i * channels + c`.
/// Empty payloads, payloads that are not a whole number of sample blocks, and
/// payloads with less than one sample per channel are rejected.
pub fn decode_pcm16(bytes: &[u8], format: &AudioFormat) -> Result<DecodedFrame, PlaybackError> {
    let channels = format.channels as usize;
    if channels == 0 {
        return Err(PlaybackError::MalformedFrame("zero channels".to_string()));
    }
    if bytes.is_empty() {
        return Err(PlaybackError::MalformedFrame("empty payload".to_string()));
    }

    let block = channels * 2;
    if bytes.len() % block != 0 {
        return Err(PlaybackError::MalformedFrame(format!(
            "{} bytes is not a multiple of the {}-byte sample block",
            bytes.len(),
            block
        )));
    }

    let total_samples = bytes.len() / 2;
    let samples_per_channel = total_samples / channels;
    if samples_per_channel < 1 {
        return Err(PlaybackError::MalformedFrame("not enough samples".to_string()));
    }

    let mut out: Vec<Vec<f32>> = (0..channels)
        .map(|_| Vec::with_capacity(samples_per_channel))
        .collect();

    for (index, pair) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        out[index % channels].push(sample as f32 / 32768.0);
    }

    Ok(DecodedFrame::from_channels(out, format.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_deinterleave_stereo() {
        let format = AudioFormat::default();
        let bytes = pcm(&[16384, -16384, 0, 32767, -32768, 8192]);

        let frame = decode_pcm16(&bytes, &format).unwrap();
        assert_eq!(frame.channel_count(), 2);
        assert_eq!(frame.samples_per_channel(), 3);
        assert_eq!(frame.channel(0), &[0.5, 0.0, -1.0]);
        assert_eq!(frame.channel(1)[0], -0.5);
        assert!((frame.channel(1)[1] - 0.999_969_5).abs() < 1e-6);
        assert_eq!(frame.channel(1)[2], 0.25);
    }

    #[test]
    fn test_full_frame_duration() {
        let format = AudioFormat::default();
        let frame = decode_pcm16(&vec![0u8; 19_200], &format).unwrap();
        assert_eq!(frame.samples_per_channel(), 4800);
        assert!((frame.duration() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_empty() {
        let format = AudioFormat::default();
        assert!(matches!(
            decode_pcm16(&[], &format),
            Err(PlaybackError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_rejects_partial_block() {
        let format = AudioFormat::default();
        // one stereo sample needs 4 bytes
        assert!(decode_pcm16(&[0, 0], &format).is_err());
        assert!(decode_pcm16(&[0, 0, 0, 0, 0], &format).is_err());
        assert!(decode_pcm16(&[0, 0, 0, 0], &format).is_ok());
    }

    #[test]
    fn test_mono() {
        let format = AudioFormat::new(48_000, 1, 16);
        let frame = decode_pcm16(&pcm(&[-32768, 0]), &format).unwrap();
        assert_eq!(frame.channel_count(), 1);
        assert_eq!(frame.channel(0), &[-1.0, 0.0]);
    }
}
