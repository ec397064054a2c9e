//! Re-slices the capture byte stream into fixed-size frames
//!
//! The capture process writes whatever its I/O buffering produces; listeners
//! expect every frame to be exactly `frame_bytes` long. The chunker keeps the
//! unsliced remainder between calls and never emits a partial frame.

use bytes::BytesMut;

use crate::audio::format::{AudioFormat, Frame};
use crate::error::{Error, Result};
use std::time::Duration;

/// Stateful frame chunker, one per capture session
#[derive(Debug)]
pub struct FrameChunker {
    frame_bytes: usize,
    pending: BytesMut,
    frames_emitted: u64,
    bytes_fed: u64,
}

impl FrameChunker {
    /// Create a chunker emitting frames of exactly `frame_bytes`
    pub fn new(frame_bytes: usize) -> Result<Self> {
        if frame_bytes == 0 {
            return Err(Error::Config("frame size must be non-zero".to_string()));
        }

        Ok(Self {
            frame_bytes,
            pending: BytesMut::with_capacity(frame_bytes * 2),
            frames_emitted: 0,
            bytes_fed: 0,
        })
    }

    /// Chunker for frames of `duration` in `format`
    pub fn for_format(format: &AudioFormat, duration: Duration) -> Result<Self> {
        Self::new(format.frame_bytes(duration))
    }

    /// Append bytes and hand every complete frame to `emit`, in stream order.
    pub fn feed_with(&mut self, bytes: &[u8], mut emit: impl FnMut(Frame)) {
        self.bytes_fed += bytes.len() as u64;
        self.pending.extend_from_slice(bytes);

        while self.pending.len() >= self.frame_bytes {
            let frame = self.pending.split_to(self.frame_bytes).freeze();
            self.frames_emitted += 1;
            emit(Frame::new(frame));
        }
    }

    /// Append bytes and collect the complete frames
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::with_capacity((self.pending.len() + bytes.len()) / self.frame_bytes);
        self.feed_with(bytes, |frame| frames.push(frame));
        frames
    }

    /// Bytes waiting for the rest of their frame
    pub fn residual(&self) -> &[u8] {
        &self.pending
    }

    pub fn residual_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn bytes_fed(&self) -> u64 {
        self.bytes_fed
    }

    /// End of session: the residual partial frame is discarded.
    ///
    /// Returns how many bytes were dropped.
    pub fn finish(self) -> usize {
        let discarded = self.pending.len();
        if discarded > 0 {
            tracing::debug!(
                "Discarding {} residual bytes ({} frames emitted)",
                discarded,
                self.frames_emitted
            );
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_uneven_chunks_emit_exact_frames() {
        let mut chunker = FrameChunker::new(19_200).unwrap();
        let input: Vec<u8> = (0..39_200u32).map(|i| (i % 251) as u8).collect();

        let mut frames = Vec::new();
        frames.extend(chunker.feed(&input[..25_000]));
        assert_eq!(frames.len(), 1);
        frames.extend(chunker.feed(&input[25_000..35_000]));
        assert_eq!(frames.len(), 2);
        frames.extend(chunker.feed(&input[35_000..]));

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_bytes(), &input[0..19_200]);
        assert_eq!(frames[1].as_bytes(), &input[19_200..38_400]);
        // 25,000 + 10,000 + 4,200 - 2 * 19,200
        assert_eq!(chunker.residual_len(), 800);
        assert_eq!(chunker.residual(), &input[38_400..]);
    }

    #[test]
    fn test_small_pieces_accumulate() {
        let mut chunker = FrameChunker::new(8).unwrap();
        assert!(chunker.feed(&[1, 2, 3]).is_empty());
        assert!(chunker.feed(&[4, 5, 6, 7]).is_empty());
        let frames = chunker.feed(&[8, 9]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(chunker.residual(), &[9]);
    }

    #[test]
    fn test_one_feed_many_frames() {
        let mut chunker = FrameChunker::new(4).unwrap();
        let frames = chunker.feed(&[0u8; 17]);
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f.len() == 4));
        assert_eq!(chunker.residual_len(), 1);
        assert_eq!(chunker.frames_emitted(), 4);
    }

    #[test]
    fn test_finish_discards_residual() {
        let mut chunker = FrameChunker::new(10).unwrap();
        chunker.feed(&[0u8; 13]);
        assert_eq!(chunker.finish(), 3);
    }

    #[test]
    fn test_zero_frame_size_is_rejected() {
        assert!(matches!(FrameChunker::new(0), Err(Error::Config(_))));
        let format = AudioFormat::default();
        assert!(FrameChunker::for_format(&format, Duration::ZERO).is_err());
        assert_eq!(
            FrameChunker::for_format(&format, Duration::from_millis(100))
                .unwrap()
                .frame_bytes(),
            19_200
        );
    }

    #[test]
    fn test_empty_feed_is_noop() {
        let mut chunker = FrameChunker::new(10).unwrap();
        assert!(chunker.feed(&[]).is_empty());
        assert_eq!(chunker.residual_len(), 0);
    }

    proptest! {
        #[test]
        fn prop_chunker_preserves_bytes(
            input in proptest::collection::vec(any::<u8>(), 0..4096),
            cuts in proptest::collection::vec(1usize..700, 0..32),
            frame_bytes in 1usize..512,
        ) {
            let mut chunker = FrameChunker::new(frame_bytes).unwrap();
            let mut out = Vec::new();
            let mut offset = 0;
            for cut in cuts {
                if offset >= input.len() {
                    break;
                }
                let end = (offset + cut).min(input.len());
                for frame in chunker.feed(&input[offset..end]) {
                    prop_assert_eq!(frame.len(), frame_bytes);
                    out.extend_from_slice(frame.as_bytes());
                }
                offset = end;
            }
            for frame in chunker.feed(&input[offset..]) {
                prop_assert_eq!(frame.len(), frame_bytes);
                out.extend_from_slice(frame.as_bytes());
            }

            prop_assert!(chunker.residual_len() < frame_bytes);
            out.extend_from_slice(chunker.residual());
            prop_assert_eq!(out, input);
        }
    }
}
