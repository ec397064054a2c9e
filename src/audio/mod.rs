//! Audio primitives: format, frames, chunking, decoding and device records

pub mod chunker;
pub mod decode;
pub mod device;
pub mod format;

pub use chunker::FrameChunker;
pub use decode::{decode_pcm16, DecodedFrame};
pub use device::{Device, DeviceKind};
pub use format::{AudioFormat, Frame};
