//! Listener-side playback: scheduling, mixing and audio output

pub mod clock;
pub mod mixer;
#[cfg(feature = "output")]
pub mod output;
pub mod scheduler;
pub mod sink;

pub use clock::{ManualClock, PlaybackClock, SystemClock};
pub use mixer::{Mixer, MixerShared, SampleClock};
#[cfg(feature = "output")]
pub use output::CpalSink;
pub use scheduler::{
    Correction, OutputSink, PlaybackScheduler, PlaybackStats, PlaybackUnit, Scheduled, UnitHandle,
};
pub use sink::NullSink;
