//! cpal output sink
//!
//! The stream lives on a dedicated thread (cpal streams are not `Send` on
//! every host) which keeps it alive until released. The device is opened
//! lazily on the first unit and closed on release; the mixer's rendered
//! frame count is the scheduler's clock.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::mixer::{Mixer, MixerShared, SampleClock};
use super::scheduler::{OutputSink, PlaybackUnit};
use crate::audio::device::get_output_device;
use crate::audio::format::AudioFormat;
use crate::error::PlaybackError;

/// Units buffered between the scheduler and the callback
const UNIT_QUEUE: usize = 64;

const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

struct OpenStream {
    units: Sender<PlaybackUnit>,
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Plays units on a cpal output device
pub struct CpalSink {
    device_name: Option<String>,
    format: AudioFormat,
    shared: Arc<MixerShared>,
    stream: Option<OpenStream>,
}

impl CpalSink {
    /// `device_name` of `None` selects the default output
    pub fn new(device_name: Option<String>, format: AudioFormat) -> Self {
        Self {
            device_name,
            format,
            shared: Arc::new(MixerShared::new(format.sample_rate, 1.0)),
            stream: None,
        }
    }

    /// Clock to schedule against
    pub fn clock(&self) -> SampleClock {
        SampleClock::new(self.shared.clone())
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn open(&mut self) -> Result<(), PlaybackError> {
        let (units_tx, units_rx) = bounded::<PlaybackUnit>(UNIT_QUEUE);
        let (ready_tx, ready_rx) = bounded::<Result<String, PlaybackError>>(1);
        let running = Arc::new(AtomicBool::new(true));

        let device_name = self.device_name.clone();
        let format = self.format;
        let shared = self.shared.clone();
        let running_for_loop = running.clone();

        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let mixer = Mixer::new(units_rx, shared);
                let stream = get_output_device(device_name.as_deref())
                    .and_then(|device| build_stream(&device, &format, mixer));

                let stream = match stream {
                    Ok((stream, description)) => match stream.play() {
                        Ok(()) => {
                            let _ = ready_tx.send(Ok(description));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(PlaybackError::OutputDevice(e.to_string())));
                            return;
                        }
                    },
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Keep the stream alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
            })
            .map_err(|e| PlaybackError::OutputDevice(e.to_string()))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(description)) => {
                tracing::info!("Audio output opened: {}", description);
                self.stream = Some(OpenStream {
                    units: units_tx,
                    running,
                    thread,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                Err(PlaybackError::OutputDevice("output stream did not start".to_string()))
            }
        }
    }
}

impl OutputSink for CpalSink {
    fn submit(&mut self, unit: PlaybackUnit) -> Result<(), PlaybackError> {
        if self.stream.is_none() {
            self.open()?;
        }
        let Some(stream) = &self.stream else {
            return Err(PlaybackError::OutputDevice("output not open".to_string()));
        };

        match stream.units.try_send(unit) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(unit)) => {
                unit.handle.cancel();
                Err(PlaybackError::OutputDevice("output queue full".to_string()))
            }
            Err(TrySendError::Disconnected(unit)) => {
                unit.handle.cancel();
                self.release();
                Err(PlaybackError::OutputDevice("output stream ended".to_string()))
            }
        }
    }

    fn set_gain(&mut self, gain: f32) {
        self.shared.set_gain(gain);
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.running.store(false, Ordering::SeqCst);
            drop(stream.units);
            let _ = stream.thread.join();
            tracing::debug!("Audio output released");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Pick a config at the pipeline rate, preferring f32 with the pipeline's
/// channel count
fn pick_config(
    device: &cpal::Device,
    format: &AudioFormat,
) -> Result<(StreamConfig, SampleFormat), PlaybackError> {
    let rate = cpal::SampleRate(format.sample_rate);
    let ranges = device
        .supported_output_configs()
        .map_err(|e| PlaybackError::OutputDevice(e.to_string()))?;

    let mut fallback = None;
    for range in ranges {
        if range.min_sample_rate() > rate || range.max_sample_rate() < rate {
            continue;
        }
        let sample_format = range.sample_format();
        if !matches!(sample_format, SampleFormat::F32 | SampleFormat::I16) {
            continue;
        }
        let exact = sample_format == SampleFormat::F32 && range.channels() == format.channels;
        let config = range.with_sample_rate(rate);
        if exact {
            return Ok((config.config(), sample_format));
        }
        if fallback.is_none() {
            fallback = Some((config.config(), sample_format));
        }
    }

    fallback.ok_or_else(|| {
        PlaybackError::UnsupportedOutputFormat(format!(
            "device has no f32/i16 output at {} Hz",
            format.sample_rate
        ))
    })
}

fn build_stream(
    device: &cpal::Device,
    format: &AudioFormat,
    mixer: Mixer,
) -> Result<(cpal::Stream, String), PlaybackError> {
    let (config, sample_format) = pick_config(device, format)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let description = format!(
        "{} ({} Hz, {} ch, {:?})",
        name, config.sample_rate.0, config.channels, sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_typed::<f32>(device, &config, mixer)?,
        SampleFormat::I16 => build_typed::<i16>(device, &config, mixer)?,
        other => {
            return Err(PlaybackError::UnsupportedOutputFormat(format!("{:?}", other)));
        }
    };
    Ok((stream, description))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream, PlaybackError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mixer.render(data, channels, |s: f32| T::from_sample(s));
            },
            |err| tracing::error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| PlaybackError::OutputDevice(e.to_string()))
}
