//! Windows capture through ffmpeg's DirectShow demuxer

use super::ffmpeg::{listing_pattern, CaptureBackend};
use crate::audio::device::Device;
use crate::error::CaptureError;

const LOOPBACK_MARKERS: [&str; 3] = ["stereo mix", "wave out mix", "what u hear"];

const QUOTED_NAME: &str = r#""([^"]+)""#;

fn is_loopback(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DirectShow;

impl CaptureBackend for DirectShow {
    const PLATFORM: &'static str = "windows";

    fn listing_args(&self) -> Vec<String> {
        ["-hide_banner", "-list_devices", "true", "-f", "dshow", "-i", "dummy"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Handles both the sectioned layout of older ffmpeg builds and the
    /// per-line `(audio)` markers of newer ones.
    fn parse_devices(&self, listing: &str) -> Result<Vec<Device>, CaptureError> {
        let quoted_name = listing_pattern(QUOTED_NAME)?;
        let mut devices: Vec<Device> = Vec::new();
        let mut in_audio = false;

        for line in listing.lines() {
            if line.contains("DirectShow audio devices") {
                in_audio = true;
                continue;
            }
            if line.contains("DirectShow video devices") {
                if in_audio {
                    break;
                }
                continue;
            }
            if line.contains("Alternative name") {
                continue;
            }

            let marked_audio = line.trim_end().ends_with("(audio)");
            if !in_audio && !marked_audio {
                continue;
            }

            if let Some(caps) = quoted_name.captures(line) {
                let name = caps[1].to_string();
                if devices.iter().any(|d| d.id == name) {
                    continue;
                }
                let is_default = devices.is_empty();
                let device = if is_loopback(&name) {
                    Device::loopback(name.clone(), name, is_default)
                } else {
                    Device::input(name.clone(), name, is_default)
                };
                devices.push(device);
            }
        }

        Ok(devices)
    }

    fn input_args(&self, device_id: &str) -> Vec<String> {
        let input = if device_id.starts_with("audio=") {
            device_id.to_string()
        } else {
            format!("audio={}", device_id)
        };
        vec!["-f".to_string(), "dshow".to_string(), "-i".to_string(), input]
    }

    fn fallback_device(&self) -> Device {
        Device::input("audio=Microphone", "Default Microphone", true)
    }
}
