//! macOS capture through ffmpeg's AVFoundation demuxer

use super::ffmpeg::{listing_pattern, CaptureBackend};
use crate::audio::device::Device;
use crate::error::CaptureError;

/// Synthetic entry for system output captured through a BlackHole loopback
pub const SYSTEM_AUDIO_ID: &str = "system-audio";
const SYSTEM_AUDIO_INPUT: &str = ":BlackHole 2ch";

/// `[AVFoundation indev @ 0x..] [1] MacBook Pro Microphone`
const DEVICE_LINE: &str = r"\[(\d+)\]\s+(.+)$";

#[derive(Debug, Default, Clone, Copy)]
pub struct AvFoundation;

impl CaptureBackend for AvFoundation {
    const PLATFORM: &'static str = "macos";

    fn listing_args(&self) -> Vec<String> {
        ["-hide_banner", "-f", "avfoundation", "-list_devices", "true", "-i", ""]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn parse_devices(&self, listing: &str) -> Result<Vec<Device>, CaptureError> {
        let device_line = listing_pattern(DEVICE_LINE)?;
        let mut devices = Vec::new();
        let mut in_audio = false;

        for line in listing.lines() {
            if line.contains("AVFoundation audio devices:") {
                in_audio = true;
                continue;
            }
            if line.contains("AVFoundation video devices:") {
                if in_audio {
                    break;
                }
                continue;
            }
            if !in_audio {
                continue;
            }

            if let Some(caps) = device_line.captures(line.trim_end()) {
                let index = caps[1].trim();
                devices.push(Device::input(
                    format!(":{}", index),
                    caps[2].trim(),
                    index == "0",
                ));
            }
        }

        if !devices.is_empty() {
            devices.push(Device::loopback(
                SYSTEM_AUDIO_ID,
                "System Audio (requires BlackHole)",
                false,
            ));
        }

        Ok(devices)
    }

    fn input_args(&self, device_id: &str) -> Vec<String> {
        let input = if device_id == SYSTEM_AUDIO_ID {
            SYSTEM_AUDIO_INPUT.to_string()
        } else if device_id.starts_with(':') {
            device_id.to_string()
        } else {
            format!(":{}", device_id)
        };
        vec!["-f".to_string(), "avfoundation".to_string(), "-i".to_string(), input]
    }

    fn fallback_device(&self) -> Device {
        Device::input(":0", "Default Microphone", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::DeviceKind;

    const LISTING: &str = "\
[AVFoundation indev @ 0x7f8] AVFoundation video devices:
[AVFoundation indev @ 0x7f8] [0] FaceTime HD Camera
[AVFoundation indev @ 0x7f8] [1] Capture screen 0
[AVFoundation indev @ 0x7f8] AVFoundation audio devices:
[AVFoundation indev @ 0x7f8] [0] MacBook Pro Microphone
[AVFoundation indev @ 0x7f8] [1] BlackHole 2ch
: Input/output error
";

    #[test]
    fn test_parses_audio_section_only() {
        let devices = AvFoundation.parse_devices(LISTING).unwrap();
        assert_eq!(devices.len(), 3);

        assert_eq!(devices[0].id, ":0");
        assert_eq!(devices[0].name, "MacBook Pro Microphone");
        assert!(devices[0].is_default);
        assert_eq!(devices[1].id, ":1");
        assert!(!devices[1].is_default);

        assert_eq!(devices[2].id, SYSTEM_AUDIO_ID);
        assert_eq!(devices[2].kind, DeviceKind::OutputLoopback);
    }

    #[test]
    fn test_no_audio_section_yields_nothing() {
        let devices = AvFoundation
            .parse_devices("ffmpeg version 6.0\nsomething else\n")
            .unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_input_args() {
        assert_eq!(AvFoundation.input_args(":1")[3], ":1");
        assert_eq!(AvFoundation.input_args("2")[3], ":2");
        assert_eq!(AvFoundation.input_args(SYSTEM_AUDIO_ID)[3], ":BlackHole 2ch");
    }
}
