//! Linux capture through ffmpeg's PulseAudio demuxer (also served by
//! PipeWire's pulse shim)

use super::ffmpeg::{listing_pattern, CaptureBackend};
use crate::audio::device::Device;
use crate::error::CaptureError;

/// `-sources pulse` line: `* alsa_input.pci-0000 [Built-in Audio Analog Stereo]`
const SOURCE_LINE: &str = r"^\s*(\*)?\s*(\S+)\s+\[(.+)\]\s*$";

#[derive(Debug, Default, Clone, Copy)]
pub struct PulseAudio;

impl CaptureBackend for PulseAudio {
    const PLATFORM: &'static str = "linux";

    fn listing_args(&self) -> Vec<String> {
        ["-hide_banner", "-sources", "pulse"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn parse_devices(&self, listing: &str) -> Result<Vec<Device>, CaptureError> {
        let source_line = listing_pattern(SOURCE_LINE)?;
        let devices = listing
            .lines()
            .filter_map(|line| source_line.captures(line))
            .map(|caps| {
                let is_default = caps.get(1).is_some();
                let id = caps[2].to_string();
                let name = caps[3].trim().to_string();
                if id.ends_with(".monitor") {
                    Device::loopback(id, name, is_default)
                } else {
                    Device::input(id, name, is_default)
                }
            })
            .collect();
        Ok(devices)
    }

    fn input_args(&self, device_id: &str) -> Vec<String> {
        vec![
            "-f".to_string(),
            "pulse".to_string(),
            "-i".to_string(),
            device_id.to_string(),
        ]
    }

    fn fallback_device(&self) -> Device {
        Device::input("default", "Default Source", true)
    }
}
