//! Audio device records and output device lookup

use serde::{Deserialize, Serialize};

/// What a capture device records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// Microphone or line-in
    Input,
    /// Monitor of an output (what the host hears)
    OutputLoopback,
}

/// A capture device as reported by the platform capture utility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Identifier passed back to the capture utility
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub kind: DeviceKind,
    pub is_default: bool,
}

impl Device {
    pub fn input(id: impl Into<String>, name: impl Into<String>, is_default: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: DeviceKind::Input,
            is_default,
        }
    }

    pub fn loopback(id: impl Into<String>, name: impl Into<String>, is_default: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: DeviceKind::OutputLoopback,
            is_default,
        }
    }
}

/// Output device names available to the listener
#[cfg(feature = "output")]
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                let is_default = default_name.as_ref() == Some(&name);
                let supports_rate = device
                    .supported_output_configs()
                    .map(|configs| {
                        configs.into_iter().any(|c| {
                            c.min_sample_rate().0 <= crate::constants::DEFAULT_SAMPLE_RATE
                                && c.max_sample_rate().0 >= crate::constants::DEFAULT_SAMPLE_RATE
                        })
                    })
                    .unwrap_or(false);

                devices.push(OutputDeviceInfo {
                    name,
                    is_default,
                    supports_pipeline_rate: supports_rate,
                });
            }
        }
    }

    devices
}

/// Find an output device by name, or the host default when `name` is `None`
#[cfg(feature = "output")]
pub fn get_output_device(name: Option<&str>) -> Result<cpal::Device, crate::error::PlaybackError> {
    use crate::error::PlaybackError;
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();

    let Some(wanted) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| PlaybackError::OutputDevice("No default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| PlaybackError::OutputDevice(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == wanted {
                return Ok(device);
            }
        }
    }

    Err(PlaybackError::OutputDevice(format!("Output device not found: {}", wanted)))
}

/// Output device summary for the listener CLI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub supports_pipeline_rate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_wire_names() {
        let device = Device::loopback("mon", "Monitor", false);
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["kind"], "output-loopback");
        assert_eq!(json["isDefault"], false);

        let device = Device::input(":0", "Mic", true);
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["kind"], "input");
    }
}
