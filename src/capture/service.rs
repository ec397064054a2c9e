//! Host-side capture service: device cache and source selection

use serde::Serialize;

use super::{ByteStream, CaptureSource, SessionState};
use crate::audio::device::{Device, DeviceKind};
use crate::audio::format::AudioFormat;
use crate::error::CaptureError;

/// Device entry as exposed to the control API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSource {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub is_default: bool,
    pub is_active: bool,
}

/// Owns the platform capture source and tracks the selected device
pub struct CaptureService<S: CaptureSource> {
    source: S,
    format: AudioFormat,
    devices: Vec<Device>,
    active: Option<Device>,
}

impl<S: CaptureSource> CaptureService<S> {
    pub fn new(source: S, format: AudioFormat) -> Self {
        Self {
            source,
            format,
            devices: Vec::new(),
            active: None,
        }
    }

    pub fn platform(&self) -> &'static str {
        self.source.platform()
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Re-enumerate devices from the capture utility
    pub async fn refresh_devices(&mut self) -> &[Device] {
        self.devices = self.source.list_devices().await;
        &self.devices
    }

    /// Cached devices, enumerating on first use
    pub async fn devices(&mut self) -> &[Device] {
        if self.devices.is_empty() {
            self.refresh_devices().await;
        }
        &self.devices
    }

    /// Devices annotated with the currently active one
    pub async fn sources(&mut self) -> Vec<AudioSource> {
        let active_id = self.active_source().map(|d| d.id.clone());
        self.devices()
            .await
            .iter()
            .map(|d| AudioSource {
                id: d.id.clone(),
                name: d.name.clone(),
                kind: d.kind,
                is_default: d.is_default,
                is_active: active_id.as_deref() == Some(d.id.as_str()),
            })
            .collect()
    }

    /// Start capturing `device_id`, replacing any running session.
    ///
    /// The previous session is revoked before the new process is spawned;
    /// an unknown device leaves it running.
    pub async fn select_source(&mut self, device_id: &str) -> Result<ByteStream, CaptureError> {
        let device = match self.find(device_id) {
            Some(device) => device,
            None => {
                // the cache may predate a newly plugged device
                self.refresh_devices().await;
                self.find(device_id)
                    .ok_or_else(|| CaptureError::DeviceNotFound(device_id.to_string()))?
            }
        };

        self.stop_capture();
        let stream = self.source.start(&device.id, self.format)?;
        tracing::info!("Audio source selected: {} ({})", device.name, device.id);
        self.active = Some(device);
        Ok(stream)
    }

    /// Stop the running session, if any
    pub fn stop_capture(&mut self) {
        self.source.stop();
        if let Some(device) = self.active.take() {
            tracing::info!("Audio capture stopped: {}", device.name);
        }
    }

    /// Device of the running session; `None` once it stopped or failed
    pub fn active_source(&self) -> Option<&Device> {
        match self.source.state() {
            SessionState::Running => self.active.as_ref(),
            _ => None,
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.source.state()
    }

    pub fn is_capturing(&self) -> bool {
        self.session_state() == SessionState::Running
    }

    fn find(&self, device_id: &str) -> Option<Device> {
        self.devices.iter().find(|d| d.id == device_id).cloned()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeCapture;
    use super::*;
    use bytes::Bytes;

    fn service() -> CaptureService<FakeCapture> {
        let fake = FakeCapture::with_devices(vec![
            Device::input("mic", "Microphone", true),
            Device::loopback("mon", "Monitor", false),
        ]);
        CaptureService::new(fake, AudioFormat::default())
    }

    #[tokio::test]
    async fn test_unknown_device_is_rejected() {
        let mut service = service();
        let result = service.select_source("nope").await;
        assert_eq!(result.err(), Some(CaptureError::DeviceNotFound("nope".to_string())));
        assert!(service.active_source().is_none());
    }

    #[tokio::test]
    async fn test_select_marks_active_source() {
        let mut service = service();
        let _stream = service.select_source("mon").await.unwrap();

        assert_eq!(service.active_source().map(|d| d.id.as_str()), Some("mon"));
        let sources = service.sources().await;
        assert!(sources.iter().any(|s| s.id == "mon" && s.is_active));
        assert!(sources.iter().any(|s| s.id == "mic" && !s.is_active));
    }

    #[tokio::test]
    async fn test_switching_revokes_previous_stream() {
        let mut service = service();
        let mut first = service.select_source("mic").await.unwrap();
        let first_sink = service.source.take_sink().unwrap();

        let _second = service.select_source("mon").await.unwrap();
        assert!(!first_sink.send(Bytes::from_static(b"late")).await);
        drop(first_sink);
        assert!(first.recv().await.is_none());
        assert_eq!(*service.source.starts.lock(), vec!["mic", "mon"]);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_nothing_running() {
        let mut service = service();
        let _stream = service.select_source("mic").await.unwrap();

        service.source.fail_next_start("spawn failed");
        let result = service.select_source("mon").await;
        assert_eq!(
            result.err(),
            Some(CaptureError::ProcessSpawnFailed("spawn failed".to_string()))
        );
        assert!(!service.is_capturing());
        assert!(service.active_source().is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut service = service();
        service.stop_capture();
        let _stream = service.select_source("mic").await.unwrap();
        service.stop_capture();
        service.stop_capture();
        assert!(service.active_source().is_none());
        assert!(!service.is_capturing());
    }
}
