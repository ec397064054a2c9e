//! ffmpeg subprocess capture
//!
//! Each platform backend supplies the ffmpeg input arguments and the parser
//! for ffmpeg's device listing; process lifecycle is shared. ffmpeg writes
//! raw s16le PCM on stdout, which a reader task forwards into a
//! [`ByteStream`].

use bytes::BytesMut;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::{byte_stream, ByteSink, ByteStream, CaptureSource, SessionGate, SessionState};
use crate::audio::device::Device;
use crate::audio::format::AudioFormat;
use crate::config::CaptureConfig;
use crate::error::CaptureError;

/// Chunks buffered between the stdout reader and the consumer
const STREAM_DEPTH: usize = 64;

/// Platform-specific half of the ffmpeg capture
pub trait CaptureBackend: Default + Send + Sync + 'static {
    /// Short platform name
    const PLATFORM: &'static str;

    /// Arguments that make ffmpeg print its device list
    fn listing_args(&self) -> Vec<String>;

    /// Parse ffmpeg's listing output (stdout and stderr combined)
    fn parse_devices(&self, listing: &str) -> Result<Vec<Device>, CaptureError>;

    /// Input arguments (`-f <demuxer> -i <device>`) for `device_id`
    fn input_args(&self, device_id: &str) -> Vec<String>;

    /// Entry returned when the listing cannot be obtained or parsed
    fn fallback_device(&self) -> Device;
}

/// Compile a device-listing pattern
pub fn listing_pattern(pattern: &str) -> Result<Regex, CaptureError> {
    Regex::new(pattern).map_err(|e| CaptureError::ListingFailed(format!("Regex error: {}", e)))
}

/// Output arguments: raw PCM in `format` on stdout
pub fn output_args(format: &AudioFormat) -> Vec<String> {
    vec![
        "-f".to_string(),
        "s16le".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-ar".to_string(),
        format.sample_rate.to_string(),
        "-ac".to_string(),
        format.channels.to_string(),
        "pipe:1".to_string(),
    ]
}

/// Running ffmpeg process of the active session
struct ActiveProcess {
    device_id: String,
    child: Child,
    gate: SessionGate,
    reader: JoinHandle<()>,
}

/// Capture source that runs ffmpeg with a platform backend
pub struct FfmpegCapture<B: CaptureBackend> {
    backend: B,
    ffmpeg: PathBuf,
    grace: Duration,
    read_chunk: usize,
    session: Option<ActiveProcess>,
    last_state: SessionState,
}

impl<B: CaptureBackend> FfmpegCapture<B> {
    pub fn new(backend: B, config: &CaptureConfig) -> Self {
        Self {
            backend,
            ffmpeg: config.ffmpeg_path.clone(),
            grace: config.stop_grace(),
            read_chunk: config.read_chunk_bytes,
            session: None,
            last_state: SessionState::Stopped,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Device id of the active session
    pub fn active_device(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.device_id.as_str())
    }

    /// Full argument list used to capture `device_id`
    pub fn capture_args(&self, device_id: &str, format: &AudioFormat) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "warning".to_string(),
        ];
        if cfg!(not(windows)) {
            args.push("-nostdin".to_string());
        }
        args.extend(self.backend.input_args(device_id));
        args.extend(output_args(format));
        args
    }

    async fn run_listing(&self) -> Result<String, CaptureError> {
        let output = Command::new(&self.ffmpeg)
            .args(self.backend.listing_args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CaptureError::ListingFailed(format!("{}: {}", self.ffmpeg.display(), e)))?;

        // ffmpeg exits non-zero after listing; the text is still valid
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

impl<B: CaptureBackend> CaptureSource for FfmpegCapture<B> {
    fn platform(&self) -> &'static str {
        B::PLATFORM
    }

    async fn list_devices(&self) -> Vec<Device> {
        let devices = match self
            .run_listing()
            .await
            .and_then(|listing| self.backend.parse_devices(&listing))
        {
            Ok(devices) => devices,
            Err(e) => {
                tracing::error!("Failed to list audio devices: {}", e);
                Vec::new()
            }
        };

        if devices.is_empty() {
            tracing::warn!("No capture devices parsed, offering the default device");
            return vec![self.backend.fallback_device()];
        }

        tracing::info!("Discovered {} audio devices on {}", devices.len(), B::PLATFORM);
        devices
    }

    fn start(&mut self, device_id: &str, format: AudioFormat) -> Result<ByteStream, CaptureError> {
        self.stop();

        if device_id.trim().is_empty() {
            return Err(CaptureError::DeviceNotFound("empty device id".to_string()));
        }

        let args = self.capture_args(device_id, &format);
        tracing::info!(
            "Starting capture from {}: {}Hz, {}ch, {}bit",
            device_id,
            format.sample_rate,
            format.channels,
            format.bits_per_sample
        );
        tracing::debug!("Spawning {} {}", self.ffmpeg.display(), args.join(" "));

        let mut command = Command::new(&self.ffmpeg);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if cfg!(windows) {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command
            .spawn()
            .map_err(|e| CaptureError::ProcessSpawnFailed(format!("{}: {}", self.ffmpeg.display(), e)))?;

        // child is killed on drop if anything below fails
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::ProcessSpawnFailed("stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        let (sink, stream) = byte_stream(device_id, STREAM_DEPTH);
        let gate = sink.gate().clone();
        let reader = tokio::spawn(read_stdout(stdout, sink, self.read_chunk));

        tracing::info!("Capture process started (pid {:?})", child.id());
        self.session = Some(ActiveProcess {
            device_id: device_id.to_string(),
            child,
            gate,
            reader,
        });
        self.last_state = SessionState::Running;

        Ok(stream)
    }

    fn stop(&mut self) {
        let Some(process) = self.session.take() else {
            return;
        };

        process.gate.revoke();
        process.reader.abort();
        self.last_state = SessionState::Stopped;
        tracing::info!("Stopping audio capture on {}", process.device_id);

        terminate(process.child, self.grace);
    }

    fn state(&self) -> SessionState {
        match &self.session {
            Some(process) => process.gate.state(),
            None => self.last_state,
        }
    }
}

impl<B: CaptureBackend> Drop for FfmpegCapture<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forward stdout into the session until EOF, error or revocation
async fn read_stdout(mut stdout: ChildStdout, sink: ByteSink, chunk: usize) {
    let mut buffer = BytesMut::with_capacity(chunk);
    let mut total: u64 = 0;

    loop {
        buffer.reserve(chunk);
        match stdout.read_buf(&mut buffer).await {
            Ok(0) => {
                tracing::warn!("Capture process closed its output after {} bytes", total);
                sink.fail("capture process exited");
                break;
            }
            Ok(read) => {
                total += read as u64;
                if !sink.send(buffer.split().freeze()).await {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Reading capture output failed: {}", e);
                sink.fail(e.to_string());
                break;
            }
        }
    }
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.to_ascii_lowercase().contains("error") {
            tracing::error!("ffmpeg: {}", line);
        } else {
            tracing::debug!("ffmpeg: {}", line);
        }
    }
}

/// How a stopped capture process went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    AlreadyExited,
    Exited,
    Killed,
}

/// Ask the process to exit, force-kill it after `grace`.
///
/// Both steps are skipped for a process that already exited.
fn terminate(mut child: Child, grace: Duration) {
    if has_exited(&mut child) {
        return;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(shut_down(child, grace));
        }
        Err(_) => {
            // no runtime left to run the grace timer
            let _ = child.start_kill();
        }
    }
}

fn has_exited(child: &mut Child) -> bool {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!("Capture process already exited ({})", status);
            true
        }
        Ok(None) => false,
        Err(e) => {
            tracing::warn!("Could not poll capture process: {}", e);
            false
        }
    }
}

async fn shut_down(mut child: Child, grace: Duration) -> Shutdown {
    if has_exited(&mut child) {
        return Shutdown::AlreadyExited;
    }

    request_exit(&mut child).await;
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!("Capture process exited ({})", status);
            Shutdown::Exited
        }
        Ok(Err(e)) => {
            tracing::warn!("Waiting for capture process failed: {}", e);
            force_kill(&mut child).await
        }
        Err(_) => {
            tracing::warn!("Force killing capture process");
            force_kill(&mut child).await
        }
    }
}

async fn force_kill(child: &mut Child) -> Shutdown {
    if let Err(e) = child.kill().await {
        tracing::debug!("Force kill skipped: {}", e);
    }
    Shutdown::Killed
}

#[cfg(unix)]
async fn request_exit(child: &mut Child) {
    // id() is None once the child has been reaped
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to our own unreaped child
        let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if result != 0 {
            tracing::debug!("SIGTERM to {} failed: {}", pid, std::io::Error::last_os_error());
        }
    }
}

#[cfg(windows)]
async fn request_exit(child: &mut Child) {
    use tokio::io::AsyncWriteExt;

    // ffmpeg quits cleanly on 'q' from stdin
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"q").await;
    }
}

#[cfg(not(any(unix, windows)))]
async fn request_exit(child: &mut Child) {
    let _ = child.start_kill();
}
