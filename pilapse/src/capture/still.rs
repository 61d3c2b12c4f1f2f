//! Capturer backed by the `rpicam-still` / `libcamera-still` command line tool.
//!
//! Each capture spawns one process. High-resolution frames are written
//! straight to the destination file; preview frames are streamed to stdout
//! (`-o -`) and collected in memory.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CaptureError, CaptureMode, Capturer, Resolution};

/// Camera settings for the still-command capturer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StillCommandConfig {
    /// Program to invoke (`rpicam-still` on Bookworm, `libcamera-still` on Bullseye).
    pub command: String,
    /// Full resolution for stored frames.
    pub resolution: Resolution,
    /// JPEG quality for stored frames (1-100).
    pub quality: u8,
    /// Resolution of snapshots sent to chat.
    pub preview_resolution: Resolution,
    /// JPEG quality of snapshots sent to chat (1-100).
    pub preview_quality: u8,
    pub hflip: bool,
    pub vflip: bool,
    /// Sensor settle time before the shutter fires, in milliseconds.
    pub settle_ms: u64,
    /// Extra arguments passed through verbatim (exposure, focus, AWB...).
    pub extra_args: Vec<String>,
}

impl Default for StillCommandConfig {
    fn default() -> Self {
        Self {
            command: "rpicam-still".to_string(),
            resolution: Resolution::new(4608, 2592),
            quality: 93,
            preview_resolution: Resolution::new(640, 480),
            preview_quality: 30,
            hflip: false,
            vflip: false,
            settle_ms: 500,
            extra_args: Vec::new(),
        }
    }
}

/// Capturer driving a still-capture CLI.
pub struct StillCommandCapturer {
    config: StillCommandConfig,
    mode: CaptureMode,
    size: Resolution,
    probed: bool,
}

impl StillCommandCapturer {
    pub fn new(config: StillCommandConfig) -> Self {
        let size = config.resolution;
        Self {
            config,
            mode: CaptureMode::HighRes,
            size,
            probed: false,
        }
    }

    fn quality(&self) -> u8 {
        match self.mode {
            CaptureMode::HighRes => self.config.quality,
            CaptureMode::PreviewRes => self.config.preview_quality,
        }
    }

    fn still_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("--nopreview")
            .arg("--immediate")
            .args(["--timeout", &self.config.settle_ms.max(1).to_string()])
            .args(["--width", &self.size.width.to_string()])
            .args(["--height", &self.size.height.to_string()])
            .args(["--quality", &self.quality().to_string()])
            .args(["--encoding", "jpg"]);
        if self.config.hflip {
            cmd.arg("--hflip");
        }
        if self.config.vflip {
            cmd.arg("--vflip");
        }
        cmd.args(&self.config.extra_args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run the command to completion and return its stdout.
    async fn run(&self, mut cmd: Command) -> Result<Vec<u8>, CaptureError> {
        let child = cmd.spawn().map_err(|e| {
            CaptureError::DeviceUnavailable(format!(
                "failed to spawn {}: {}",
                self.config.command, e
            ))
        })?;

        let output = child.wait_with_output().await.map_err(|e| {
            CaptureError::Failed(format!("failed to wait for {}: {}", self.config.command, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty());
            return Err(CaptureError::Failed(format!(
                "{} exited with code {}: {}",
                self.config.command,
                output.status.code().unwrap_or(-1),
                last_line.unwrap_or("no output").trim()
            )));
        }

        Ok(output.stdout)
    }

    /// Verify a camera is attached. Only done once per capturer.
    async fn probe(&mut self) -> Result<(), CaptureError> {
        if self.probed {
            return Ok(());
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.arg("--list-cameras")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let stdout = self.run(cmd).await.map_err(|e| match e {
            CaptureError::Failed(msg) => CaptureError::DeviceUnavailable(msg),
            other => other,
        })?;

        let listing = String::from_utf8_lossy(&stdout);
        if listing.contains("No cameras available") {
            return Err(CaptureError::DeviceUnavailable(
                "no cameras detected".to_string(),
            ));
        }

        if let Some(first) = listing.lines().find(|l| l.trim_start().starts_with("0 :")) {
            info!(camera = %first.trim(), "Camera detected");
        }
        self.probed = true;
        Ok(())
    }
}

#[async_trait]
impl Capturer for StillCommandCapturer {
    fn name(&self) -> &'static str {
        "still-command"
    }

    async fn configure(&mut self, mode: CaptureMode, size: Resolution) -> Result<(), CaptureError> {
        self.probe().await?;
        if self.mode != mode || self.size != size {
            debug!(%mode, %size, "Switching camera mode");
        }
        self.mode = mode;
        self.size = size;
        Ok(())
    }

    async fn capture_to_file(&mut self, path: &Path) -> Result<(), CaptureError> {
        let mut cmd = self.still_command();
        cmd.arg("--output").arg(path);
        self.run(cmd).await?;

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            Ok(_) => Err(CaptureError::Failed(format!(
                "{} produced an empty file",
                path.display()
            ))),
            Err(e) => Err(CaptureError::Failed(format!(
                "{} was not written: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn capture_to_memory(&mut self) -> Result<Vec<u8>, CaptureError> {
        let mut cmd = self.still_command();
        cmd.args(["--output", "-"]);
        let bytes = self.run(cmd).await?;
        if bytes.is_empty() {
            warn!("Still command returned no image data");
            return Err(CaptureError::Failed("no image data on stdout".to_string()));
        }
        Ok(bytes)
    }

    async fn close(&mut self) {
        // Each capture is its own process; nothing stays open between calls.
        self.probed = false;
    }
}
