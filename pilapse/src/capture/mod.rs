//! Camera capture capability.
//!
//! The scheduler only ever talks to a camera through the [`Capturer`] trait.
//! Implementations are stateful: a capturer is switched between the
//! high-resolution mode used for stored frames and the preview mode used for
//! chat snapshots, and a mode switch must never overlap an in-flight capture.
//! Callers enforce that by owning the capturer behind a single mutex.

mod naming;
mod still;

pub use naming::{image_filename, next_image_path, FILENAME_TIME_FORMAT};
pub use still::{StillCommandCapturer, StillCommandConfig};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sensor mode a capturer can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Full-size stills written to disk.
    HighRes,
    /// Small, low-quality frames kept in memory for notifications.
    PreviewRes,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighRes => write!(f, "high-res"),
            Self::PreviewRes => write!(f, "preview"),
        }
    }
}

/// Output frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Camera faults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The device (or its driver tooling) cannot be reached at all.
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device answered but the capture did not produce an image.
    #[error("capture failed: {0}")]
    Failed(String),

    /// The capture call did not return within the configured bound.
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
}

impl CaptureError {
    /// Fatal faults end the running session; everything else is retried on
    /// the next scheduled iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_))
    }
}

/// Opaque camera handle.
#[async_trait]
pub trait Capturer: Send + Sync {
    /// Short identifier used in logs and status output.
    fn name(&self) -> &'static str;

    /// Switch the sensor mode. Must not be called while a capture is in flight.
    async fn configure(&mut self, mode: CaptureMode, size: Resolution) -> Result<(), CaptureError>;

    /// Capture one still in the current mode and write it to `path`.
    async fn capture_to_file(&mut self, path: &Path) -> Result<(), CaptureError>;

    /// Capture one still in the current mode and return the encoded JPEG bytes.
    async fn capture_to_memory(&mut self) -> Result<Vec<u8>, CaptureError>;

    /// Release the device. Best effort; called on every shutdown path.
    async fn close(&mut self) {}
}
