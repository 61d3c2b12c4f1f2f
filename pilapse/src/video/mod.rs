//! Post-session video encoding.
//!
//! Stitches the stills of a finished session into an H.264 video with
//! ffmpeg. Runs detached from the session; failures are logged only.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::{Error, Result};

/// Video settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    pub fps: u32,
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// File name of the video, written next to the stills.
    pub output_name: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fps: 24,
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            output_name: "timelapse_video.mp4".to_string(),
        }
    }
}

/// Runs ffmpeg over a directory of stills.
#[derive(Debug, Clone)]
pub struct VideoEncoder {
    config: VideoConfig,
}

impl VideoEncoder {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn output_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.config.output_name)
    }

    /// ffmpeg arguments for encoding `dir/<prefix>*.jpg`.
    pub fn build_args(&self, dir: &Path, prefix: &str) -> Vec<String> {
        let pattern = dir.join(format!("{prefix}*.jpg"));
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-framerate".to_string(),
            self.config.fps.max(1).to_string(),
            "-pattern_type".to_string(),
            "glob".to_string(),
            "-i".to_string(),
            pattern.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            self.output_path(dir).to_string_lossy().into_owned(),
        ]
    }

    async fn ffmpeg_available(&self) -> bool {
        Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Encode the stills in `dir`. Returns `Ok(None)` when skipped.
    pub async fn encode(&self, dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
        if !self.config.enabled {
            return Ok(None);
        }
        if !self.ffmpeg_available().await {
            warn!(ffmpeg = %self.config.ffmpeg_path, "ffmpeg not found, skipping video creation");
            return Ok(None);
        }

        let output_path = self.output_path(dir);
        info!(dir = %dir.display(), fps = self.config.fps, "Creating timelapse video");

        let output = Command::new(&self.config.ffmpeg_path)
            .args(self.build_args(dir, prefix))
            .env("LC_ALL", "C")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Other(format!("Failed to run ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("ffmpeg failed: {}", stderr);
            return Err(Error::Other(format!(
                "ffmpeg failed with exit code: {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        debug!("ffmpeg output: {}", String::from_utf8_lossy(&output.stderr));
        info!(path = %output_path.display(), "Video created");
        Ok(Some(output_path))
    }

    /// Encode in a detached task.
    pub fn spawn_encode(self: &Arc<Self>, dir: PathBuf, prefix: String) {
        let encoder = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = encoder.encode(&dir, &prefix).await {
                warn!(error = %e, "Video creation failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let encoder = VideoEncoder::new(VideoConfig {
            enabled: true,
            fps: 30,
            ffmpeg_path: "ffmpeg".to_string(),
            output_name: "out.mp4".to_string(),
        });
        let args = encoder.build_args(Path::new("/data/frames"), "garden_");

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "/data/frames/garden_*.jpg");
        let rate = args.iter().position(|a| a == "-framerate").unwrap();
        assert_eq!(args[rate + 1], "30");
        assert_eq!(args.last().unwrap(), "/data/frames/out.mp4");
    }

    #[tokio::test]
    async fn test_disabled_or_missing_ffmpeg_skips() {
        let dir = tempfile::tempdir().unwrap();

        let disabled = VideoEncoder::new(VideoConfig::default());
        assert_eq!(disabled.encode(dir.path(), "x_").await.unwrap(), None);

        let missing = VideoEncoder::new(VideoConfig {
            enabled: true,
            ffmpeg_path: "/nonexistent/ffmpeg-binary".to_string(),
            ..Default::default()
        });
        assert_eq!(missing.encode(dir.path(), "x_").await.unwrap(), None);
    }
}
