//! Per-session configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::RetentionPolicy;
use crate::{Error, Result};

/// Default bound on a single capture call.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest session accepted: one year.
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Parameters of one capture session. Immutable once the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Time between the start of two captures.
    pub interval: Duration,
    /// Wall-clock length of the session.
    pub total_duration: Duration,
    pub output_dir: PathBuf,
    pub filename_prefix: String,
    pub max_stored_images: usize,
    pub cleanup_enabled: bool,
    /// Bound on one capture call; a hung device becomes a capture fault.
    pub capture_timeout: Duration,
}

impl SessionConfig {
    pub fn new(interval: Duration, total_duration: Duration, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            interval,
            total_duration,
            output_dir: output_dir.into(),
            filename_prefix: "timelapse_".to_string(),
            max_stored_images: 1000,
            cleanup_enabled: false,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }

    /// Same storage settings with a different schedule.
    pub fn with_schedule(&self, interval: Duration, total_duration: Duration) -> Self {
        Self {
            interval,
            total_duration,
            ..self.clone()
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            cleanup_enabled: self.cleanup_enabled,
            max_images: self.max_stored_images,
        }
    }

    /// Reject parameters that can never produce a meaningful session.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::validation("interval must be greater than zero"));
        }
        if self.total_duration.is_zero() {
            return Err(Error::validation("duration must be greater than zero"));
        }
        if self.total_duration > MAX_SESSION_DURATION {
            return Err(Error::validation(format!(
                "duration ({}s) exceeds the maximum of {}s",
                self.total_duration.as_secs(),
                MAX_SESSION_DURATION.as_secs()
            )));
        }
        if self.interval > self.total_duration {
            return Err(Error::validation(format!(
                "interval ({}s) exceeds duration ({}s)",
                self.interval.as_secs(),
                self.total_duration.as_secs()
            )));
        }
        if self.capture_timeout.is_zero() {
            return Err(Error::validation("capture timeout must be greater than zero"));
        }
        if self.cleanup_enabled && self.max_stored_images == 0 {
            return Err(Error::validation(
                "max_stored_images must be at least 1 when cleanup is enabled",
            ));
        }
        if self.filename_prefix.contains(['/', '\\']) {
            return Err(Error::validation(format!(
                "filename prefix {:?} must not contain a path separator",
                self.filename_prefix
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::validation("output directory must be set"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SessionConfig {
        SessionConfig::new(
            Duration::from_secs(30),
            Duration::from_secs(600),
            "/tmp/frames",
        )
    }

    #[test]
    fn test_valid_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_schedules() {
        let zero = base().with_schedule(Duration::ZERO, Duration::from_secs(10));
        assert!(zero.validate().unwrap_err().is_config_fault());

        let inverted = base().with_schedule(Duration::from_secs(60), Duration::from_secs(30));
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_rejects_duration_beyond_ceiling() {
        let at_limit = base().with_schedule(Duration::from_secs(1), MAX_SESSION_DURATION);
        assert!(at_limit.validate().is_ok());

        let huge = base().with_schedule(
            Duration::from_secs(1),
            Duration::from_secs(4_000_000_000_000_000 * 3600),
        );
        assert!(huge.validate().unwrap_err().is_config_fault());

        let max = base().with_schedule(Duration::from_secs(1), Duration::MAX);
        assert!(max.validate().is_err());
    }

    #[test]
    fn test_rejects_prefix_with_separator() {
        let config = SessionConfig {
            filename_prefix: "../escape_".to_string(),
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_schedule_keeps_storage() {
        let config = SessionConfig {
            max_stored_images: 7,
            cleanup_enabled: true,
            ..base()
        };
        let rescheduled = config.with_schedule(Duration::from_secs(5), Duration::from_secs(50));
        assert_eq!(rescheduled.retention(), config.retention());
        assert_eq!(rescheduled.interval, Duration::from_secs(5));
    }
}
