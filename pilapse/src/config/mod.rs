//! Application configuration.
//!
//! Loaded from a TOML file where every section is optional, then overridden
//! by environment variables (a `.env` file is honoured by `main`). Paths
//! accept `~` and `$VAR` / `${VAR}`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capture::StillCommandConfig;
use crate::command::BotConfig;
use crate::health::{DEFAULT_THERMAL_ZONE, HealthThresholds};
use crate::logging::LoggingConfig;
use crate::notification::NotificationPolicy;
use crate::scheduler::{CaptureProfile, SchedulerOptions, SessionConfig};
use crate::slack::SlackConfig;
use crate::video::{VideoConfig, VideoEncoder};
use crate::{Error, Result};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "pilapse.toml";

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap());

/// Replace `$VAR` / `${VAR}` references. Unknown variables are left as written.
pub fn expand_env<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VAR
        .replace_all(raw, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// [`expand_env`] plus a leading `~`.
pub fn expand_path<F>(raw: &str, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let expanded = expand_env(raw, lookup);

    if expanded == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = expanded.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(expanded)
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// `[session]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub interval_secs: u64,
    pub duration_secs: u64,
    pub output_dir: String,
    pub filename_prefix: String,
    pub capture_timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            duration_secs: 3600,
            output_dir: "~/timelapse_images".to_string(),
            filename_prefix: "timelapse_".to_string(),
            capture_timeout_secs: 30,
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub cleanup_enabled: bool,
    pub max_images: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            cleanup_enabled: false,
            max_images: 1000,
        }
    }
}

/// `[health]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub thermal_zone_path: PathBuf,
    /// Read sysinfo's hardware sensors when the thermal zone is missing.
    pub sensor_fallback: bool,
    #[serde(flatten)]
    pub thresholds: HealthThresholds,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            thermal_zone_path: PathBuf::from(DEFAULT_THERMAL_ZONE),
            sensor_fallback: true,
            thresholds: HealthThresholds::default(),
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSection,
    pub storage: StorageSection,
    pub camera: StillCommandConfig,
    pub health: HealthSection,
    pub notifications: NotificationPolicy,
    pub slack: SlackConfig,
    pub bot: BotConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path`, or [`DEFAULT_CONFIG_FILE`] when `None`, then apply the
    /// environment. A missing default file yields the built-in defaults; a
    /// missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "Loaded config file");
                Self::from_toml(&text)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
            Err(e) => return Err(Error::io_path("reading config file", &path, e)),
        };

        config.apply_env(env_lookup);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides and path expansion.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty("SLACK_BOT_TOKEN") {
            self.slack.bot_token = token;
            self.slack.enabled = true;
        }
        if let Some(token) = non_empty("SLACK_APP_TOKEN") {
            self.slack.app_token = token;
        }
        if let Some(channel) = non_empty("SLACK_CHANNEL") {
            self.slack.channel = channel;
        }
        if let Some(dir) = non_empty("PILAPSE_OUTPUT_DIR") {
            self.session.output_dir = dir;
        }

        self.session.output_dir = expand_path(&self.session.output_dir, &lookup)
            .to_string_lossy()
            .into_owned();
        self.logging.dir = expand_path(&self.logging.dir.to_string_lossy(), &lookup);
        self.slack.bot_token = expand_env(&self.slack.bot_token, &lookup);
    }

    /// Check everything that can be checked without starting a session.
    pub fn validate(&self) -> Result<()> {
        self.notifications.validate()?;
        if self.session.output_dir.trim().is_empty() {
            return Err(Error::config("session.output_dir must not be empty"));
        }
        if self.video.enabled && self.video.fps == 0 {
            return Err(Error::config("video.fps must be at least 1"));
        }
        Ok(())
    }

    /// Session parameters from `[session]` and `[storage]`.
    ///
    /// Not validated here; the scheduler validates on start.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            interval: Duration::from_secs(self.session.interval_secs),
            total_duration: Duration::from_secs(self.session.duration_secs),
            output_dir: PathBuf::from(&self.session.output_dir),
            filename_prefix: self.session.filename_prefix.clone(),
            max_stored_images: self.storage.max_images,
            cleanup_enabled: self.storage.cleanup_enabled,
            capture_timeout: Duration::from_secs(self.session.capture_timeout_secs),
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            profile: CaptureProfile::from(&self.camera),
            thresholds: self.health.thresholds,
            thermal_zone: self.health.thermal_zone_path.clone(),
            sensor_fallback: self.health.sensor_fallback,
            snapshot_defaults: self.session_config(),
            video: self
                .video
                .enabled
                .then(|| Arc::new(VideoEncoder::new(self.video.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::BotMode;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.session.interval_secs, 30);
        assert_eq!(config.notifications.progress_every_n, 10);
        assert_eq!(config.bot.mode, BotMode::Auto);
    }

    #[test]
    fn test_sections_parse() {
        let config = AppConfig::from_toml(
            r##"
            [session]
            interval_secs = 10
            duration_secs = 600
            output_dir = "/data/frames"
            filename_prefix = "garden_"

            [storage]
            cleanup_enabled = true
            max_images = 3

            [health]
            temperature_warning_c = 70.0
            low_disk_warning_mb = 500

            [notifications]
            progress_every_n = 5
            image_delivery = ["legacy_upload", "text_description"]

            [slack]
            enabled = true
            bot_token = "xoxb-1"
            channel = "#garden"

            [bot]
            mode = "polling"
            mention = "@cam"
            "##,
        )
        .unwrap();

        let session = config.session_config();
        assert_eq!(session.interval, Duration::from_secs(10));
        assert_eq!(session.total_duration, Duration::from_secs(600));
        assert_eq!(session.filename_prefix, "garden_");
        assert_eq!(session.max_stored_images, 3);
        assert!(session.cleanup_enabled);
        assert_eq!(config.health.thresholds.low_disk_warning_mb, 500);
        assert_eq!(config.notifications.progress_every_n, 5);
        assert_eq!(config.bot.mode, BotMode::Polling);
        assert_eq!(config.bot.mention, "@cam");
        assert!(config.slack.is_enabled());
    }

    #[test]
    fn test_env_overrides_and_expansion() {
        let mut config = AppConfig::default();
        config.session.output_dir = "${DATA}/frames".to_string();

        config.apply_env(|name| match name {
            "SLACK_BOT_TOKEN" => Some("xoxb-env".to_string()),
            "SLACK_CHANNEL" => Some("C0123456789".to_string()),
            "DATA" => Some("/mnt/usb".to_string()),
            _ => None,
        });

        assert!(config.slack.enabled);
        assert_eq!(config.slack.bot_token, "xoxb-env");
        assert_eq!(config.slack.channel, "C0123456789");
        assert_eq!(config.session.output_dir, "/mnt/usb/frames");
    }

    #[test]
    fn test_bot_token_only_expands_variables() {
        let mut config = AppConfig::default();
        config.slack.bot_token = "~/xoxb-literal".to_string();
        config.apply_env(no_env);
        assert_eq!(config.slack.bot_token, "~/xoxb-literal");

        config.slack.bot_token = "${TOKEN}".to_string();
        config.apply_env(|name| (name == "TOKEN").then(|| "xoxb-from-var".to_string()));
        assert_eq!(config.slack.bot_token, "xoxb-from-var");
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(
            expand_path("$HOME_X/a/${SUB}", |n| match n {
                "HOME_X" => Some("/h".into()),
                "SUB" => Some("b".into()),
                _ => None,
            }),
            PathBuf::from("/h/a/b")
        );
        assert_eq!(expand_path("/x/$MISSING", no_env), PathBuf::from("/x/$MISSING"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/pics", no_env), home.join("pics"));
        }
    }

    #[test]
    fn test_load_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pilapse.toml");
        std::fs::write(&path, "[video]\nenabled = true\nfps = 0\n").unwrap();
        assert!(AppConfig::load(Some(&path)).unwrap_err().is_config_fault());

        std::fs::write(&path, "[session]\ninterval_secs = 5\n").unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap().session.interval_secs, 5);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            AppConfig::load(Some(&missing)),
            Err(Error::IoPath { .. })
        ));

        std::fs::write(&path, "[session\n").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(Error::Toml(_))));
    }
}
