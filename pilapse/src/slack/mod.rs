//! Slack transport.
//!
//! [`SlackClient`] speaks the Web API (messages, uploads, history) and
//! [`SocketModeListener`] receives app mentions over Socket Mode.

mod api;
mod client;
mod socket;

pub use client::{MAX_RATE_LIMIT_RETRIES, SlackClient};
pub use socket::SocketModeListener;

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Slack connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub enabled: bool,
    /// Bot token (`xoxb-...`).
    pub bot_token: String,
    /// App-level token (`xapp-...`), required for Socket Mode.
    pub app_token: String,
    /// Channel name (`#timelapse`) or id.
    pub channel: String,
    pub username: String,
    pub icon_emoji: String,
    /// Web API base URL.
    pub api_base: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            app_token: String::new(),
            channel: "#general".to_string(),
            username: "Pi Camera Bot".to_string(),
            icon_emoji: ":camera:".to_string(),
            api_base: "https://slack.com/api".to_string(),
        }
    }
}

impl SlackConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.bot_token.is_empty() && !self.channel.is_empty()
    }

    pub fn has_app_token(&self) -> bool {
        !self.app_token.is_empty()
    }
}

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}
