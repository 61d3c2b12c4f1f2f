//! Remote control through chat mentions.
//!
//! Inbound messages arrive either pushed (Socket Mode) or pulled (history
//! polling). Both feed the same [`CommandDispatcher`], which deduplicates,
//! parses and executes them against the [`CaptureScheduler`](crate::scheduler::CaptureScheduler).

mod dispatcher;
mod listener;
mod parser;

pub use dispatcher::{CommandDispatcher, CommandOutcome};
pub use listener::{CommandListener, PollingListener};
pub use parser::{CommandParser, ParsedCommand, parse_duration_token};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::notification::DeliveryError;

/// A chat message that may carry a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Conversation id the message was posted in; replies go there.
    pub channel: String,
    /// Transport timestamp, unique per channel.
    pub ts: String,
    pub user: Option<String>,
    pub text: String,
}

/// Pull access to recent channel messages.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// User id of the bot itself, used to skip its own messages.
    async fn bot_user_id(&self) -> Result<Option<String>, DeliveryError>;

    /// Turn a channel name into the conversation id history calls need.
    async fn resolve_channel(&self, channel: &str) -> Result<String, DeliveryError>;

    /// Messages newer than `oldest`, newest first.
    async fn fetch_since(
        &self,
        channel_id: &str,
        oldest: Option<&str>,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, DeliveryError>;
}

/// How inbound messages are acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    /// Socket Mode when an app token is configured, polling otherwise or
    /// when Socket Mode is refused.
    #[default]
    Auto,
    Socket,
    Polling,
}

/// Command listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub mode: BotMode,
    /// Literal word that addresses the bot, besides a real `<@U...>` mention.
    pub mention: String,
    pub poll_interval_secs: u64,
    pub poll_error_backoff_secs: u64,
    /// Messages fetched per poll.
    pub poll_limit: usize,
    /// Answer unknown commands with a hint instead of staying silent.
    pub reply_to_unknown: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: BotMode::Auto,
            mention: "@bot".to_string(),
            poll_interval_secs: 5,
            poll_error_backoff_secs: 10,
            poll_limit: 10,
            reply_to_unknown: false,
        }
    }
}

impl BotConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn poll_error_backoff(&self) -> Duration {
        Duration::from_secs(self.poll_error_backoff_secs.max(1))
    }
}
