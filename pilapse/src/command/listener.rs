//! Inbound message acquisition.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::CommandDispatcher;
use super::{BotConfig, BotMode, HistorySource, InboundMessage};
use crate::Result;
use crate::slack::{SlackClient, SocketModeListener};

const INBOX_CAPACITY: usize = 32;

/// Orders Slack timestamps (`"1712345678.000200"`) numerically.
fn ts_key(ts: &str) -> (u64, u64) {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    (secs.parse().unwrap_or(0), frac.parse().unwrap_or(0))
}

/// Pull-based intake: fetches channel history on a fixed period.
///
/// Only messages newer than the listener's start are considered, so commands
/// posted while the bot was down are not replayed.
pub struct PollingListener {
    source: Arc<dyn HistorySource>,
    channel: String,
    interval: Duration,
    error_backoff: Duration,
    limit: usize,
    last_seen: Option<String>,
}

impl PollingListener {
    pub fn new(source: Arc<dyn HistorySource>, channel: impl Into<String>, config: &BotConfig) -> Self {
        Self {
            source,
            channel: channel.into(),
            interval: config.poll_interval(),
            error_backoff: config.poll_error_backoff(),
            limit: config.poll_limit.max(1),
            last_seen: None,
        }
    }

    /// Start from `ts` instead of the current time.
    pub fn with_last_seen(mut self, ts: impl Into<String>) -> Self {
        self.last_seen = Some(ts.into());
        self
    }

    pub fn last_seen(&self) -> Option<&str> {
        self.last_seen.as_deref()
    }

    /// Fetch once and forward new messages oldest first. Returns how many
    /// were forwarded.
    pub async fn poll_once(&mut self, tx: &mpsc::Sender<InboundMessage>) -> Result<usize> {
        let last_seen = self
            .last_seen
            .get_or_insert_with(|| format!("{}.000000", Utc::now().timestamp()))
            .clone();

        let channel_id = self.source.resolve_channel(&self.channel).await?;
        let bot_id = self.source.bot_user_id().await?;
        let mut messages = self
            .source
            .fetch_since(&channel_id, Some(&last_seen), self.limit)
            .await?;

        messages.retain(|m| ts_key(&m.ts) > ts_key(&last_seen));
        messages.sort_by_key(|m| ts_key(&m.ts));

        if let Some(newest) = messages.last() {
            self.last_seen = Some(newest.ts.clone());
        }

        let mut forwarded = 0;
        for message in messages {
            if bot_id.is_some() && message.user == bot_id {
                continue;
            }
            if tx.send(message).await.is_err() {
                break;
            }
            forwarded += 1;
        }
        Ok(forwarded)
    }

    /// Poll until `token` is cancelled or the receiver goes away.
    pub async fn run(mut self, tx: mpsc::Sender<InboundMessage>, token: CancellationToken) {
        info!(channel = %self.channel, interval = ?self.interval, "Polling for commands");

        loop {
            if token.is_cancelled() || tx.is_closed() {
                break;
            }

            let delay = match self.poll_once(&tx).await {
                Ok(n) => {
                    if n > 0 {
                        debug!(count = n, "Forwarded polled messages");
                    }
                    self.interval
                }
                Err(e) => {
                    error!(error = %e, "Error polling for commands");
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => break,
            }
        }

        debug!("Polling listener stopped");
    }
}

/// Runs the configured intake and feeds the dispatcher.
pub struct CommandListener {
    dispatcher: Arc<CommandDispatcher>,
    slack: Arc<SlackClient>,
    config: BotConfig,
}

impl CommandListener {
    pub fn new(dispatcher: Arc<CommandDispatcher>, slack: Arc<SlackClient>, config: BotConfig) -> Self {
        Self {
            dispatcher,
            slack,
            config,
        }
    }

    /// Listen until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<InboundMessage>(INBOX_CAPACITY);

        let dispatcher = Arc::clone(&self.dispatcher);
        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let outcome = dispatcher.handle(message).await;
                debug!(outcome = ?outcome, "Inbound message handled");
            }
        });

        let result = self.listen(tx, &token).await;

        if let Err(e) = worker.await {
            error!(error = %e, "Command worker failed");
        }
        result
    }

    async fn listen(&self, tx: mpsc::Sender<InboundMessage>, token: &CancellationToken) -> Result<()> {
        let use_socket = match self.config.mode {
            BotMode::Socket => true,
            BotMode::Polling => false,
            BotMode::Auto => self.slack.config().has_app_token(),
        };

        if use_socket {
            info!("Starting Socket Mode command listener");
            let socket = SocketModeListener::new(Arc::clone(&self.slack));
            match socket.run(tx.clone(), token.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if self.config.mode == BotMode::Auto => {
                    warn!(error = %e, "Socket Mode unavailable, falling back to polling");
                }
                Err(e) => return Err(e),
            }
        }

        let source: Arc<dyn HistorySource> = self.slack.clone();
        PollingListener::new(source, self.slack.config().channel.clone(), &self.config)
            .run(tx, token.clone())
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_ordering() {
        assert!(ts_key("1712345678.000200") > ts_key("1712345678.000100"));
        assert!(ts_key("1712345679.000000") > ts_key("1712345678.999999"));
        assert_eq!(ts_key("17"), (17, 0));
    }
}
