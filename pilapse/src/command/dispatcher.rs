//! Command execution.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::InboundMessage;
use super::parser::{CommandParser, ParsedCommand};
use crate::Error;
use crate::notification::{MessageSink, OutgoingMessage};
use crate::scheduler::{CaptureScheduler, SessionStatus};

/// Number of handled messages remembered for deduplication.
const SEEN_CAPACITY: usize = 512;

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Parsed and executed; `replied` tells whether an answer was posted.
    Handled { command: ParsedCommand, replied: bool },
    /// Does not address the bot, or an unknown command answered by silence.
    Ignored,
    /// Already handled once.
    Duplicate,
}

/// Bounded set of `(channel, ts)` keys.
#[derive(Debug, Default)]
struct SeenMessages {
    keys: HashSet<(String, String)>,
    order: VecDeque<(String, String)>,
}

impl SeenMessages {
    /// Record `key`; returns false if it was already present.
    fn insert(&mut self, key: (String, String)) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        if self.order.len() >= SEEN_CAPACITY
            && let Some(oldest) = self.order.pop_front()
        {
            self.keys.remove(&oldest);
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

/// Turns chat mentions into scheduler calls and posts the replies.
pub struct CommandDispatcher {
    scheduler: CaptureScheduler,
    sink: Arc<dyn MessageSink>,
    parser: CommandParser,
    reply_to_unknown: bool,
    seen: Mutex<SeenMessages>,
}

impl CommandDispatcher {
    pub fn new(
        scheduler: CaptureScheduler,
        sink: Arc<dyn MessageSink>,
        parser: CommandParser,
        reply_to_unknown: bool,
    ) -> Self {
        Self {
            scheduler,
            sink,
            parser,
            reply_to_unknown,
            seen: Mutex::new(SeenMessages::default()),
        }
    }

    pub fn scheduler(&self) -> &CaptureScheduler {
        &self.scheduler
    }

    /// Handle one inbound message at most once.
    pub async fn handle(&self, message: InboundMessage) -> CommandOutcome {
        if !self
            .seen
            .lock()
            .insert((message.channel.clone(), message.ts.clone()))
        {
            debug!(channel = %message.channel, ts = %message.ts, "Skipping duplicate message");
            return CommandOutcome::Duplicate;
        }

        if !self.parser.mentions_bot(&message.text) {
            return CommandOutcome::Ignored;
        }

        let command = self.parser.parse(&message.text);
        info!(
            command = command.name(),
            channel = %message.channel,
            user = message.user.as_deref().unwrap_or("unknown"),
            "Processing mention"
        );

        let Some(reply) = self.execute(command).await else {
            return CommandOutcome::Ignored;
        };

        let replied = match self
            .sink
            .post_text(&message.channel, &OutgoingMessage::plain(reply))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, command = command.name(), "Failed to send command reply");
                false
            }
        };
        CommandOutcome::Handled { command, replied }
    }

    /// Run `command`; returns the reply text, if any.
    pub async fn execute(&self, command: ParsedCommand) -> Option<String> {
        match command {
            ParsedCommand::Photo => Some(match self.scheduler.capture_once(true).await {
                Ok(outcome) => {
                    let name = outcome
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    format!("📸 Photo captured successfully! `{name}`")
                }
                Err(e) => {
                    warn!(error = %e, "On-demand photo failed");
                    "❌ Failed to capture photo".to_string()
                }
            }),
            ParsedCommand::Status => Some(format!("📊 *Camera Status*\n{}", self.status_text())),
            ParsedCommand::Start { interval, duration } => Some(self.start(interval, duration)),
            ParsedCommand::Stop => Some(if self.scheduler.stop() {
                "⏹️ Stopping timelapse...".to_string()
            } else {
                "⏸️ No timelapse is running".to_string()
            }),
            ParsedCommand::Help => Some(help_text(self.parser.mention_word())),
            ParsedCommand::Unrecognized => self.reply_to_unknown.then(|| {
                format!(
                    "🤔 Unknown command. Try `{} help`.",
                    self.parser.mention_word()
                )
            }),
        }
    }

    fn start(&self, interval: Duration, duration: Duration) -> String {
        let config = self
            .scheduler
            .options()
            .snapshot_defaults
            .with_schedule(interval, duration);

        match self.scheduler.start(config) {
            Ok(()) => format!(
                "🎬 Timelapse started!\n• Interval: {}s\n• Duration: {}s",
                interval.as_secs(),
                duration.as_secs()
            ),
            Err(Error::AlreadyRunning) => format!(
                "⚠️ A timelapse is already running. Use `{} stop` first.",
                self.parser.mention_word()
            ),
            Err(e) => {
                warn!(error = %e, "Start command rejected");
                format!("❌ Error executing command: {e}")
            }
        }
    }

    /// Human-readable status block.
    pub fn status_text(&self) -> String {
        let state = self.scheduler.status();
        let now = Local::now();
        let mut lines = Vec::with_capacity(4);

        lines.push(if self.scheduler.camera_available() {
            "• Camera: ✅ Connected".to_string()
        } else {
            "• Camera: ❌ Not connected".to_string()
        });

        lines.push(match state.status {
            SessionStatus::Running => format!(
                "• Timelapse: 🎬 Running ({}s elapsed, {}s remaining)",
                state.elapsed_at(now).unwrap_or_default().as_secs(),
                state.remaining_at(now).unwrap_or_default().as_secs()
            ),
            SessionStatus::Stopping => "• Timelapse: ⏹️ Stopping".to_string(),
            SessionStatus::Idle => "• Timelapse: ⏸️ Not running".to_string(),
        });

        lines.push(format!("• Images captured: {}", state.image_count));

        lines.push(if self.scheduler.dispatcher().is_enabled() {
            "• Slack notifications: ✅ Enabled".to_string()
        } else {
            "• Slack notifications: ❌ Disabled".to_string()
        });

        if let Some(err) = &state.last_error {
            lines.push(format!("• Last error: {err}"));
        }

        lines.join("\n")
    }
}

fn help_text(mention: &str) -> String {
    format!(
        "🤖 *Timelapse Bot Commands*\n\n\
         • `{m} photo` - Take a single photo\n\
         • `{m} status` - Show camera and system status\n\
         • `{m} start 60s 30m` - Start timelapse (interval duration)\n\
         • `{m} stop` - Stop current timelapse\n\
         • `{m} help` - Show this help message\n\n\
         *Examples:*\n\
         • `{m} start 30s 1h` - Take photo every 30 seconds for 1 hour\n\
         • `{m} start 5s 10m` - Take photo every 5 seconds for 10 minutes",
        m = mention
    )
}
