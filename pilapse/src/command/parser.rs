//! Command grammar.
//!
//! ```text
//! <mention> photo
//! <mention> status
//! <mention> start <n>[s|m|h] <n>[s|m|h]
//! <mention> stop
//! <mention> help
//! ```
//!
//! `<mention>` is either a real `<@U123>` user mention or the configured
//! mention word. Matching is case-insensitive; trailing words are ignored.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::{Error, Result};

static DURATION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([smh])?$").unwrap());

/// A decoded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedCommand {
    Photo,
    Status,
    Start { interval: Duration, duration: Duration },
    Stop,
    Help,
    Unrecognized,
}

impl ParsedCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Status => "status",
            Self::Start { .. } => "start",
            Self::Stop => "stop",
            Self::Help => "help",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Parse `30`, `30s`, `10m` or `1h` into a duration.
pub fn parse_duration_token(token: &str) -> Option<Duration> {
    let caps = DURATION_TOKEN.captures(token)?;
    let value: u64 = caps.get(1)?.as_str().parse().ok()?;
    let scale = match caps.get(2).map(|m| m.as_str()) {
        None | Some("s") => 1,
        Some("m") => 60,
        Some("h") => 3600,
        Some(_) => return None,
    };
    value.checked_mul(scale).map(Duration::from_secs)
}

/// Recognizes mentions of the bot and decodes the command after them.
#[derive(Debug, Clone)]
pub struct CommandParser {
    mention: Regex,
    word: String,
}

impl CommandParser {
    pub fn new(mention_word: &str) -> Result<Self> {
        let word = mention_word.trim();
        if word.is_empty() {
            return Err(Error::config("bot.mention must not be empty"));
        }

        let boundary = if word.chars().last().is_some_and(|c| c.is_alphanumeric()) {
            r"\b"
        } else {
            ""
        };
        let pattern = format!(
            r"(?is)(?:<@[A-Z0-9]+(?:\|[^>]*)?>|{}{})(.*)$",
            regex::escape(word),
            boundary
        );
        let mention = Regex::new(&pattern)
            .map_err(|e| Error::config(format!("invalid bot.mention {word:?}: {e}")))?;

        Ok(Self {
            mention,
            word: word.to_string(),
        })
    }

    /// The configured mention word.
    pub fn mention_word(&self) -> &str {
        &self.word
    }

    /// Whether `text` addresses the bot at all.
    pub fn mentions_bot(&self, text: &str) -> bool {
        self.mention.is_match(text)
    }

    /// Decode the command following the first mention.
    pub fn parse(&self, text: &str) -> ParsedCommand {
        let Some(rest) = self
            .mention
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase())
        else {
            return ParsedCommand::Unrecognized;
        };

        let mut words = rest.split_whitespace();
        match words.next() {
            Some("photo") => ParsedCommand::Photo,
            Some("status") => ParsedCommand::Status,
            Some("stop") => ParsedCommand::Stop,
            Some("help") => ParsedCommand::Help,
            Some("start") => {
                let interval = words.next().and_then(parse_duration_token);
                let duration = words.next().and_then(parse_duration_token);
                match (interval, duration) {
                    (Some(interval), Some(duration)) => ParsedCommand::Start { interval, duration },
                    _ => ParsedCommand::Unrecognized,
                }
            }
            _ => ParsedCommand::Unrecognized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CommandParser {
        CommandParser::new("@bot").unwrap()
    }

    #[test]
    fn test_start_with_units() {
        assert_eq!(
            parser().parse("@bot start 30s 10m"),
            ParsedCommand::Start {
                interval: Duration::from_secs(30),
                duration: Duration::from_secs(600),
            }
        );
        assert_eq!(
            parser().parse("@bot start 60s 1h"),
            ParsedCommand::Start {
                interval: Duration::from_secs(60),
                duration: Duration::from_secs(3600),
            }
        );
        assert_eq!(
            parser().parse("@BOT Start 5 90"),
            ParsedCommand::Start {
                interval: Duration::from_secs(5),
                duration: Duration::from_secs(90),
            }
        );
    }

    #[test]
    fn test_simple_commands() {
        let p = parser();
        assert_eq!(p.parse("@bot photo"), ParsedCommand::Photo);
        assert_eq!(p.parse("hey @bot status please"), ParsedCommand::Status);
        assert_eq!(p.parse("@bot stop"), ParsedCommand::Stop);
        assert_eq!(p.parse("@bot   help"), ParsedCommand::Help);
        assert_eq!(p.parse("<@U0LAN0Z89> photo"), ParsedCommand::Photo);
    }

    #[test]
    fn test_unrecognized() {
        let p = parser();
        assert_eq!(p.parse("@bot dance"), ParsedCommand::Unrecognized);
        assert_eq!(p.parse("@bot start 30s"), ParsedCommand::Unrecognized);
        assert_eq!(p.parse("@bot start 30x 10m"), ParsedCommand::Unrecognized);
        assert_eq!(p.parse("@bot"), ParsedCommand::Unrecognized);
        assert_eq!(p.parse("photo"), ParsedCommand::Unrecognized);
    }

    #[test]
    fn test_mention_detection() {
        let p = parser();
        assert!(p.mentions_bot("@bot status"));
        assert!(p.mentions_bot("<@U0LAN0Z89> status"));
        assert!(!p.mentions_bot("@botany is fun"));
        assert!(!p.mentions_bot("just chatting"));
    }

    #[test]
    fn test_duration_tokens() {
        assert_eq!(parse_duration_token("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration_token("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration_token("m"), None);
        assert_eq!(parse_duration_token("99999999999999999999h"), None);
    }
}
