//! Notification events.
//!
//! Defines the events a capture session reports and how each one renders as
//! a chat message.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};

/// Width of the text progress bar, in cells.
const PROGRESS_BAR_WIDTH: usize = 20;

/// Tag of a [`NotificationEvent`]; rate-limit policy is keyed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Error,
    Warning,
    SessionStart,
    SessionStop,
    Progress,
    Photo,
    TemperatureAlert,
    DiskAlert,
}

impl EventKind {
    /// Whether the event is posted as a reply inside the session's
    /// conversation thread (when one exists).
    ///
    /// Failures and alerts always go to the top-level channel so they stay
    /// visible; `SessionStart` is the message that opens the thread.
    pub fn is_threaded(self) -> bool {
        matches!(self, Self::SessionStop | Self::Progress | Self::Photo)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::SessionStart => "session_start",
            Self::SessionStop => "session_stop",
            Self::Progress => "progress",
            Self::Photo => "photo",
            Self::TemperatureAlert => "temperature_alert",
            Self::DiskAlert => "disk_alert",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attachment colour hint understood by chat transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageColor {
    Good,
    Warning,
    Danger,
}

impl MessageColor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }
}

/// Encoded image carried by a [`NotificationEvent::Photo`].
#[derive(Clone)]
pub struct ImagePayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    /// A fatal or unexpected failure.
    Error {
        message: String,
        detail: Option<String>,
    },
    /// A retried or advisory condition.
    Warning { message: String },
    /// A capture session began.
    SessionStart {
        interval: Duration,
        duration: Duration,
        output_dir: PathBuf,
    },
    /// A capture session ended.
    SessionStop { image_count: u64, elapsed: Duration },
    /// An image was stored.
    Progress {
        image_count: u64,
        elapsed: Duration,
        remaining: Duration,
    },
    /// A low-resolution snapshot of the latest frame.
    Photo {
        image_count: u64,
        captured_at: DateTime<Local>,
        image: ImagePayload,
        /// Explicitly requested by an operator rather than produced by the schedule.
        on_demand: bool,
    },
    /// The device is running hot.
    TemperatureAlert { temperature_c: f32, threshold_c: f32 },
    /// The image volume is running out of space.
    DiskAlert { free_mb: f64, threshold_mb: u64 },
}

impl NotificationEvent {
    pub fn error(message: impl Into<String>, detail: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            detail,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Error { .. } => EventKind::Error,
            Self::Warning { .. } => EventKind::Warning,
            Self::SessionStart { .. } => EventKind::SessionStart,
            Self::SessionStop { .. } => EventKind::SessionStop,
            Self::Progress { .. } => EventKind::Progress,
            Self::Photo { .. } => EventKind::Photo,
            Self::TemperatureAlert { .. } => EventKind::TemperatureAlert,
            Self::DiskAlert { .. } => EventKind::DiskAlert,
        }
    }

    /// Running count used by the frequency gate, if the event has one.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Progress { image_count, .. } => Some(*image_count),
            Self::Photo {
                image_count,
                on_demand: false,
                ..
            } => Some(*image_count),
            _ => None,
        }
    }

    pub fn image(&self) -> Option<&ImagePayload> {
        match self {
            Self::Photo { image, .. } => Some(image),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Error { .. } => "Camera Error",
            Self::Warning { .. } => "Camera Warning",
            Self::SessionStart { .. } => "Timelapse Started",
            Self::SessionStop { .. } => "Timelapse Completed",
            Self::Progress { .. } => "Timelapse Progress",
            Self::Photo { .. } => "Photo Update",
            Self::TemperatureAlert { .. } => "Temperature Alert",
            Self::DiskAlert { .. } => "Disk Space Alert",
        }
    }

    pub fn color(&self) -> MessageColor {
        match self {
            Self::Error { .. } => MessageColor::Danger,
            Self::Warning { .. } | Self::TemperatureAlert { .. } | Self::DiskAlert { .. } => {
                MessageColor::Warning
            }
            _ => MessageColor::Good,
        }
    }

    /// Render the message body (Slack mrkdwn).
    pub fn render_text(&self) -> String {
        match self {
            Self::Error { message, detail } => {
                let mut text = format!("🚨 *Error*: {message}");
                if let Some(detail) = detail {
                    text.push_str(&format!("\n```{detail}```"));
                }
                text
            }
            Self::Warning { message } => format!("⚠️ *Warning*: {message}"),
            Self::SessionStart {
                interval,
                duration,
                output_dir,
            } => format!(
                "🎬 *Timelapse Started*\n• Interval: {}s\n• Duration: {}s\n• Output: {}",
                interval.as_secs(),
                duration.as_secs(),
                output_dir.display()
            ),
            Self::SessionStop {
                image_count,
                elapsed,
            } => {
                let secs = elapsed.as_secs_f64();
                format!(
                    "✅ *Timelapse Completed*\n• Images captured: {}\n• Duration: {:.1}s\n• Average interval: {:.1}s",
                    image_count,
                    secs,
                    secs / (*image_count).max(1) as f64
                )
            }
            Self::Progress {
                image_count,
                elapsed,
                remaining,
            } => {
                let elapsed = elapsed.as_secs_f64();
                let remaining = remaining.as_secs_f64();
                let total = elapsed + remaining;
                let percent = if total > 0.0 {
                    elapsed / total * 100.0
                } else {
                    0.0
                };
                format!(
                    "📊 *Timelapse Progress*\n```\n{} {:.1}%\n```\n• Images: {}\n• Elapsed: {:.1}s\n• Remaining: {:.1}s",
                    progress_bar(percent, PROGRESS_BAR_WIDTH),
                    percent,
                    image_count,
                    elapsed,
                    remaining
                )
            }
            Self::Photo {
                image_count,
                captured_at,
                ..
            } => format!(
                "📸 *Photo Update*\n• Image #{} captured\n• Timestamp: {}",
                image_count,
                captured_at.format("%Y-%m-%d %H:%M:%S")
            ),
            Self::TemperatureAlert {
                temperature_c,
                threshold_c,
            } => format!(
                "🌡️ *High Temperature Alert*\n• CPU Temperature: {temperature_c:.1}°C\n• Threshold: {threshold_c:.0}°C"
            ),
            Self::DiskAlert {
                free_mb,
                threshold_mb,
            } => format!(
                "💾 *Low Disk Space Alert*\n• Free space: {free_mb:.1}MB\n• Threshold: {threshold_mb}MB"
            ),
        }
    }
}

/// Text body used when an image cannot be uploaded.
pub fn image_fallback_text(text: &str, image: &ImagePayload) -> String {
    format!(
        "{}\n📸 *File:* `{}`\n📏 *Size:* {} bytes\n🔗 *Note:* Enable `files:write` scope for image uploads",
        text,
        image.filename,
        group_thousands(image.len() as u64)
    )
}

/// Render `percentage` (0-100) as `[████░░░░]`.
pub fn progress_bar(percentage: f64, width: usize) -> String {
    let clamped = percentage.clamp(0.0, 100.0);
    let filled = ((clamped / 100.0) * width as f64) as usize;
    format!(
        "[{}{}]",
        "█".repeat(filled),
        "░".repeat(width.saturating_sub(filled))
    )
}

/// Format an integer with `,` thousands separators.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threading_placement() {
        assert!(EventKind::Progress.is_threaded());
        assert!(EventKind::Photo.is_threaded());
        assert!(EventKind::SessionStop.is_threaded());
        assert!(!EventKind::SessionStart.is_threaded());
        assert!(!EventKind::Error.is_threaded());
        assert!(!EventKind::Warning.is_threaded());
        assert!(!EventKind::TemperatureAlert.is_threaded());
        assert!(!EventKind::DiskAlert.is_threaded());
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0, 4), "[░░░░]");
        assert_eq!(progress_bar(50.0, 4), "[██░░]");
        assert_eq!(progress_bar(250.0, 4), "[████]");
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(48213), "48,213");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_stop_message_average() {
        let event = NotificationEvent::SessionStop {
            image_count: 4,
            elapsed: Duration::from_secs(120),
        };
        let text = event.render_text();
        assert!(text.contains("Images captured: 4"));
        assert!(text.contains("Average interval: 30.0s"));
    }

    #[test]
    fn test_on_demand_photo_has_no_sequence() {
        let event = NotificationEvent::Photo {
            image_count: 3,
            captured_at: Local::now(),
            image: ImagePayload::new("a.jpg", vec![1, 2, 3]),
            on_demand: true,
        };
        assert_eq!(event.sequence(), None);
        assert_eq!(event.kind(), EventKind::Photo);
    }
}
