//! Session state shared between the capture loop and its observers.

use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Lifecycle of the single capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    /// Stop requested or loop finished; final notifications still in flight.
    Stopping,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the session.
///
/// The scheduler keeps the live copy behind a lock and only ever hands out
/// clones, so a reader never observes a partially updated state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Local>>,
    pub ends_at: Option<DateTime<Local>>,
    pub interval: Option<Duration>,
    pub image_count: u64,
    pub last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle()
    }
}

impl SessionState {
    pub fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            started_at: None,
            ends_at: None,
            interval: None,
            image_count: 0,
            last_error: None,
        }
    }

    pub(crate) fn running(now: DateTime<Local>, interval: Duration, total: Duration) -> Self {
        let ends_at = chrono::Duration::from_std(total)
            .ok()
            .and_then(|d| now.checked_add_signed(d));
        Self {
            status: SessionStatus::Running,
            started_at: Some(now),
            ends_at,
            interval: Some(interval),
            image_count: 0,
            last_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn is_idle(&self) -> bool {
        self.status == SessionStatus::Idle
    }

    /// Time since the session started, relative to `now`.
    pub fn elapsed_at(&self, now: DateTime<Local>) -> Option<Duration> {
        self.started_at
            .map(|start| (now - start).to_std().unwrap_or(Duration::ZERO))
    }

    /// Time left until the scheduled end, relative to `now`.
    pub fn remaining_at(&self, now: DateTime<Local>) -> Option<Duration> {
        self.ends_at
            .map(|end| (end - now).to_std().unwrap_or(Duration::ZERO))
    }
}
