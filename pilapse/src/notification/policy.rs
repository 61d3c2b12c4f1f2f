//! Notification policy and rate-limit bookkeeping.
//!
//! Gates are evaluated in order: category toggle, frequency ("every Nth"),
//! then cooldown since the last delivered notification of the same kind.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::events::{EventKind, NotificationEvent};
use super::sink::ImageDelivery;
use crate::{Error, Result};

/// Per-kind notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPolicy {
    pub errors: bool,
    pub warnings: bool,
    pub start_stop: bool,
    pub progress_updates: bool,
    pub photos: bool,
    pub temperature_alerts: bool,
    pub disk_alerts: bool,
    /// Progress is only posted when the image count is a multiple of this.
    pub progress_every_n: u64,
    /// Scheduled photos are only posted when the image count is a multiple of this.
    pub photo_every_n: u64,
    /// Minimum time between two delivered photos.
    pub photo_cooldown_secs: u64,
    /// Minimum time between two delivered alerts of the same kind.
    pub alert_cooldown_secs: u64,
    /// Ordered image delivery attempts; a text description always ends the chain.
    pub image_delivery: Vec<ImageDelivery>,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            errors: true,
            warnings: true,
            start_stop: true,
            progress_updates: true,
            photos: true,
            temperature_alerts: true,
            disk_alerts: true,
            progress_every_n: 10,
            photo_every_n: 5,
            photo_cooldown_secs: 120,
            alert_cooldown_secs: 300,
            image_delivery: vec![
                ImageDelivery::ExternalUpload,
                ImageDelivery::LegacyUpload,
                ImageDelivery::TextDescription,
            ],
        }
    }
}

impl NotificationPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.progress_every_n == 0 {
            return Err(Error::validation("notifications.progress_every_n must be at least 1"));
        }
        if self.photo_every_n == 0 {
            return Err(Error::validation("notifications.photo_every_n must be at least 1"));
        }
        Ok(())
    }

    pub fn is_enabled(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Error => self.errors,
            EventKind::Warning => self.warnings,
            EventKind::SessionStart | EventKind::SessionStop => self.start_stop,
            EventKind::Progress => self.progress_updates,
            EventKind::Photo => self.photos,
            EventKind::TemperatureAlert => self.temperature_alerts,
            EventKind::DiskAlert => self.disk_alerts,
        }
    }

    pub fn every_n(&self, kind: EventKind) -> Option<u64> {
        match kind {
            EventKind::Progress => Some(self.progress_every_n.max(1)),
            EventKind::Photo => Some(self.photo_every_n.max(1)),
            _ => None,
        }
    }

    pub fn cooldown(&self, kind: EventKind) -> Option<Duration> {
        match kind {
            EventKind::Photo => Some(Duration::from_secs(self.photo_cooldown_secs)),
            EventKind::TemperatureAlert | EventKind::DiskAlert => {
                Some(Duration::from_secs(self.alert_cooldown_secs))
            }
            _ => None,
        }
    }

    /// Image delivery chain with the text description guaranteed last.
    pub fn image_chain(&self) -> Vec<ImageDelivery> {
        let mut chain: Vec<ImageDelivery> = self
            .image_delivery
            .iter()
            .copied()
            .filter(|d| *d != ImageDelivery::TextDescription)
            .collect();
        chain.dedup();
        chain.push(ImageDelivery::TextDescription);
        chain
    }
}

/// Outcome of running an event through the gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Send,
    /// Category switched off.
    Disabled,
    /// Not an Nth occurrence.
    Frequency,
    /// Inside the cooldown window.
    Cooldown { remaining: Duration },
}

impl GateDecision {
    pub fn is_send(self) -> bool {
        matches!(self, Self::Send)
    }
}

/// Last-sent timestamps per event kind.
#[derive(Debug, Default)]
pub struct RateLimitState {
    last_sent: HashMap<EventKind, Instant>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the gates without recording anything.
    pub fn evaluate(
        &self,
        policy: &NotificationPolicy,
        kind: EventKind,
        sequence: Option<u64>,
        now: Instant,
    ) -> GateDecision {
        if !policy.is_enabled(kind) {
            return GateDecision::Disabled;
        }

        if let (Some(n), Some(count)) = (policy.every_n(kind), sequence) {
            if count % n != 0 {
                return GateDecision::Frequency;
            }
        }

        if let (Some(cooldown), Some(last)) = (policy.cooldown(kind), self.last_sent.get(&kind)) {
            let since = now.saturating_duration_since(*last);
            if since < cooldown {
                return GateDecision::Cooldown {
                    remaining: cooldown - since,
                };
            }
        }

        GateDecision::Send
    }

    /// Evaluate the gates and, on a decision to send, start the cooldown window.
    pub fn admit(
        &mut self,
        policy: &NotificationPolicy,
        event: &NotificationEvent,
        now: Instant,
    ) -> GateDecision {
        let kind = event.kind();
        let decision = self.evaluate(policy, kind, event.sequence(), now);
        if decision.is_send() && policy.cooldown(kind).is_some() {
            self.last_sent.insert(kind, now);
        }
        decision
    }

    pub fn last_sent(&self, kind: EventKind) -> Option<Instant> {
        self.last_sent.get(&kind).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(count: u64) -> NotificationEvent {
        NotificationEvent::Progress {
            image_count: count,
            elapsed: Duration::from_secs(count),
            remaining: Duration::from_secs(100),
        }
    }

    fn temperature() -> NotificationEvent {
        NotificationEvent::TemperatureAlert {
            temperature_c: 85.0,
            threshold_c: 80.0,
        }
    }

    #[test]
    fn test_frequency_gate_every_fifth() {
        let policy = NotificationPolicy {
            progress_every_n: 5,
            ..Default::default()
        };
        let mut state = RateLimitState::new();
        let now = Instant::now();

        let sent: Vec<u64> = (1..=20)
            .filter(|c| state.admit(&policy, &progress(*c), now).is_send())
            .collect();
        assert_eq!(sent, vec![5, 10, 15, 20]);
    }

    #[test]
    fn test_category_gate_short_circuits() {
        let policy = NotificationPolicy {
            temperature_alerts: false,
            ..Default::default()
        };
        let mut state = RateLimitState::new();
        let now = Instant::now();
        assert_eq!(
            state.admit(&policy, &temperature(), now),
            GateDecision::Disabled
        );
        assert!(state.last_sent(EventKind::TemperatureAlert).is_none());
    }

    #[test]
    fn test_cooldown_only_updates_on_send() {
        let policy = NotificationPolicy {
            alert_cooldown_secs: 300,
            ..Default::default()
        };
        let mut state = RateLimitState::new();
        let start = Instant::now();

        assert!(state.admit(&policy, &temperature(), start).is_send());
        let suppressed = state.admit(&policy, &temperature(), start + Duration::from_secs(299));
        assert_eq!(
            suppressed,
            GateDecision::Cooldown {
                remaining: Duration::from_secs(1)
            }
        );
        // The suppressed attempt must not have extended the window.
        assert_eq!(state.last_sent(EventKind::TemperatureAlert), Some(start));
        assert!(
            state
                .admit(&policy, &temperature(), start + Duration::from_secs(300))
                .is_send()
        );
    }

    #[test]
    fn test_cooldowns_are_per_kind() {
        let policy = NotificationPolicy::default();
        let mut state = RateLimitState::new();
        let now = Instant::now();
        let disk = NotificationEvent::DiskAlert {
            free_mb: 12.0,
            threshold_mb: 100,
        };

        assert!(state.admit(&policy, &temperature(), now).is_send());
        assert!(state.admit(&policy, &disk, now).is_send());
    }

    #[test]
    fn test_image_chain_ends_with_text() {
        let policy = NotificationPolicy {
            image_delivery: vec![ImageDelivery::TextDescription, ImageDelivery::LegacyUpload],
            ..Default::default()
        };
        assert_eq!(
            policy.image_chain(),
            vec![ImageDelivery::LegacyUpload, ImageDelivery::TextDescription]
        );
    }

    #[test]
    fn test_validate_rejects_zero_modulus() {
        let policy = NotificationPolicy {
            photo_every_n: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert!(NotificationPolicy::default().validate().is_ok());
    }
}
