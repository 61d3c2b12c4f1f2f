//! Notification dispatcher.
//!
//! Runs every [`NotificationEvent`] through the policy gates, routes it into
//! or out of the session's conversation thread, and delivers it through the
//! configured [`MessageSink`]. Delivery failures are absorbed here: callers
//! only learn whether something reached the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::events::{EventKind, ImagePayload, NotificationEvent, image_fallback_text};
use super::policy::{NotificationPolicy, RateLimitState};
use super::sink::{
    ConversationThread, DeliveryError, ImageDelivery, ImageUpload, MessageSink, OutgoingMessage,
};

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Events that reached the channel.
    pub delivered: u64,
    /// Events dropped by a policy gate.
    pub suppressed: u64,
    /// Events that passed the gates but could not be delivered.
    pub failed: u64,
}

/// Gated, thread-aware delivery of notification events.
pub struct NotificationDispatcher {
    sink: Arc<dyn MessageSink>,
    channel: String,
    policy: NotificationPolicy,
    chain: Vec<ImageDelivery>,
    rate: Mutex<RateLimitState>,
    thread: RwLock<Option<ConversationThread>>,
    delivered: AtomicU64,
    suppressed: AtomicU64,
    failed: AtomicU64,
}

impl NotificationDispatcher {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        channel: impl Into<String>,
        policy: NotificationPolicy,
    ) -> Self {
        let chain = policy.image_chain();
        Self {
            sink,
            channel: channel.into(),
            policy,
            chain,
            rate: Mutex::new(RateLimitState::new()),
            thread: RwLock::new(None),
            delivered: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    pub fn sink(&self) -> &Arc<dyn MessageSink> {
        &self.sink
    }

    /// Whether anything can be delivered at all.
    pub fn is_enabled(&self) -> bool {
        self.sink.is_enabled()
    }

    /// Thread that session updates are currently nested under.
    pub fn current_thread(&self) -> Option<ConversationThread> {
        self.thread.read().clone()
    }

    /// Forget the current conversation thread.
    pub fn end_conversation(&self) {
        if let Some(thread) = self.thread.write().take() {
            debug!(thread = %thread, "Conversation thread cleared");
        }
    }

    /// Whether a scheduled photo for `image_count` would pass the gates now.
    ///
    /// Does not start a cooldown; lets the scheduler skip the preview capture
    /// when the photo would be suppressed anyway.
    pub fn photo_due(&self, image_count: u64) -> bool {
        self.sink.is_enabled()
            && self
                .rate
                .lock()
                .evaluate(&self.policy, EventKind::Photo, Some(image_count), Instant::now())
                .is_send()
    }

    /// Whether an on-demand photo would pass the gates now.
    pub fn on_demand_photo_allowed(&self) -> bool {
        self.sink.is_enabled()
            && self
                .rate
                .lock()
                .evaluate(&self.policy, EventKind::Photo, None, Instant::now())
                .is_send()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Deliver `event` if policy allows it.
    ///
    /// Returns `true` only when a message reached the channel, including via
    /// the text fallback for images. Never fails.
    pub async fn emit(&self, event: NotificationEvent) -> bool {
        let kind = event.kind();
        let delivered = self.emit_inner(&event).await;

        if kind == EventKind::SessionStop {
            self.end_conversation();
        }
        delivered
    }

    async fn emit_inner(&self, event: &NotificationEvent) -> bool {
        let kind = event.kind();

        if !self.sink.is_enabled() {
            debug!(kind = %kind, "Sink disabled, dropping notification");
            return false;
        }

        // The decision and the cooldown commit happen under one lock so two
        // concurrent emitters cannot both pass the same window.
        let decision = self.rate.lock().admit(&self.policy, event, Instant::now());
        if !decision.is_send() {
            debug!(kind = %kind, decision = ?decision, "Notification suppressed");
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if kind == EventKind::SessionStart {
            self.end_conversation();
        }

        let thread = if kind.is_threaded() {
            self.current_thread()
        } else {
            None
        };

        let delivered = match event.image() {
            Some(image) => self.deliver_image(event, image, thread).await,
            None => {
                let message = OutgoingMessage {
                    text: event.render_text(),
                    title: Some(event.title().to_string()),
                    color: Some(event.color()),
                    thread,
                };
                match self.sink.post_text(&self.channel, &message).await {
                    Ok(ack) => {
                        if kind == EventKind::SessionStart {
                            self.begin_conversation(ack.ts);
                        }
                        true
                    }
                    Err(e) => {
                        warn!(kind = %kind, error = %e, "Failed to deliver notification");
                        false
                    }
                }
            }
        };

        if delivered {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }

    fn begin_conversation(&self, ts: Option<String>) {
        match ts {
            Some(ts) => {
                info!(thread = %ts, "Conversation thread started");
                *self.thread.write() = Some(ConversationThread::new(ts));
            }
            None => debug!("Session start acknowledged without a message id, updates stay top-level"),
        }
    }

    /// Walk the image delivery chain; the chain always ends in a text description.
    async fn deliver_image(
        &self,
        event: &NotificationEvent,
        image: &ImagePayload,
        thread: Option<ConversationThread>,
    ) -> bool {
        let text = event.render_text();
        let mut last_error: Option<DeliveryError> = None;

        for step in &self.chain {
            let Some(method) = step.upload_method() else {
                let body = image_fallback_text(&text, image);
                let message = OutgoingMessage {
                    text: body,
                    title: Some(event.title().to_string()),
                    color: Some(event.color()),
                    thread: thread.clone(),
                };
                return match self.sink.post_text(&self.channel, &message).await {
                    Ok(_) => {
                        debug!(
                            filename = %image.filename,
                            upload_error = ?last_error,
                            "Image delivered as text description"
                        );
                        true
                    }
                    Err(e) => {
                        warn!(filename = %image.filename, error = %e, "Image text fallback failed");
                        false
                    }
                };
            };

            let upload = ImageUpload {
                bytes: &image.bytes,
                filename: &image.filename,
                title: event.title(),
                text: &text,
                thread: thread.as_ref(),
            };
            match self.sink.post_image(&self.channel, upload, method).await {
                Ok(()) => {
                    debug!(filename = %image.filename, method = method.as_str(), "Image uploaded");
                    return true;
                }
                Err(e) => {
                    warn!(
                        filename = %image.filename,
                        method = method.as_str(),
                        error = %e,
                        "Image upload failed, trying next strategy"
                    );
                    last_error = Some(e);
                }
            }
        }

        false
    }
}
