#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use pilapse::capture::{CaptureError, CaptureMode, Capturer, Resolution};
use pilapse::command::{HistorySource, InboundMessage};
use pilapse::health::HealthThresholds;
use pilapse::notification::{
    DeliveryError, ImageUpload, MessageSink, NotificationDispatcher, NotificationPolicy,
    OutgoingMessage, PostAck, UploadMethod,
};
use pilapse::scheduler::{CaptureScheduler, SchedulerOptions, SessionConfig};

/// Camera writing a tiny file per capture; attempt numbers in `fail_on` fail.
pub struct FakeCamera {
    pub attempts: Arc<AtomicU32>,
    pub fail_on: Vec<u32>,
}

impl FakeCamera {
    pub fn new() -> (Self, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        (
            Self {
                attempts: attempts.clone(),
                fail_on: Vec::new(),
            },
            attempts,
        )
    }
}

#[async_trait]
impl Capturer for FakeCamera {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn configure(&mut self, _mode: CaptureMode, _size: Resolution) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn capture_to_file(&mut self, path: &Path) -> Result<(), CaptureError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&n) {
            return Err(CaptureError::Failed(format!("attempt {n}")));
        }
        std::fs::write(path, b"jpeg").map_err(|e| CaptureError::Failed(e.to_string()))
    }

    async fn capture_to_memory(&mut self) -> Result<Vec<u8>, CaptureError> {
        Ok(vec![0xFF; 2048])
    }
}

/// Sink recording everything it is asked to post.
#[derive(Default)]
pub struct RecordingSink {
    pub texts: Mutex<Vec<(String, String)>>,
    pub images: Mutex<Vec<(String, String)>>,
    pub fail_images: bool,
    pub next_ts: AtomicU32,
}

impl RecordingSink {
    pub fn failing_images() -> Self {
        Self {
            fail_images: true,
            ..Default::default()
        }
    }

    pub fn texts_in(&self, channel: &str) -> Vec<String> {
        self.texts
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn all_texts(&self) -> Vec<String> {
        self.texts.lock().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    fn sink_type(&self) -> &'static str {
        "recording"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn post_text(&self, channel: &str, message: &OutgoingMessage) -> Result<PostAck, DeliveryError> {
        self.texts
            .lock()
            .push((channel.to_string(), message.text.clone()));
        let n = self.next_ts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PostAck {
            ts: Some(format!("1700000000.{n:06}")),
        })
    }

    async fn post_image(
        &self,
        channel: &str,
        image: ImageUpload<'_>,
        _method: UploadMethod,
    ) -> Result<(), DeliveryError> {
        if self.fail_images {
            return Err(DeliveryError::PermissionDenied("files:write".into()));
        }
        self.images
            .lock()
            .push((channel.to_string(), image.filename.to_string()));
        Ok(())
    }
}

/// History source serving prepared pages, one per fetch.
pub struct FakeHistory {
    pub bot_id: Option<String>,
    pub pages: Mutex<VecDeque<Vec<InboundMessage>>>,
    pub requested_oldest: Mutex<Vec<Option<String>>>,
}

impl FakeHistory {
    pub fn new(bot_id: &str, pages: Vec<Vec<InboundMessage>>) -> Self {
        Self {
            bot_id: Some(bot_id.to_string()),
            pages: Mutex::new(pages.into()),
            requested_oldest: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn bot_user_id(&self) -> Result<Option<String>, DeliveryError> {
        Ok(self.bot_id.clone())
    }

    async fn resolve_channel(&self, channel: &str) -> Result<String, DeliveryError> {
        Ok(format!("ID-{}", channel.trim_start_matches('#')))
    }

    async fn fetch_since(
        &self,
        _channel_id: &str,
        oldest: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<InboundMessage>, DeliveryError> {
        self.requested_oldest.lock().push(oldest.map(str::to_string));
        self.pages
            .lock()
            .pop_front()
            .ok_or_else(|| DeliveryError::Transport("no more pages".into()))
    }
}

pub fn message(channel: &str, ts: &str, user: &str, text: &str) -> InboundMessage {
    InboundMessage {
        channel: channel.to_string(),
        ts: ts.to_string(),
        user: Some(user.to_string()),
        text: text.to_string(),
    }
}

/// Policy that reports every frame and never posts scheduled photos.
pub fn chatty_policy() -> NotificationPolicy {
    NotificationPolicy {
        progress_every_n: 1,
        photo_every_n: 1_000_000,
        ..Default::default()
    }
}

pub struct Harness {
    pub scheduler: CaptureScheduler,
    pub sink: Arc<RecordingSink>,
    pub config: SessionConfig,
    pub attempts: Arc<AtomicU32>,
}

pub fn harness(dir: &Path, camera: FakeCamera, attempts: Arc<AtomicU32>, sink: RecordingSink) -> Harness {
    harness_with_policy(dir, camera, attempts, sink, chatty_policy())
}

pub fn harness_with_policy(
    dir: &Path,
    camera: FakeCamera,
    attempts: Arc<AtomicU32>,
    sink: RecordingSink,
    policy: NotificationPolicy,
) -> Harness {
    let sink = Arc::new(sink);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        sink.clone(),
        "#timelapse",
        policy,
    ));

    let config = SessionConfig::new(Duration::from_secs(10), Duration::from_secs(60), dir);
    let mut options = SchedulerOptions::new(config.clone());
    options.thermal_zone = dir.join("missing-thermal-zone");
    options.sensor_fallback = false;
    options.thresholds = HealthThresholds {
        temperature_warning_c: 1000.0,
        low_disk_warning_mb: 0,
    };

    let scheduler = CaptureScheduler::new(
        Box::new(camera),
        dispatcher,
        options,
        CancellationToken::new(),
    );

    Harness {
        scheduler,
        sink,
        config,
        attempts,
    }
}

/// Yield until `cond` holds, advancing (possibly paused) time in small steps.
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
