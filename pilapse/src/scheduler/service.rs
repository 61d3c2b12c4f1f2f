//! Capture session scheduler.
//!
//! Owns the camera and the single session slot. A session runs as one
//! spawned task; `start`, `stop`, `status` and `capture_once` may be called
//! from any task while it runs.
//!
//! # Locking
//!
//! - `active` (session slot) is taken before `state` whenever both are needed.
//! - Neither parking_lot lock is held across an `.await`.
//! - The camera sits behind an async mutex that every device call goes
//!   through, so a mode switch can never overlap a capture.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state::{SessionState, SessionStatus};
use crate::capture::{
    CaptureError, CaptureMode, Capturer, Resolution, StillCommandConfig, next_image_path,
};
use crate::health::{HealthMonitor, HealthResult, HealthThresholds, DEFAULT_THERMAL_ZONE};
use crate::notification::{ImagePayload, NotificationDispatcher, NotificationEvent};
use crate::storage::{self, enforce_retention};
use crate::video::VideoEncoder;
use crate::{Error, Result};

/// Frame sizes the camera is switched between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    pub full: Resolution,
    pub preview: Resolution,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self::from(&StillCommandConfig::default())
    }
}

impl From<&StillCommandConfig> for CaptureProfile {
    fn from(config: &StillCommandConfig) -> Self {
        Self {
            full: config.resolution,
            preview: config.preview_resolution,
        }
    }
}

/// Static settings of a scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub profile: CaptureProfile,
    pub thresholds: HealthThresholds,
    pub thermal_zone: PathBuf,
    /// Fall back to sysinfo's hardware sensors when `thermal_zone` is missing.
    pub sensor_fallback: bool,
    /// Storage settings used by `capture_once` while no session runs.
    pub snapshot_defaults: SessionConfig,
    /// Encoder run after every session, if enabled.
    pub video: Option<Arc<VideoEncoder>>,
}

impl SchedulerOptions {
    pub fn new(snapshot_defaults: SessionConfig) -> Self {
        Self {
            profile: CaptureProfile::default(),
            thresholds: HealthThresholds::default(),
            thermal_zone: PathBuf::from(DEFAULT_THERMAL_ZONE),
            sensor_fallback: true,
            snapshot_defaults,
            video: None,
        }
    }
}

/// Result of a successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub path: PathBuf,
    /// Session image count after this capture; `None` when no session runs.
    pub image_count: Option<u64>,
    /// Whether a snapshot of the frame reached the chat channel.
    pub photo_delivered: bool,
}

/// Camera plus the mode it was last configured for.
struct Camera {
    capturer: Box<dyn Capturer>,
    mode: Option<CaptureMode>,
}

impl Camera {
    async fn ensure_mode(&mut self, mode: CaptureMode, size: Resolution) -> std::result::Result<(), CaptureError> {
        if self.mode == Some(mode) {
            return Ok(());
        }
        self.mode = None;
        debug!(capturer = self.capturer.name(), mode = %mode, size = %size, "Configuring camera");
        self.capturer.configure(mode, size).await?;
        self.mode = Some(mode);
        Ok(())
    }
}

struct ActiveSession {
    config: SessionConfig,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    camera: tokio::sync::Mutex<Camera>,
    camera_ok: AtomicBool,
    dispatcher: Arc<NotificationDispatcher>,
    options: SchedulerOptions,
    state: RwLock<SessionState>,
    active: Mutex<Option<ActiveSession>>,
    shutdown: CancellationToken,
}

/// Drives timed capture sessions. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct CaptureScheduler {
    inner: Arc<Inner>,
}

impl CaptureScheduler {
    /// Create a scheduler owning `capturer`. Cancelling `shutdown` stops any
    /// running session.
    pub fn new(
        capturer: Box<dyn Capturer>,
        dispatcher: Arc<NotificationDispatcher>,
        options: SchedulerOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                camera: tokio::sync::Mutex::new(Camera {
                    capturer,
                    mode: None,
                }),
                camera_ok: AtomicBool::new(true),
                dispatcher,
                options,
                state: RwLock::new(SessionState::idle()),
                active: Mutex::new(None),
                shutdown,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.inner.dispatcher
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.inner.options
    }

    /// Snapshot of the session. Never waits on the capture loop.
    pub fn status(&self) -> SessionState {
        self.inner.state.read().clone()
    }

    /// Whether the last device interaction did not report the camera missing.
    pub fn camera_available(&self) -> bool {
        self.inner.camera_ok.load(Ordering::Relaxed)
    }

    /// Configuration of the running session, if any.
    pub fn session_config(&self) -> Option<SessionConfig> {
        let active = self.inner.active.lock();
        if self.inner.state.read().is_idle() {
            return None;
        }
        active.as_ref().map(|a| a.config.clone())
    }

    /// Start a session in the background and return immediately.
    ///
    /// Fails with [`Error::AlreadyRunning`] unless the scheduler is idle, and
    /// with a validation error for unusable parameters; neither changes state.
    pub fn start(&self, config: SessionConfig) -> Result<()> {
        config.validate()?;

        let mut active = self.inner.active.lock();
        {
            let mut state = self.inner.state.write();
            if !state.is_idle() {
                return Err(Error::AlreadyRunning);
            }
            *state = SessionState::running(Local::now(), config.interval, config.total_duration);
        }

        let token = self.inner.shutdown.child_token();
        let handle = tokio::spawn(run_session(
            Arc::clone(&self.inner),
            config.clone(),
            token.clone(),
        ));

        info!(
            interval_secs = config.interval.as_secs(),
            duration_secs = config.total_duration.as_secs(),
            output_dir = %config.output_dir.display(),
            "Capture session started"
        );

        *active = Some(ActiveSession {
            config,
            token,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Ask the running session to stop. Returns whether a session was running.
    ///
    /// Does not wait for the loop: an in-flight capture completes, the
    /// inter-capture sleep is cut short.
    pub fn stop(&self) -> bool {
        let active = self.inner.active.lock();
        let mut state = self.inner.state.write();
        if state.status != SessionStatus::Running {
            debug!(status = %state.status, "Stop requested while not running");
            return false;
        }
        state.status = SessionStatus::Stopping;
        if let Some(session) = active.as_ref() {
            session.token.cancel();
        }
        info!("Capture session stop requested");
        true
    }

    /// Wait for the current session task (if any) to finish.
    pub async fn wait(&self) -> SessionState {
        let handle = self
            .inner
            .active
            .lock()
            .as_mut()
            .and_then(|session| session.handle.take());

        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "Capture session task failed");
        }
        self.status()
    }

    /// Start a session and wait for it to end.
    pub async fn run_session(&self, config: SessionConfig) -> Result<SessionState> {
        self.start(config)?;
        Ok(self.wait().await)
    }

    /// Take one picture outside the schedule.
    ///
    /// While a session runs the frame counts toward it and is reported like a
    /// scheduled one. With `on_demand` a snapshot is posted to chat; on-demand
    /// snapshots skip the every-Nth photo rule but honour the cooldown.
    pub async fn capture_once(&self, on_demand: bool) -> Result<CaptureOutcome> {
        let config = self
            .session_config()
            .unwrap_or_else(|| self.inner.options.snapshot_defaults.clone());

        match self.inner.capture_still(&config).await {
            Ok(path) => {
                let outcome = self.inner.after_capture(path, on_demand).await;
                self.inner.apply_retention(&config).await;
                Ok(outcome)
            }
            Err(e) => {
                self.inner.report_capture_failure(&e).await;
                Err(e.into())
            }
        }
    }

    /// Stop any session, wait for it and release the camera.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.wait().await;
        self.close_camera().await;
    }

    /// Release the camera. Best effort.
    pub async fn close_camera(&self) {
        let mut camera = self.inner.camera.lock().await;
        camera.capturer.close().await;
        camera.mode = None;
        info!(capturer = camera.capturer.name(), "Camera released");
    }
}

/// Resets the slot to idle if the session task ends without doing so itself.
struct SessionGuard(Arc<Inner>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut state = self.0.state.write();
        if !state.is_idle() {
            warn!("Capture session task ended abnormally");
            state.status = SessionStatus::Idle;
        }
    }
}

async fn run_session(inner: Arc<Inner>, config: SessionConfig, token: CancellationToken) {
    let _guard = SessionGuard(Arc::clone(&inner));
    inner.run_loop(&config, &token).await;
}

impl Inner {
    async fn run_loop(&self, config: &SessionConfig, token: &CancellationToken) {
        let started = Instant::now();
        let Some(ends) = started.checked_add(config.total_duration) else {
            error!(duration = ?config.total_duration, "Session end time out of range");
            self.record_error("session duration out of range");
            self.finish();
            return;
        };

        if let Err(e) = self.prepare(config).await {
            error!(error = %e, "Camera initialization failed");
            self.record_error(&e.to_string());
            self.dispatcher
                .emit(NotificationEvent::error(
                    "Camera initialization failed",
                    Some(e.to_string()),
                ))
                .await;
            self.finish();
            return;
        }

        self.dispatcher
            .emit(NotificationEvent::SessionStart {
                interval: config.interval,
                duration: config.total_duration,
                output_dir: config.output_dir.clone(),
            })
            .await;

        let health = HealthMonitor::with_thermal_zone(&self.options.thermal_zone, &config.output_dir)
            .component_fallback(self.options.sensor_fallback);

        loop {
            if token.is_cancelled() {
                info!("Stop requested, ending session");
                break;
            }
            if Instant::now() >= ends {
                break;
            }

            self.check_health(&health).await;

            match self.capture_still(config).await {
                Ok(path) => {
                    self.after_capture(path, false).await;
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Camera failure, ending session");
                    self.record_error(&e.to_string());
                    self.dispatcher
                        .emit(NotificationEvent::error(
                            "Camera failure, timelapse stopped",
                            Some(e.to_string()),
                        ))
                        .await;
                    break;
                }
                Err(e) => self.report_capture_failure(&e).await,
            }

            self.apply_retention(config).await;

            let remaining = ends.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Stop requested, interrupting sleep");
                    break;
                }
                _ = tokio::time::sleep(config.interval.min(remaining)) => {}
            }
        }

        let image_count = {
            let mut state = self.state.write();
            if state.status == SessionStatus::Running {
                state.status = SessionStatus::Stopping;
            }
            state.image_count
        };
        let elapsed = started.elapsed();
        info!(
            image_count,
            elapsed_secs = elapsed.as_secs(),
            "Capture session completed"
        );

        self.dispatcher
            .emit(NotificationEvent::SessionStop {
                image_count,
                elapsed,
            })
            .await;
        self.finish();

        if let Some(video) = &self.options.video
            && video.is_enabled()
        {
            video.spawn_encode(config.output_dir.clone(), config.filename_prefix.clone());
        }
    }

    /// Create the output directory and put the camera in capture mode.
    async fn prepare(&self, config: &SessionConfig) -> std::result::Result<(), CaptureError> {
        storage::ensure_dir_all(&config.output_dir)
            .await
            .map_err(|e| CaptureError::Failed(e.to_string()))?;

        let mut camera = self.camera.lock().await;
        let result = tokio::time::timeout(
            config.capture_timeout,
            camera.ensure_mode(CaptureMode::HighRes, self.options.profile.full),
        )
        .await
        .unwrap_or(Err(CaptureError::Timeout(config.capture_timeout)));
        if result.is_err() {
            camera.mode = None;
        }
        self.camera_ok
            .store(!result.as_ref().is_err_and(|e| e.is_fatal()), Ordering::Relaxed);
        result
    }

    /// Capture one full-size still into the session directory.
    async fn capture_still(&self, config: &SessionConfig) -> std::result::Result<PathBuf, CaptureError> {
        storage::ensure_dir_all(&config.output_dir)
            .await
            .map_err(|e| CaptureError::Failed(e.to_string()))?;

        let mut camera = self.camera.lock().await;
        let path = next_image_path(&config.output_dir, &config.filename_prefix, &Local::now());
        let full = self.options.profile.full;

        let result = tokio::time::timeout(config.capture_timeout, async {
            camera.ensure_mode(CaptureMode::HighRes, full).await?;
            camera.capturer.capture_to_file(&path).await
        })
        .await
        .unwrap_or(Err(CaptureError::Timeout(config.capture_timeout)));

        if result.is_err() {
            camera.mode = None;
        }
        self.camera_ok
            .store(!result.as_ref().is_err_and(|e| e.is_fatal()), Ordering::Relaxed);

        result.map(|()| {
            debug!(path = %path.display(), "Image captured");
            path
        })
    }

    /// Capture a small frame for chat.
    async fn capture_preview(&self, timeout: Duration) -> std::result::Result<Vec<u8>, CaptureError> {
        let mut camera = self.camera.lock().await;
        let preview = self.options.profile.preview;

        let result = tokio::time::timeout(timeout, async {
            camera.ensure_mode(CaptureMode::PreviewRes, preview).await?;
            camera.capturer.capture_to_memory().await
        })
        .await
        .unwrap_or(Err(CaptureError::Timeout(timeout)));

        if result.is_err() {
            camera.mode = None;
        }
        result
    }

    /// Count the frame, report progress and post a snapshot when due.
    async fn after_capture(&self, path: PathBuf, on_demand: bool) -> CaptureOutcome {
        let image_count = self.record_capture();

        if let Some(count) = image_count {
            self.emit_progress(count).await;
        }

        let photo_delivered = match (on_demand, image_count) {
            (true, count) => self.send_photo(&path, count.unwrap_or(0), true).await,
            (false, Some(count)) => self.send_photo(&path, count, false).await,
            (false, None) => false,
        };

        CaptureOutcome {
            path,
            image_count,
            photo_delivered,
        }
    }

    /// Increment the session count. `None` when no session is active.
    fn record_capture(&self) -> Option<u64> {
        let mut state = self.state.write();
        if state.is_idle() {
            return None;
        }
        state.image_count += 1;
        Some(state.image_count)
    }

    async fn emit_progress(&self, image_count: u64) {
        let (elapsed, remaining) = {
            let state = self.state.read();
            let now = Local::now();
            (
                state.elapsed_at(now).unwrap_or_default(),
                state.remaining_at(now).unwrap_or_default(),
            )
        };
        info!(
            image_count,
            elapsed_secs = elapsed.as_secs(),
            remaining_secs = remaining.as_secs(),
            "Timelapse progress"
        );
        self.dispatcher
            .emit(NotificationEvent::Progress {
                image_count,
                elapsed,
                remaining,
            })
            .await;
    }

    async fn send_photo(&self, path: &Path, image_count: u64, on_demand: bool) -> bool {
        let allowed = if on_demand {
            self.dispatcher.on_demand_photo_allowed()
        } else {
            self.dispatcher.photo_due(image_count)
        };
        if !allowed {
            return false;
        }

        let timeout = self.options.snapshot_defaults.capture_timeout;
        let bytes = match self.capture_preview(timeout).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to capture preview for photo notification");
                return false;
            }
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot.jpg".to_string());

        self.dispatcher
            .emit(NotificationEvent::Photo {
                image_count,
                captured_at: Local::now(),
                image: ImagePayload::new(filename, bytes),
                on_demand,
            })
            .await
    }

    async fn report_capture_failure(&self, error: &CaptureError) {
        warn!(error = %error, "Failed to capture image");
        self.record_error(&error.to_string());
        self.dispatcher
            .emit(NotificationEvent::warning(format!(
                "Failed to capture image, retrying... ({error})"
            )))
            .await;
    }

    async fn check_health(&self, monitor: &HealthMonitor) {
        let monitor = monitor.clone();
        let thresholds = self.options.thresholds;
        let result = match tokio::task::spawn_blocking(move || monitor.check(&thresholds)).await {
            Ok(result) => result,
            Err(e) => {
                debug!(error = %e, "Health sampling task failed");
                return;
            }
        };
        self.report_health(&result).await;
    }

    async fn report_health(&self, result: &HealthResult) {
        if result.is_healthy() {
            return;
        }

        if !result.temperature_ok
            && let Some(temperature_c) = result.measured_temperature
        {
            warn!(temperature_c, "High CPU temperature");
            self.dispatcher
                .emit(NotificationEvent::TemperatureAlert {
                    temperature_c,
                    threshold_c: self.options.thresholds.temperature_warning_c,
                })
                .await;
        }

        if !result.disk_ok
            && let Some(free_mb) = result.free_mb()
        {
            warn!(free_mb, "Low disk space");
            self.dispatcher
                .emit(NotificationEvent::DiskAlert {
                    free_mb,
                    threshold_mb: self.options.thresholds.low_disk_warning_mb,
                })
                .await;
        }

        self.dispatcher
            .emit(NotificationEvent::warning(
                "System health check failed, continuing...",
            ))
            .await;
    }

    async fn apply_retention(&self, config: &SessionConfig) {
        match enforce_retention(&config.output_dir, &config.retention()).await {
            Ok(removed) if !removed.is_empty() => {
                info!(removed = removed.len(), "Retention cleanup removed old images");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Retention cleanup failed"),
        }
    }

    fn record_error(&self, message: &str) {
        self.state.write().last_error = Some(message.to_string());
    }

    fn finish(&self) {
        self.state.write().status = SessionStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{
        DeliveryError, ImageUpload, MessageSink, NotificationPolicy, OutgoingMessage, PostAck,
        UploadMethod,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingCamera {
        captures: Arc<AtomicU32>,
        fail_every: Option<u32>,
        configure_error: Option<CaptureError>,
    }

    #[async_trait]
    impl Capturer for CountingCamera {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn configure(
            &mut self,
            _mode: CaptureMode,
            _size: Resolution,
        ) -> std::result::Result<(), CaptureError> {
            match &self.configure_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        async fn capture_to_file(&mut self, path: &Path) -> std::result::Result<(), CaptureError> {
            let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(every) = self.fail_every
                && n % every == 0
            {
                return Err(CaptureError::Failed(format!("attempt {n}")));
            }
            std::fs::write(path, b"jpeg").map_err(|e| CaptureError::Failed(e.to_string()))
        }

        async fn capture_to_memory(&mut self) -> std::result::Result<Vec<u8>, CaptureError> {
            Ok(vec![0u8; 16])
        }
    }

    struct Collecting {
        texts: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageSink for Collecting {
        fn sink_type(&self) -> &'static str {
            "collecting"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn post_text(
            &self,
            _channel: &str,
            message: &OutgoingMessage,
        ) -> std::result::Result<PostAck, DeliveryError> {
            self.texts.lock().push(message.text.clone());
            Ok(PostAck {
                ts: Some("1.0".into()),
            })
        }

        async fn post_image(
            &self,
            _channel: &str,
            _image: ImageUpload<'_>,
            _method: UploadMethod,
        ) -> std::result::Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn scheduler(
        dir: &Path,
        camera: CountingCamera,
    ) -> (CaptureScheduler, Arc<Collecting>, SessionConfig) {
        scheduler_with(dir, camera, |_| {})
    }

    fn scheduler_with(
        dir: &Path,
        camera: CountingCamera,
        adjust: impl FnOnce(&mut SchedulerOptions),
    ) -> (CaptureScheduler, Arc<Collecting>, SessionConfig) {
        let sink = Arc::new(Collecting {
            texts: parking_lot::Mutex::new(Vec::new()),
        });
        let dispatcher = Arc::new(NotificationDispatcher::new(
            sink.clone(),
            "#test",
            NotificationPolicy {
                progress_every_n: 1,
                photos: false,
                ..Default::default()
            },
        ));
        let config = SessionConfig::new(Duration::from_secs(10), Duration::from_secs(50), dir);
        let mut options = SchedulerOptions::new(config.clone());
        options.thermal_zone = dir.join("no-thermal-zone");
        options.sensor_fallback = false;
        options.thresholds.low_disk_warning_mb = 0;
        adjust(&mut options);
        let scheduler = CaptureScheduler::new(
            Box::new(camera),
            dispatcher,
            options,
            CancellationToken::new(),
        );
        (scheduler, sink, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_only_successful_captures() {
        let dir = tempfile::tempdir().unwrap();
        let captures = Arc::new(AtomicU32::new(0));
        let (scheduler, sink, config) = scheduler(
            dir.path(),
            CountingCamera {
                captures: captures.clone(),
                fail_every: Some(2),
                configure_error: None,
            },
        );

        let state = scheduler.run_session(config).await.unwrap();

        let attempts = captures.load(Ordering::SeqCst) as u64;
        assert_eq!(attempts, 5);
        assert_eq!(state.image_count, 3);
        assert!(state.is_idle());
        assert!(state.last_error.is_some());

        let texts = sink.texts.lock();
        assert!(texts.first().unwrap().contains("Timelapse Started"));
        assert!(texts.last().unwrap().contains("Images captured: 3"));
        assert_eq!(
            texts.iter().filter(|t| t.contains("Failed to capture image")).count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_device_warns_but_keeps_capturing() {
        let dir = tempfile::tempdir().unwrap();
        let zone = dir.path().join("thermal_zone_temp");
        std::fs::write(&zone, "91000\n").unwrap();

        let captures = Arc::new(AtomicU32::new(0));
        let (scheduler, sink, config) = scheduler_with(
            dir.path(),
            CountingCamera {
                captures: captures.clone(),
                fail_every: None,
                configure_error: None,
            },
            |options| {
                options.thermal_zone = zone.clone();
                options.thresholds.temperature_warning_c = 80.0;
            },
        );

        // 10s interval over 50s: five iterations, each one over temperature.
        let state = scheduler.run_session(config).await.unwrap();

        assert_eq!(captures.load(Ordering::SeqCst), 5);
        assert_eq!(state.image_count, 5);

        let texts = sink.texts.lock();
        let alerts: Vec<_> = texts
            .iter()
            .filter(|t| t.contains("High Temperature Alert"))
            .collect();
        // The alert cooldown (300s) outlasts the session, the generic warning has none.
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("91.0°C"));
        assert_eq!(
            texts
                .iter()
                .filter(|t| t.contains("System health check failed"))
                .count(),
            5
        );
        assert!(!texts.iter().any(|t| t.contains("Low Disk")));
        assert!(texts.last().unwrap().contains("Images captured: 5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_second_start() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _sink, config) = scheduler(
            dir.path(),
            CountingCamera {
                captures: Arc::new(AtomicU32::new(0)),
                fail_every: None,
                configure_error: None,
            },
        );

        scheduler.start(config.clone()).unwrap();
        assert!(matches!(
            scheduler.start(config.clone()),
            Err(Error::AlreadyRunning)
        ));
        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        scheduler.wait().await;
        assert!(scheduler.status().is_idle());
        scheduler.start(config).unwrap();
        scheduler.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_failure_goes_straight_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let captures = Arc::new(AtomicU32::new(0));
        let (scheduler, sink, config) = scheduler(
            dir.path(),
            CountingCamera {
                captures: captures.clone(),
                fail_every: None,
                configure_error: Some(CaptureError::DeviceUnavailable("no camera".into())),
            },
        );

        let state = scheduler.run_session(config).await.unwrap();
        assert!(state.is_idle());
        assert_eq!(captures.load(Ordering::SeqCst), 0);
        assert!(!scheduler.camera_available());

        let texts = sink.texts.lock();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("Camera initialization failed"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_without_state_change() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _sink, config) = scheduler(
            dir.path(),
            CountingCamera {
                captures: Arc::new(AtomicU32::new(0)),
                fail_every: None,
                configure_error: None,
            },
        );
        let bad = config.with_schedule(Duration::from_secs(60), Duration::from_secs(10));
        assert!(scheduler.start(bad).unwrap_err().is_config_fault());
        assert!(scheduler.status().is_idle());
    }

    #[tokio::test]
    async fn test_capture_once_while_idle_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, sink, _config) = scheduler(
            dir.path(),
            CountingCamera {
                captures: Arc::new(AtomicU32::new(0)),
                fail_every: None,
                configure_error: None,
            },
        );

        let outcome = scheduler.capture_once(false).await.unwrap();
        assert_eq!(outcome.image_count, None);
        assert!(outcome.path.exists());
        assert_eq!(scheduler.status().image_count, 0);
        assert!(sink.texts.lock().is_empty());
    }
}
