//! Capture session scheduling.
//!
//! One [`CaptureScheduler`] per process owns the camera and at most one
//! running session. The session moves `Idle -> Running -> Stopping -> Idle`;
//! observers only ever see cloned [`SessionState`] snapshots.

mod config;
mod service;
mod state;

pub use config::{DEFAULT_CAPTURE_TIMEOUT, MAX_SESSION_DURATION, SessionConfig};
pub use service::{CaptureOutcome, CaptureProfile, CaptureScheduler, SchedulerOptions};
pub use state::{SessionState, SessionStatus};
