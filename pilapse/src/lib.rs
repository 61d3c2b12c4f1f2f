//! Unattended timelapse capture with chat notifications and remote control.
//!
//! A [`CaptureScheduler`](scheduler::CaptureScheduler) runs one timed capture
//! session at a time, reporting through a
//! [`NotificationDispatcher`](notification::NotificationDispatcher). A
//! [`CommandDispatcher`](command::CommandDispatcher) lets chat users start,
//! stop and query sessions while they run.

pub mod capture;
pub mod command;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod notification;
pub mod scheduler;
pub mod slack;
pub mod storage;
pub mod video;

pub use error::{Error, Result};
