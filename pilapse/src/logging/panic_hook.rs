//! Panic reporting for unattended runs.

use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::Local;

use super::LOG_FILE_NAME;

/// Log panics through `tracing`. Release builds abort on panic before the
/// non-blocking writer flushes, so there the record is also appended to the
/// current daily log file directly.
pub fn install_panic_hook(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = panic_record(info);
            tracing::error!(target: "pilapse::panic", "{record}");

            if cfg!(panic = "abort") {
                let _ = append_record(&log_dir, &record);
            }
        }));

        previous_hook(info);
    }));
}

fn append_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let name = format!("{LOG_FILE_NAME}.{}", Local::now().format("%Y-%m-%d"));
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(PathBuf::from(log_dir).join(name))?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn panic_record(info: &PanicHookInfo<'_>) -> String {
    let payload = if let Some(s) = info.payload().downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        info.to_string()
    };
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());

    format!(
        "{} PANIC thread={thread} location={location} payload={payload}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
    )
}
