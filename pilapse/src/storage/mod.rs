//! Image directory management.
//!
//! Directory creation with path context and the retention policy that keeps
//! the newest `max_images` stills on disk.

mod retention;

pub use retention::{RetentionPolicy, enforce_retention, list_images};

use std::path::Path;

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path("creating directory", path, e))
}

