//! Oldest-first image retention.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Retention settings for the image directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Whether old images are deleted at all.
    pub cleanup_enabled: bool,
    /// Number of images to keep.
    pub max_images: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            cleanup_enabled: false,
            max_images: 1000,
        }
    }
}

/// List `*.jpg` files in `dir` with their modification times, oldest first.
pub async fn list_images(dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io_path("reading directory", dir, e))?;

    let mut images = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_path("reading directory", dir, e))?
    {
        let path = entry.path();
        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jpg"));
        if !is_jpeg {
            continue;
        }

        let meta = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        images.push((path, modified));
    }

    images.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(images)
}

/// Delete the oldest images in `dir` until at most `policy.max_images` remain.
///
/// Returns the removed paths. A file that fails to delete is logged and
/// skipped; it does not abort the sweep.
pub async fn enforce_retention(dir: &Path, policy: &RetentionPolicy) -> Result<Vec<PathBuf>> {
    if !policy.cleanup_enabled {
        return Ok(Vec::new());
    }

    let images = list_images(dir).await?;
    if images.len() <= policy.max_images {
        return Ok(Vec::new());
    }

    let excess = images.len() - policy.max_images;
    let mut removed = Vec::with_capacity(excess);
    for (path, _) in images.into_iter().take(excess) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Removed old image");
                removed.push(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old image"),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn write_with_mtime(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_removes_single_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let oldest = write_with_mtime(dir.path(), "c.jpg", 400);
        write_with_mtime(dir.path(), "a.jpg", 300);
        write_with_mtime(dir.path(), "d.jpg", 200);
        write_with_mtime(dir.path(), "b.jpg", 100);

        let policy = RetentionPolicy {
            cleanup_enabled: true,
            max_images: 3,
        };
        let removed = enforce_retention(dir.path(), &policy).await.unwrap();

        assert_eq!(removed, vec![oldest.clone()]);
        assert!(!oldest.exists());
        assert_eq!(list_images(dir.path()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_disabled_policy_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in ["1.jpg", "2.jpg", "3.jpg"].iter().enumerate() {
            write_with_mtime(dir.path(), name, i as u64 * 10);
        }

        let policy = RetentionPolicy {
            cleanup_enabled: false,
            max_images: 1,
        };
        assert!(enforce_retention(dir.path(), &policy).await.unwrap().is_empty());
        assert_eq!(list_images(dir.path()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_ignores_non_jpeg_files() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(dir.path(), "old.mp4", 1000);
        write_with_mtime(dir.path(), "notes.txt", 900);
        write_with_mtime(dir.path(), "x.jpg", 10);

        let images = list_images(dir.path()).await.unwrap();
        assert_eq!(images.len(), 1);
        assert!(images[0].0.ends_with("x.jpg"));
    }
}
