//! Output filenames for captured stills.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

/// strftime pattern embedded in every image filename.
pub const FILENAME_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Build `<prefix><timestamp>.jpg`.
pub fn image_filename<Tz>(prefix: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}.jpg", prefix, at.format(FILENAME_TIME_FORMAT))
}

/// Pick a path under `dir` for a capture taken at `at`.
///
/// Two captures inside the same second would collide, so a `_N` suffix is
/// appended until the name is free.
pub fn next_image_path<Tz>(dir: &Path, prefix: &str, at: &DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let candidate = dir.join(image_filename(prefix, at));
    if !candidate.exists() {
        return candidate;
    }

    let stem = format!("{}{}", prefix, at.format(FILENAME_TIME_FORMAT));
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}.jpg")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap()
    }

    #[test]
    fn test_image_filename_format() {
        assert_eq!(
            image_filename("timelapse_", &fixed_time()),
            "timelapse_20240309_070503.jpg"
        );
    }

    #[test]
    fn test_next_image_path_avoids_collision() {
        let dir = tempfile::tempdir().unwrap();
        let first = next_image_path(dir.path(), "tl_", &fixed_time());
        assert_eq!(first.file_name().unwrap(), "tl_20240309_070503.jpg");

        std::fs::write(&first, b"x").unwrap();
        let second = next_image_path(dir.path(), "tl_", &fixed_time());
        assert_eq!(second.file_name().unwrap(), "tl_20240309_070503_1.jpg");

        std::fs::write(&second, b"x").unwrap();
        let third = next_image_path(dir.path(), "tl_", &fixed_time());
        assert_eq!(third.file_name().unwrap(), "tl_20240309_070503_2.jpg");
    }
}
