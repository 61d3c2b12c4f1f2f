//! Environmental health sampling.
//!
//! Samples SoC temperature and free space on the volume holding the image
//! directory. Health checks are advisory: a sensor that cannot be read is
//! reported as unknown and treated as healthy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sysinfo::{Components, Disks};
use tracing::{debug, trace};

/// Default sysfs node exposing the SoC temperature in millidegrees Celsius.
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Temperature above which the device is considered too hot.
    pub temperature_warning_c: f32,
    /// Free space (MiB) below which storage is considered low.
    pub low_disk_warning_mb: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            temperature_warning_c: 80.0,
            low_disk_warning_mb: 100,
        }
    }
}

/// One health sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResult {
    pub temperature_ok: bool,
    pub disk_ok: bool,
    /// Measured temperature in °C, `None` when no sensor could be read.
    pub measured_temperature: Option<f32>,
    /// Free bytes on the image volume, `None` when it could not be determined.
    pub measured_free_bytes: Option<u64>,
}

impl HealthResult {
    pub fn is_healthy(&self) -> bool {
        self.temperature_ok && self.disk_ok
    }

    pub fn free_mb(&self) -> Option<f64> {
        self.measured_free_bytes
            .map(|b| b as f64 / BYTES_PER_MB as f64)
    }
}

/// Samples temperature and disk space.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    thermal_zone: PathBuf,
    storage_path: PathBuf,
    component_fallback: bool,
}

impl HealthMonitor {
    pub fn with_thermal_zone(
        thermal_zone: impl Into<PathBuf>,
        storage_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            thermal_zone: thermal_zone.into(),
            storage_path: storage_path.into(),
            component_fallback: true,
        }
    }

    /// Whether to fall back to sysinfo's hardware components when the
    /// thermal zone node is missing (default: true).
    pub fn component_fallback(mut self, enabled: bool) -> Self {
        self.component_fallback = enabled;
        self
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Take one sample and compare it against `thresholds`.
    pub fn check(&self, thresholds: &HealthThresholds) -> HealthResult {
        let measured_temperature = self.read_temperature();
        let measured_free_bytes = self.read_free_bytes();

        let temperature_ok = measured_temperature
            .map(|t| t <= thresholds.temperature_warning_c)
            .unwrap_or(true);
        let disk_ok = measured_free_bytes
            .map(|free| free >= thresholds.low_disk_warning_mb.saturating_mul(BYTES_PER_MB))
            .unwrap_or(true);

        trace!(
            temperature = ?measured_temperature,
            free_bytes = ?measured_free_bytes,
            temperature_ok,
            disk_ok,
            "Health sample"
        );

        HealthResult {
            temperature_ok,
            disk_ok,
            measured_temperature,
            measured_free_bytes,
        }
    }

    fn read_temperature(&self) -> Option<f32> {
        match std::fs::read_to_string(&self.thermal_zone) {
            Ok(raw) => match raw.trim().parse::<i64>() {
                Ok(milli) => return Some(milli as f32 / 1000.0),
                Err(e) => {
                    debug!(path = %self.thermal_zone.display(), error = %e, "Unparseable thermal zone value");
                    return None;
                }
            },
            Err(e) => {
                trace!(path = %self.thermal_zone.display(), error = %e, "Thermal zone not readable");
            }
        }

        if !self.component_fallback {
            return None;
        }

        let components = Components::new_with_refreshed_list();
        components
            .list()
            .iter()
            .filter_map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .reduce(f32::max)
    }

    fn read_free_bytes(&self) -> Option<u64> {
        let target = match std::fs::canonicalize(&self.storage_path) {
            Ok(p) => p,
            Err(e) => {
                debug!(path = %self.storage_path.display(), error = %e, "Storage path not resolvable");
                return None;
            }
        };

        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with_temp(dir: &Path, value: &str) -> HealthMonitor {
        let zone = dir.join("temp");
        std::fs::write(&zone, value).unwrap();
        HealthMonitor::with_thermal_zone(zone, dir).component_fallback(false)
    }

    #[test]
    fn test_temperature_within_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_with_temp(dir.path(), "45250\n");
        let result = monitor.check(&HealthThresholds::default());
        assert_eq!(result.measured_temperature, Some(45.25));
        assert!(result.temperature_ok);
    }

    #[test]
    fn test_temperature_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_with_temp(dir.path(), "91000");
        let result = monitor.check(&HealthThresholds::default());
        assert_eq!(result.measured_temperature, Some(91.0));
        assert!(!result.temperature_ok);
        assert!(!result.is_healthy());
    }

    #[test]
    fn test_unreadable_sensor_assumed_ok() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_with_temp(dir.path(), "not-a-number");
        let result = monitor.check(&HealthThresholds::default());
        assert_eq!(result.measured_temperature, None);
        assert!(result.temperature_ok);

        let missing = HealthMonitor::with_thermal_zone(dir.path().join("nope"), dir.path())
            .component_fallback(false);
        assert!(missing.check(&HealthThresholds::default()).temperature_ok);
    }

    #[test]
    fn test_disk_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_with_temp(dir.path(), "40000");

        let relaxed = HealthThresholds {
            low_disk_warning_mb: 0,
            ..Default::default()
        };
        assert!(monitor.check(&relaxed).disk_ok);

        let impossible = HealthThresholds {
            low_disk_warning_mb: u64::MAX / BYTES_PER_MB,
            ..Default::default()
        };
        let result = monitor.check(&impossible);
        // Unknown free space is treated as healthy.
        assert_eq!(result.disk_ok, result.measured_free_bytes.is_none());
    }

    #[test]
    fn test_missing_storage_path_is_unknown() {
        let monitor = HealthMonitor::with_thermal_zone("/nonexistent/zone", "/nonexistent/dir")
            .component_fallback(false);
        let result = monitor.check(&HealthThresholds::default());
        assert_eq!(result.measured_free_bytes, None);
        assert!(result.is_healthy());
    }
}
