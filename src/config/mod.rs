// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Flat, TOML-backed configuration, loaded once at startup and treated as
//! read-only for the rest of the process's lifetime (no locks needed, per
//! the concurrency model's shared-resource list).

use crate::error::ConfigError;
use crate::model::DeviceId;
use crate::schedule::ScheduleInterval;
use crate::spectrogram::WindowKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-device acquisition parameters, derived from [`Config`] by zipping
/// `device[]` against `calibration[]` after validation.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub calibration_db: f64,
    pub gain: f64,
}

/// Top-level configuration, mirroring the key table in the external
/// "Configuration (consumed)" interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Device ids, by index-or-serial.
    pub device: Vec<DeviceId>,
    /// Per-device calibration offsets in dB, same order and length as
    /// `device`.
    pub calibration: Vec<f64>,

    pub center_freq: u32,
    pub sample_rate: u32,
    pub gain: f64,

    pub fft_nperseg: usize,
    pub fft_window: WindowKind,

    pub signal_threshold_dbw: f64,
    pub snr_threshold_db: f64,
    pub signal_min_duration_ms: f64,
    pub signal_max_duration_ms: f64,

    pub sdr_timeout_s: f64,
    pub sdr_max_restart: u32,
    pub state_update_s: f64,

    pub matching_timeout_s: f64,
    pub matching_time_diff_s: f64,
    pub matching_bandwidth_hz: f64,
    pub matching_duration_diff_ms: Option<f64>,

    /// Daily `HH:MM:SS-HH:MM:SS` windows. Empty means "always on".
    #[serde(default)]
    pub schedule: Vec<String>,

    /// Pin each worker to `device_index mod cpu_count`.
    #[serde(default = "default_true")]
    pub cpu_affinity: bool,

    pub mqtt_broker: Option<String>,
    pub csv_output_dir: Option<PathBuf>,
    /// Defaults to the local hostname if unset, matching the original's
    /// `os.uname()[1]` default.
    pub station: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: vec![DeviceId::Index(0)],
            calibration: vec![0.0],
            center_freq: 150_100_000,
            sample_rate: 300_000,
            gain: 20.0,
            fft_nperseg: 256,
            fft_window: WindowKind::Hann,
            signal_threshold_dbw: -70.0,
            snr_threshold_db: 20.0,
            signal_min_duration_ms: 8.0,
            signal_max_duration_ms: 40.0,
            sdr_timeout_s: 5.0,
            sdr_max_restart: 5,
            state_update_s: 60.0,
            matching_timeout_s: 1.0,
            matching_time_diff_s: 0.01,
            matching_bandwidth_hz: 1000.0,
            matching_duration_diff_ms: Some(10.0),
            schedule: Vec::new(),
            cpu_affinity: true,
            mqtt_broker: None,
            csv_output_dir: None,
            station: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("loaded configuration from {path:?}");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        info!("saved configuration to {path:?}");
        Ok(())
    }

    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                    path: parent.display().to_string(),
                    source: e,
                })?;
            }
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("pulsewatch"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// The two fatal startup checks: calibration-vector length must match
    /// device count, and the schedule must be free of overlaps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        if self.device.len() != self.calibration.len() {
            return Err(ConfigError::CalibrationLengthMismatch {
                calibration_len: self.calibration.len(),
                device_len: self.device.len(),
            });
        }
        let intervals = self.schedule_intervals()?;
        crate::schedule::validate_non_overlap(&intervals)?;
        Ok(())
    }

    pub fn schedule_intervals(&self) -> Result<Vec<ScheduleInterval>, ConfigError> {
        self.schedule.iter().map(|s| ScheduleInterval::parse(s)).collect()
    }

    /// Zip `device[]` and `calibration[]` into per-device configs. Callers
    /// must have already called [`Config::validate`]; this panics on a
    /// length mismatch rather than re-checking it on every call.
    pub fn device_configs(&self) -> Vec<DeviceConfig> {
        self.device
            .iter()
            .zip(self.calibration.iter())
            .map(|(id, &calibration_db)| DeviceConfig {
                id: id.clone(),
                calibration_db,
                gain: self.gain,
            })
            .collect()
    }

    pub fn station_name(&self) -> String {
        self.station.clone().unwrap_or_else(|| {
            hostname_fallback()
        })
    }
}

fn hostname_fallback() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            let output = std::process::Command::new("hostname").output().ok()?;
            String::from_utf8(output.stdout).ok()
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "pulsewatch".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn mismatched_calibration_length_is_fatal() {
        let mut config = Config::default();
        config.calibration = vec![0.0, 1.0];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CalibrationLengthMismatch { .. })
        ));
    }

    #[test]
    fn overlapping_schedule_is_fatal() {
        let mut config = Config::default();
        config.schedule = vec!["06:00:00-12:00:00".into(), "11:00:00-18:00:00".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn device_configs_zips_calibration_by_position() {
        let mut config = Config::default();
        config.device = vec![DeviceId::Index(0), DeviceId::Index(1)];
        config.calibration = vec![1.5, -2.5];
        let devices = config.device_configs();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].calibration_db, -2.5);
    }
}
