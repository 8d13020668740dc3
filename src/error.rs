// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Typed error enums for the two module boundaries that need to be matched
//! on rather than just chained: configuration loading and per-device
//! acquisition. Everything above those boundaries (supervisor, main) deals
//! in `anyhow::Result` instead.

use thiserror::Error;

/// Errors raised while loading or validating a [`crate::config::Config`].
///
/// All variants are fatal at startup: the process logs and exits with a
/// non-zero status rather than attempting to run with a partial config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file as TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(
        "calibration vector has {calibration_len} entries but {device_len} devices are configured"
    )]
    CalibrationLengthMismatch {
        calibration_len: usize,
        device_len: usize,
    },

    #[error("schedule intervals {a:?} and {b:?} overlap")]
    OverlappingSchedule {
        a: (String, String),
        b: (String, String),
    },

    #[error("invalid schedule interval {0}: {1}")]
    InvalidScheduleInterval(String, String),

    #[error("no devices configured")]
    NoDevices,
}

/// Errors raised inside a single device worker's acquisition loop.
///
/// These never propagate as process-level failures. A worker converts any
/// `WorkerError` into a `STOPPED` [`crate::model::StateMessage`] and exits
/// its thread; the supervisor is the only thing that acts on the death.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("SDR I/O error: {0}")]
    SdrIo(String),

    #[error("block deadline of {timeout_s:.1}s exceeded waiting for samples")]
    WatchdogTimeout { timeout_s: f64 },

    #[error("clock drift {drift_s:.3}s exceeds 2x block length {block_len_s:.3}s")]
    ClockDriftExceeded { drift_s: f64, block_len_s: f64 },

    #[error("worker was asked to stop")]
    Cancelled,
}
