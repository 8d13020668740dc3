// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Immutable value types shared by every other module: [`Signal`],
//! [`MatchedSignal`], [`StateMessage`] and the [`DeviceId`] sum type that
//! replaces the loosely-typed "index or serial string" device handles used
//! upstream.
//!
//! Durations and time offsets are carried as plain `f64` seconds rather than
//! `chrono::Duration` - the extractor and matcher do arithmetic on them
//! (`dt`, `block_len`, tolerance windows) far more often than they format
//! them, and `chrono::Duration` cannot hold sub-millisecond fractions
//! without lossy conversions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A device handle resolved once at worker startup, either a numeric SDR
/// index or a hardware serial number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    Index(u32),
    Serial(String),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Index(i) => write!(f, "{i}"),
            DeviceId::Serial(s) => write!(f, "{s}"),
        }
    }
}

/// Convert a power ratio expressed in dB to linear power.
pub fn from_db(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert linear power to dB. Callers are responsible for keeping `value`
/// strictly positive; extractor code always adds a small floor before
/// calling this to avoid `-inf` on a literal zero bin.
pub fn to_db(value: f64) -> f64 {
    10.0 * value.log10()
}

/// A single per-device pulse detection, already calibration-adjusted.
///
/// See the invariants enforced by [`crate::extractor::PulseExtractor`]:
/// `ts + duration < now`, `snr_db == avg_dbw - noise_dbw`, and
/// `duration` within the configured `[min_duration, max_duration]` gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub device: DeviceId,
    pub ts: DateTime<Utc>,
    /// Absolute carrier frequency in Hz (center frequency plus bin offset).
    pub frequency: f64,
    /// Pulse length in seconds.
    pub duration: f64,
    pub max_dbw: f64,
    pub avg_dbw: f64,
    pub std_db: f64,
    pub noise_dbw: f64,
    pub snr_db: f64,
}

impl Signal {
    /// CSV header row, matching the field order of [`Signal::as_csv_fields`].
    pub const CSV_HEADER: &'static [&'static str] = &[
        "device",
        "ts",
        "frequency",
        "duration",
        "max_dbw",
        "avg_dbw",
        "std_db",
        "noise_dbw",
        "snr_db",
    ];

    pub fn as_csv_fields(&self) -> Vec<String> {
        vec![
            self.device.to_string(),
            self.ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            format!("{:.3}", self.frequency),
            format!("{:.6}", self.duration),
            format!("{:.3}", self.max_dbw),
            format!("{:.3}", self.avg_dbw),
            format!("{:.3}", self.std_db),
            format!("{:.3}", self.noise_dbw),
            format!("{:.3}", self.snr_db),
        ]
    }
}

/// A cross-device grouping of [`Signal`]s believed to be the same
/// real-world transmission.
///
/// `avgs[i]` holds the `avg_dbw` contributed by `devices[i]`, or `None` if
/// that device never contributed a member to this group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSignal {
    pub devices: Vec<DeviceId>,
    pub ts: DateTime<Utc>,
    pub duration: f64,
    pub frequency: f64,
    pub avgs: Vec<Option<f64>>,
}

impl MatchedSignal {
    pub const CSV_HEADER: &'static [&'static str] =
        &["devices", "ts", "frequency", "duration", "avgs"];

    /// Number of devices that actually contributed a member signal.
    pub fn member_count(&self) -> usize {
        self.avgs.iter().filter(|a| a.is_some()).count()
    }

    /// Ordered `avg_dbw` values, one per configured device, `None` where a
    /// device did not contribute. Exposed so a downstream bearing estimator
    /// (see [`crate::matcher::bearing`]) can consume them without needing
    /// access to the matcher's internal group state.
    pub fn avgs(&self) -> &[Option<f64>] {
        &self.avgs
    }

    pub fn as_csv_fields(&self) -> Vec<String> {
        let devices = self
            .devices
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("+");
        let avgs = self
            .avgs
            .iter()
            .map(|a| a.map(|v| format!("{v:.3}")).unwrap_or_else(|| "".into()))
            .collect::<Vec<_>>()
            .join("+");
        vec![
            devices,
            self.ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            format!("{:.3}", self.frequency),
            format!("{:.6}", self.duration),
            avgs,
        ]
    }
}

/// Worker lifecycle state, the `state` field of a [`StateMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerState {
    Init,
    Started,
    Running,
    Stopped,
}

/// A worker lifecycle event, emitted on state transitions and as a
/// rate-limited `RUNNING` heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    pub device: DeviceId,
    pub ts: DateTime<Utc>,
    pub state: WorkerState,
}

/// The tagged union carried on the fan-out queue, replacing the upstream
/// `AbstractSignal` inheritance hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueItem {
    Signal(Signal),
    Matched(MatchedSignal),
    State(StateMessage),
}

impl QueueItem {
    /// State messages are never dropped by the fan-out queue's
    /// back-pressure policy; everything else is droppable.
    pub fn is_state(&self) -> bool {
        matches!(self, QueueItem::State(_))
    }

    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            QueueItem::Signal(s) => Some(&s.device),
            QueueItem::State(s) => Some(&s.device),
            QueueItem::Matched(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_round_trip() {
        let linear = 3.5e-8;
        let db = to_db(linear);
        assert!((from_db(db) - linear).abs() < 1e-15);
    }

    #[test]
    fn device_id_display() {
        assert_eq!(DeviceId::Index(2).to_string(), "2");
        assert_eq!(DeviceId::Serial("sdr-north".into()).to_string(), "sdr-north");
    }

    #[test]
    fn matched_signal_member_count_ignores_absent() {
        let m = MatchedSignal {
            devices: vec![DeviceId::Index(0), DeviceId::Index(1), DeviceId::Index(2)],
            ts: Utc::now(),
            duration: 0.01,
            frequency: 150_000_000.0,
            avgs: vec![Some(-40.0), None, Some(-38.0)],
        };
        assert_eq!(m.member_count(), 2);
    }
}
