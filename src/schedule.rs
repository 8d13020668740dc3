// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Daily `HH:MM:SS-HH:MM:SS` acquisition windows and their overlap
//! validation. A configured schedule with any two intervals sharing an
//! instant is rejected at startup as a fatal configuration error.

use crate::error::ConfigError;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// One daily `[start, stop)` window in local wall time. `start < stop` is
/// required; overnight-spanning windows (`stop < start`) are not
/// supported, a narrowing decision recorded in `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInterval {
    pub start: NaiveTime,
    pub stop: NaiveTime,
}

impl ScheduleInterval {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (start_str, stop_str) = raw.split_once('-').ok_or_else(|| {
            ConfigError::InvalidScheduleInterval(raw.to_string(), "missing '-' separator".into())
        })?;
        let start = NaiveTime::parse_from_str(start_str.trim(), "%H:%M:%S")
            .map_err(|e| ConfigError::InvalidScheduleInterval(raw.to_string(), e.to_string()))?;
        let stop = NaiveTime::parse_from_str(stop_str.trim(), "%H:%M:%S")
            .map_err(|e| ConfigError::InvalidScheduleInterval(raw.to_string(), e.to_string()))?;
        if start >= stop {
            return Err(ConfigError::InvalidScheduleInterval(
                raw.to_string(),
                "start must be strictly before stop".into(),
            ));
        }
        Ok(Self { start, stop })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t < self.stop
    }

    fn label(&self) -> (String, String) {
        (
            self.start.format("%H:%M:%S").to_string(),
            self.stop.format("%H:%M:%S").to_string(),
        )
    }
}

/// Reject a schedule if any two intervals share any instant. `O(n^2)` in
/// the interval count, which is always small (a handful of daily windows).
pub fn validate_non_overlap(intervals: &[ScheduleInterval]) -> Result<(), ConfigError> {
    for i in 0..intervals.len() {
        for j in (i + 1)..intervals.len() {
            let a = intervals[i];
            let b = intervals[j];
            if a.start < b.stop && b.start < a.stop {
                return Err(ConfigError::OverlappingSchedule {
                    a: a.label(),
                    b: b.label(),
                });
            }
        }
    }
    Ok(())
}

/// True if any configured interval is currently active, or if the schedule
/// is empty (meaning "always on", matching the absence of a schedule in
/// the original implementation running continuously).
pub fn is_active(intervals: &[ScheduleInterval], now: NaiveTime) -> bool {
    intervals.is_empty() || intervals.iter().any(|i| i.contains(now))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> ScheduleInterval {
        ScheduleInterval::parse(s).unwrap()
    }

    #[test]
    fn parses_valid_interval() {
        let i = t("06:00:00-18:00:00");
        assert_eq!(i.start, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(i.stop, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
    }

    #[test]
    fn rejects_inverted_interval() {
        assert!(ScheduleInterval::parse("18:00:00-06:00:00").is_err());
    }

    #[test]
    fn detects_overlap() {
        let intervals = vec![t("06:00:00-12:00:00"), t("11:00:00-18:00:00")];
        assert!(validate_non_overlap(&intervals).is_err());
    }

    #[test]
    fn adjacent_non_overlapping_intervals_are_accepted() {
        let intervals = vec![t("06:00:00-12:00:00"), t("12:00:00-18:00:00")];
        assert!(validate_non_overlap(&intervals).is_ok());
    }

    #[test]
    fn empty_schedule_means_always_active() {
        assert!(is_active(&[], NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
    }

    #[test]
    fn active_window_reported_correctly() {
        let intervals = vec![t("06:00:00-12:00:00")];
        assert!(is_active(&intervals, NaiveTime::from_hms_opt(7, 0, 0).unwrap()));
        assert!(!is_active(&intervals, NaiveTime::from_hms_opt(13, 0, 0).unwrap()));
    }
}
