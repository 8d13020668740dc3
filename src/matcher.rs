// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Streaming, bounded-memory grouping of per-device [`Signal`]s into
//! [`MatchedSignal`]s.
//!
//! Expiry is keyed on `group.ts` (the group's start time), not `ts_mid`.
//! The upstream matcher used the two inconsistently across its expiry and
//! completion checks; `ts` is monotonic from first insertion onward, which
//! makes it the only one of the two that is safe to expire against.

use crate::model::{DeviceId, MatchedSignal, Signal};
use chrono::{DateTime, Utc};

pub mod bearing;

/// Tolerances used by [`SignalMatcher::has_member`].
#[derive(Debug, Clone, Copy)]
pub struct MatcherTolerances {
    pub matching_timeout_s: f64,
    pub time_diff_s: f64,
    pub bandwidth_hz: f64,
    /// `None` disables the duration check entirely, per spec §4.6.
    pub duration_diff_s: Option<f64>,
}

struct Group {
    ts: DateTime<Utc>,
    duration: f64,
    frequency: f64,
    /// One slot per configured device, in the same order as `devices`.
    member_signals: Vec<Option<Signal>>,
}

impl Group {
    fn from_signal(s: &Signal, device_count: usize, device_index: usize) -> Self {
        let mut member_signals = vec![None; device_count];
        member_signals[device_index] = Some(s.clone());
        Self {
            ts: s.ts,
            duration: s.duration,
            frequency: s.frequency,
            member_signals,
        }
    }

    fn recompute_aggregates(&mut self) {
        let present: Vec<&Signal> = self.member_signals.iter().flatten().collect();
        self.ts = present.iter().map(|s| s.ts).min().expect("group must have at least one member");
        self.duration = present
            .iter()
            .map(|s| s.duration)
            .fold(f64::MIN, f64::max);
        let mut freqs: Vec<f64> = present.iter().map(|s| s.frequency).collect();
        freqs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        self.frequency = median(&freqs);
    }

    fn to_matched(&self, devices: &[DeviceId]) -> MatchedSignal {
        MatchedSignal {
            devices: devices.to_vec(),
            ts: self.ts,
            duration: self.duration,
            frequency: self.frequency,
            avgs: self
                .member_signals
                .iter()
                .map(|m| m.as_ref().map(|s| s.avg_dbw))
                .collect(),
        }
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Streaming matcher. One instance for the whole pipeline (not per
/// device): it reads every [`Signal`] emitted by every worker.
pub struct SignalMatcher {
    devices: Vec<DeviceId>,
    tolerances: MatcherTolerances,
    groups: Vec<Group>,
}

impl SignalMatcher {
    pub fn new(devices: Vec<DeviceId>, tolerances: MatcherTolerances) -> Self {
        Self {
            devices,
            tolerances,
            groups: Vec::new(),
        }
    }

    fn device_index(&self, device: &DeviceId) -> Option<usize> {
        self.devices.iter().position(|d| d == device)
    }

    /// Feed one incoming signal. Returns every group that expired as a
    /// result of this call's reference time (`signal.ts`), emitted exactly
    /// once, in insertion order.
    pub fn step(&mut self, signal: Signal) -> Vec<MatchedSignal> {
        let expired = self.expire(signal.ts);

        let device_index = match self.device_index(&signal.device) {
            Some(i) => i,
            None => {
                tracing::warn!(
                    device = %signal.device,
                    "matcher received a signal from an unconfigured device, ignoring"
                );
                return expired;
            }
        };

        if let Some(group) = self
            .groups
            .iter_mut()
            .find(|g| has_member(g, &signal, &self.tolerances))
        {
            attach(group, signal, device_index);
        } else {
            self.groups
                .push(Group::from_signal(&signal, self.devices.len(), device_index));
        }

        expired
    }

    /// Remove and return every in-flight group whose `ts < reference -
    /// matching_timeout_s`.
    fn expire(&mut self, reference: DateTime<Utc>) -> Vec<MatchedSignal> {
        let timeout = chrono::Duration::microseconds(
            (self.tolerances.matching_timeout_s * 1e6).round() as i64,
        );
        let cutoff = reference - timeout;
        let mut expired = Vec::new();
        let mut remaining = Vec::with_capacity(self.groups.len());
        for group in self.groups.drain(..) {
            if group.ts < cutoff {
                expired.push(group.to_matched(&self.devices));
            } else {
                remaining.push(group);
            }
        }
        self.groups = remaining;
        expired
    }

    /// Force every remaining in-flight group to emit, used at shutdown so
    /// no pending match is silently lost when the process exits.
    pub fn drain_all(&mut self) -> Vec<MatchedSignal> {
        self.groups
            .drain(..)
            .map(|g| g.to_matched(&self.devices))
            .collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.groups.len()
    }
}

fn has_member(group: &Group, s: &Signal, tol: &MatcherTolerances) -> bool {
    let freq_ok = (s.frequency - group.frequency).abs() <= tol.bandwidth_hz / 2.0;

    let dt = chrono::Duration::microseconds((tol.time_diff_s * 1e6).round() as i64);
    let group_dur = chrono::Duration::microseconds((group.duration * 1e6).round() as i64);
    let s_dur = chrono::Duration::microseconds((s.duration * 1e6).round() as i64);
    let time_ok = s.ts - dt <= group.ts + group_dur && s.ts + s_dur + dt >= group.ts;

    let duration_ok = match tol.duration_diff_s {
        Some(dd) => (s.duration - group.duration).abs() <= dd / 2.0,
        None => true,
    };

    freq_ok && time_ok && duration_ok
}

fn attach(group: &mut Group, signal: Signal, device_index: usize) {
    match &group.member_signals[device_index] {
        Some(existing) if existing.avg_dbw >= signal.avg_dbw => {
            // Existing member is at least as loud; keep it, per §8 S6.
        }
        _ => {
            group.member_signals[device_index] = Some(signal);
        }
    }
    group.recompute_aggregates();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tol() -> MatcherTolerances {
        MatcherTolerances {
            matching_timeout_s: 1.0,
            time_diff_s: 0.01,
            bandwidth_hz: 1000.0,
            duration_diff_s: Some(0.010),
        }
    }

    fn devices() -> Vec<DeviceId> {
        (0..4).map(DeviceId::Index).collect()
    }

    fn sig(device: u32, ts: DateTime<Utc>, freq: f64, avg_dbw: f64) -> Signal {
        Signal {
            device: DeviceId::Index(device),
            ts,
            frequency: freq,
            duration: 0.010,
            max_dbw: avg_dbw + 2.0,
            avg_dbw,
            std_db: 0.5,
            noise_dbw: -80.0,
            snr_db: avg_dbw + 80.0,
        }
    }

    #[test]
    fn four_devices_within_tolerance_form_one_matched_group() {
        let mut matcher = SignalMatcher::new(devices(), tol());
        let ts = Utc::now();
        for i in 0..4u32 {
            let expired = matcher.step(sig(i, ts, 150_000_000.0 + i as f64 * 50.0, -40.0 - i as f64));
            assert!(expired.is_empty());
        }
        assert_eq!(matcher.in_flight_count(), 1);

        let later = ts + chrono::Duration::milliseconds(1100);
        let expired = matcher.step(sig(0, later, 150_000_000.0, -20.0));
        assert_eq!(expired.len(), 1);
        let m = &expired[0];
        assert_eq!(m.member_count(), 4);
        assert_eq!(m.ts, ts);
    }

    #[test]
    fn duplicate_device_keeps_louder_detection() {
        let mut matcher = SignalMatcher::new(devices(), tol());
        let ts = Utc::now();
        matcher.step(sig(0, ts, 150_000_000.0, -50.0));
        matcher.step(sig(0, ts, 150_000_000.0, -45.0));

        let expired = matcher.drain_all();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].avgs[0], Some(-45.0));
    }

    #[test]
    fn groups_emit_only_on_expiry_not_on_every_insert() {
        let mut matcher = SignalMatcher::new(devices(), tol());
        let ts = Utc::now();
        for i in 0..3u32 {
            let expired = matcher.step(sig(i, ts, 150_000_000.0, -40.0));
            assert!(expired.is_empty(), "must not emit before expiry");
        }
    }

    #[test]
    fn out_of_tolerance_frequency_starts_a_new_group() {
        let mut matcher = SignalMatcher::new(devices(), tol());
        let ts = Utc::now();
        matcher.step(sig(0, ts, 150_000_000.0, -40.0));
        matcher.step(sig(1, ts, 150_900_000.0, -40.0));
        assert_eq!(matcher.in_flight_count(), 2);
    }
}
