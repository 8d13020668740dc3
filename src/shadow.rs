// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Intra-block suppression of weaker, time-overlapping detections in other
//! frequency bins (sidelobe / adjacent-bin leakage).

use crate::model::Signal;

/// Drop every signal that has a louder, temporally overlapping sibling in
/// the same block-output list. `O(K^2)` in the per-block detection count,
/// which stays small (tens) by construction of the extractor's gates.
///
/// Order of survivors is preserved relative to `signals`, since callers
/// (and I5) rely on per-device emission order matching onset time order.
pub fn filter_shadow_signals(signals: &[Signal]) -> Vec<Signal> {
    signals
        .iter()
        .enumerate()
        .filter(|(i, s)| !is_shadow_of_any(*i, s, signals))
        .map(|(_, s)| s.clone())
        .collect()
}

fn is_shadow_of_any(i: usize, s: &Signal, all: &[Signal]) -> bool {
    all.iter()
        .enumerate()
        .any(|(j, other)| j != i && is_shadow_of(s, other))
}

/// True if `s` is shadowed by `other`: they temporally overlap and `other`
/// is louder.
fn is_shadow_of(s: &Signal, other: &Signal) -> bool {
    let overlap = s.ts <= other.ts + chrono::Duration::microseconds((other.duration * 1e6) as i64)
        && s.ts + chrono::Duration::microseconds((s.duration * 1e6) as i64) >= other.ts;
    overlap && other.max_dbw > s.max_dbw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceId;
    use chrono::Utc;

    fn sig(max_dbw: f64, ts_offset_ms: i64) -> Signal {
        Signal {
            device: DeviceId::Index(0),
            ts: Utc::now() + chrono::Duration::milliseconds(ts_offset_ms),
            frequency: 150_000_000.0,
            duration: 0.010,
            max_dbw,
            avg_dbw: max_dbw - 3.0,
            std_db: 1.0,
            noise_dbw: -80.0,
            snr_db: 40.0,
        }
    }

    #[test]
    fn louder_overlapping_signal_suppresses_quieter_one() {
        let a = sig(-30.0, 0);
        let b = sig(-45.0, 0);
        let out = filter_shadow_signals(&[a.clone(), b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].max_dbw, -30.0);
    }

    #[test]
    fn non_overlapping_signals_both_survive() {
        let a = sig(-30.0, 0);
        let b = sig(-45.0, 100);
        let out = filter_shadow_signals(&[a, b]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn filter_is_idempotent() {
        let signals = vec![sig(-30.0, 0), sig(-45.0, 0), sig(-20.0, 200)];
        let once = filter_shadow_signals(&signals);
        let twice = filter_shadow_signals(&once);
        assert_eq!(once, twice);
    }
}
