// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Self-describing wire encodings for [`Signal`] and [`MatchedSignal`]:
//! JSON (human/debug friendly) and CBOR, where a duration is carried under
//! CBOR tag `1337` as a floating-point seconds value rather than a plain
//! number, so a decoder can distinguish "this field is a duration" from an
//! arbitrary float without a schema.

use crate::model::{MatchedSignal, Signal};
use serde::Serialize;
use serde_cbor::tags::Tagged;
use serde_cbor::Value;

/// The CBOR tag used to mark a duration-as-seconds field.
pub const DURATION_TAG: u64 = 1337;

pub fn signal_to_json(signal: &Signal) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(signal)?)
}

pub fn matched_to_json(matched: &MatchedSignal) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(matched)?)
}

/// A CBOR-friendly mirror of [`Signal`] whose `duration` field is wrapped
/// in [`Tagged`] with [`DURATION_TAG`]. `serde_cbor` has no way to tag an
/// individual struct field in a derived `Serialize` impl, so the wire
/// shape is built by hand rather than derived directly on [`Signal`].
#[derive(Serialize)]
struct SignalWire {
    device: String,
    ts: String,
    frequency: f64,
    duration: Tagged<f64>,
    max_dbw: f64,
    avg_dbw: f64,
    std_db: f64,
    noise_dbw: f64,
    snr_db: f64,
}

pub fn signal_to_cbor(signal: &Signal) -> anyhow::Result<Vec<u8>> {
    let wire = SignalWire {
        device: signal.device.to_string(),
        ts: signal.ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        frequency: signal.frequency,
        duration: Tagged::new(Some(DURATION_TAG), signal.duration),
        max_dbw: signal.max_dbw,
        avg_dbw: signal.avg_dbw,
        std_db: signal.std_db,
        noise_dbw: signal.noise_dbw,
        snr_db: signal.snr_db,
    };
    Ok(serde_cbor::to_vec(&wire)?)
}

#[derive(Serialize)]
struct MatchedSignalWire {
    devices: Vec<String>,
    ts: String,
    frequency: f64,
    duration: Tagged<f64>,
    avgs: Vec<Option<f64>>,
}

pub fn matched_to_cbor(matched: &MatchedSignal) -> anyhow::Result<Vec<u8>> {
    let wire = MatchedSignalWire {
        devices: matched.devices.iter().map(|d| d.to_string()).collect(),
        ts: matched.ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        frequency: matched.frequency,
        duration: Tagged::new(Some(DURATION_TAG), matched.duration),
        avgs: matched.avgs.clone(),
    };
    Ok(serde_cbor::to_vec(&wire)?)
}

/// Decode a tagged duration value back to seconds, recognizing
/// [`DURATION_TAG`]. Exposed for decoder-side tests and any downstream
/// tooling that reads this crate's CBOR stream directly.
pub fn decode_duration_tag(value: &Value) -> Option<f64> {
    match value {
        Value::Tag(tag, inner) if *tag == DURATION_TAG => match inner.as_ref() {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceId;
    use chrono::Utc;

    fn sample_signal() -> Signal {
        Signal {
            device: DeviceId::Index(1),
            ts: Utc::now(),
            frequency: 150_000_000.0,
            duration: 0.0123,
            max_dbw: -30.0,
            avg_dbw: -35.0,
            std_db: 1.2,
            noise_dbw: -80.0,
            snr_db: 45.0,
        }
    }

    #[test]
    fn signal_cbor_round_trips_duration_tag() {
        let signal = sample_signal();
        let bytes = signal_to_cbor(&signal).unwrap();
        let value: Value = serde_cbor::from_slice(&bytes).unwrap();
        let duration_value = match &value {
            Value::Map(map) => map
                .iter()
                .find(|(k, _)| matches!(k, Value::Text(t) if t == "duration"))
                .map(|(_, v)| v.clone()),
            _ => None,
        }
        .expect("duration field present");
        let decoded = decode_duration_tag(&duration_value).expect("tagged duration");
        assert!((decoded - signal.duration).abs() < 1e-9);
    }

    #[test]
    fn signal_json_round_trips() {
        let signal = sample_signal();
        let bytes = signal_to_json(&signal).unwrap();
        let decoded: Signal = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, signal);
    }
}
