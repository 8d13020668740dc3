// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! pulsewatch - a multi-antenna VHF telemetry pulse receiver.
//!
//! Continuously samples several SDR dongles tuned to the same narrow VHF
//! band, detects short narrowband transmitter pulses embedded in the
//! wideband I/Q stream, and emits both per-antenna detections and
//! cross-device *matched* detections for downstream storage, MQTT
//! fan-out, and a live dashboard.
//!
//! # Architecture
//!
//! ```text
//! SDR -> spectrogram -> pulse extractor -> shadow filter -> fan-out queue
//!                                                               |
//!                              +--------------------------------+
//!                              v              v              v
//!                          matcher          csv/wire      dashboard
//!                              |
//!                              +-> MatchedSignal back onto the fan-out queue
//! ```
//!
//! One [`worker`] owns one SDR end to end (acquisition, spectrogram,
//! extraction, shadow filtering) and runs on its own OS thread. The
//! [`supervisor`] owns the set of workers, the fan-out [`queue`], the
//! registered [`consumers`], and the [`matcher`], and enforces restart
//! budgets and the optional daily [`schedule`].

#![warn(missing_docs)]
#![allow(dead_code)]

/// Value types shared by every other module: `Signal`, `MatchedSignal`,
/// `StateMessage`, `DeviceId`.
pub mod model;

/// Windowed FFT of a fixed-size I/Q block.
pub mod spectrogram;

/// Per-frequency-bin plateau detection with cross-block stitching.
pub mod extractor;

/// Intra-block suppression of weaker, overlapping detections.
pub mod shadow;

/// The SDR driver seam and its deterministic fake backend.
pub mod sdr;

/// One worker owning one SDR end to end.
pub mod worker;

/// The bounded, broadcast fan-out queue linking workers to consumers.
pub mod queue;

/// Streaming cross-device grouping of signals into matched detections.
pub mod matcher;

/// Daily acquisition windows and their overlap validation.
pub mod schedule;

/// Flat, TOML-backed configuration.
pub mod config;

/// Registered fan-out sinks: CSV files, the wire protocol, MQTT, dashboard.
pub mod consumers;

/// Typed error enums for configuration and worker-acquisition boundaries.
pub mod error;

/// Owns the worker set, the schedule, and the consumer dispatch loop.
pub mod supervisor;

pub use config::Config;
pub use model::{DeviceId, MatchedSignal, Signal, StateMessage};
pub use supervisor::Supervisor;

/// pulsewatch version, from the crate's `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
