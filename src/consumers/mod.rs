// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Consumers registered with the fan-out queue at startup: CSV files, the
//! wire protocol publisher, and the dashboard snapshot buffer. Replaces
//! the upstream decorator-registered callback list with an explicit
//! Observer registry built once and never touched again.
//!
//! A decoder/serializer error in one consumer is isolated to that consumer
//! - [`Consumer::handle`] returns `anyhow::Result` precisely so the
//! supervisor's dispatch loop can log and continue rather than letting one
//! bad write wedge every other consumer.

pub mod csv;
pub mod dashboard;
pub mod mqtt;
pub mod wire;

use crate::model::QueueItem;

/// A registered sink for items drained from the fan-out queue.
pub trait Consumer: Send {
    fn name(&self) -> &str;
    fn handle(&mut self, item: &QueueItem) -> anyhow::Result<()>;
}
