// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! The dashboard's UI/rendering layer is explicitly out of scope (spec.md
//! §1). What *is* in scope is the snapshot buffer §4.5 registers as a
//! consumer: a bounded, thread-safe ring of recent [`Signal`]s per device,
//! recent [`MatchedSignal`]s, and the latest [`StateMessage`] per device,
//! kept up to date as items are dequeued. A downstream web layer (not part
//! of this crate) would hold a clone of [`DashboardSnapshot`] and read it
//! on demand; nothing here pushes data out.

use super::Consumer;
use crate::model::{DeviceId, MatchedSignal, QueueItem, Signal, StateMessage};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Default number of recent entries retained per ring.
const DEFAULT_CAPACITY: usize = 50;

struct Inner {
    capacity: usize,
    recent_signals: HashMap<DeviceId, VecDeque<Signal>>,
    recent_matched: VecDeque<MatchedSignal>,
    worker_state: HashMap<DeviceId, StateMessage>,
}

/// A cheap, cloneable handle onto the live dashboard snapshot.
#[derive(Clone)]
pub struct DashboardSnapshot {
    inner: Arc<Mutex<Inner>>,
}

impl DashboardSnapshot {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                capacity,
                recent_signals: HashMap::new(),
                recent_matched: VecDeque::with_capacity(capacity),
                worker_state: HashMap::new(),
            })),
        }
    }

    /// Most recent signals for `device`, oldest first.
    pub fn signals_for(&self, device: &DeviceId) -> Vec<Signal> {
        self.inner
            .lock()
            .recent_signals
            .get(device)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent matched signals, oldest first.
    pub fn recent_matched(&self) -> Vec<MatchedSignal> {
        self.inner.lock().recent_matched.iter().cloned().collect()
    }

    /// Latest known lifecycle state for every device that has reported one.
    pub fn worker_states(&self) -> HashMap<DeviceId, StateMessage> {
        self.inner.lock().worker_state.clone()
    }

    fn push_signal(&self, signal: Signal) {
        let mut inner = self.inner.lock();
        let capacity = inner.capacity;
        let ring = inner
            .recent_signals
            .entry(signal.device.clone())
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        if ring.len() >= capacity {
            ring.pop_front();
        }
        ring.push_back(signal);
    }

    fn push_matched(&self, matched: MatchedSignal) {
        let mut inner = self.inner.lock();
        if inner.recent_matched.len() >= inner.capacity {
            inner.recent_matched.pop_front();
        }
        inner.recent_matched.push_back(matched);
    }

    fn record_state(&self, state: StateMessage) {
        self.inner.lock().worker_state.insert(state.device.clone(), state);
    }
}

impl Default for DashboardSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered fan-out consumer that keeps a [`DashboardSnapshot`] current.
pub struct DashboardConsumer {
    snapshot: DashboardSnapshot,
}

impl DashboardConsumer {
    pub fn new(snapshot: DashboardSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot.clone()
    }
}

impl Consumer for DashboardConsumer {
    fn name(&self) -> &str {
        "dashboard"
    }

    fn handle(&mut self, item: &QueueItem) -> anyhow::Result<()> {
        match item {
            QueueItem::Signal(s) => self.snapshot.push_signal(s.clone()),
            QueueItem::Matched(m) => self.snapshot.push_matched(m.clone()),
            QueueItem::State(st) => self.snapshot.record_state(st.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkerState;
    use chrono::Utc;

    fn sig(device: DeviceId) -> Signal {
        Signal {
            device,
            ts: Utc::now(),
            frequency: 150_000_000.0,
            duration: 0.010,
            max_dbw: -30.0,
            avg_dbw: -35.0,
            std_db: 1.0,
            noise_dbw: -80.0,
            snr_db: 45.0,
        }
    }

    #[test]
    fn ring_buffer_keeps_only_most_recent_capacity_entries() {
        let snapshot = DashboardSnapshot::with_capacity(3);
        let mut consumer = DashboardConsumer::new(snapshot.clone());
        for _ in 0..5 {
            consumer.handle(&QueueItem::Signal(sig(DeviceId::Index(0)))).unwrap();
        }
        assert_eq!(snapshot.signals_for(&DeviceId::Index(0)).len(), 3);
    }

    #[test]
    fn separate_devices_get_separate_rings() {
        let snapshot = DashboardSnapshot::with_capacity(8);
        let mut consumer = DashboardConsumer::new(snapshot.clone());
        consumer.handle(&QueueItem::Signal(sig(DeviceId::Index(0)))).unwrap();
        consumer.handle(&QueueItem::Signal(sig(DeviceId::Index(1)))).unwrap();
        assert_eq!(snapshot.signals_for(&DeviceId::Index(0)).len(), 1);
        assert_eq!(snapshot.signals_for(&DeviceId::Index(1)).len(), 1);
    }

    #[test]
    fn records_latest_state_per_device() {
        let snapshot = DashboardSnapshot::new();
        let mut consumer = DashboardConsumer::new(snapshot.clone());
        consumer
            .handle(&QueueItem::State(StateMessage {
                device: DeviceId::Index(0),
                ts: Utc::now(),
                state: WorkerState::Started,
            }))
            .unwrap();
        consumer
            .handle(&QueueItem::State(StateMessage {
                device: DeviceId::Index(0),
                ts: Utc::now(),
                state: WorkerState::Running,
            }))
            .unwrap();
        let states = snapshot.worker_states();
        assert_eq!(states[&DeviceId::Index(0)].state, WorkerState::Running);
    }
}
