// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! The fan-out queue: a single bounded broadcast buffer from device workers
//! to every registered consumer.
//!
//! `tokio::sync::broadcast` (used elsewhere in this codebase's lineage for
//! the sensor event bus) was considered and rejected here: a lagging
//! broadcast receiver drops everything it missed, with no way to protect
//! state messages from that blanket eviction. The back-pressure policy
//! this module needs - block for a bounded interval, then drop only the
//! oldest *non-state* entry - is hand-rolled instead on top of a bounded
//! deque per consumer.

use crate::model::QueueItem;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

struct ConsumerChannel {
    buf: Mutex<VecDeque<QueueItem>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    dropped: AtomicU64,
    last_push_ms: AtomicU64,
}

/// A point-in-time snapshot of one consumer's queue pressure, used by the
/// supervisor's periodic health log.
#[derive(Debug, Clone, Copy)]
pub struct QueueHealth {
    pub depth: usize,
    pub capacity: usize,
    pub dropped: u64,
}

/// Handle held by a producer (a device worker) to broadcast items to every
/// registered consumer.
#[derive(Clone)]
pub struct FanoutQueue {
    consumers: Arc<Vec<(String, Arc<ConsumerChannel>)>>,
    push_timeout: Duration,
}

/// Handle held by one consumer to drain its share of the broadcast.
pub struct ConsumerHandle {
    name: String,
    channel: Arc<ConsumerChannel>,
}

impl FanoutQueue {
    /// Build a queue with one channel per named consumer. Consumer names
    /// must be known up front; there is no dynamic subscribe/unsubscribe,
    /// matching the startup-time Observer registry this module replaces.
    pub fn new(consumer_names: &[&str], capacity: usize) -> (Self, Vec<ConsumerHandle>) {
        let mut consumers = Vec::with_capacity(consumer_names.len());
        let mut handles = Vec::with_capacity(consumer_names.len());
        for name in consumer_names {
            let channel = Arc::new(ConsumerChannel {
                buf: Mutex::new(VecDeque::with_capacity(capacity)),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity,
                dropped: AtomicU64::new(0),
                last_push_ms: AtomicU64::new(0),
            });
            consumers.push((name.to_string(), channel.clone()));
            handles.push(ConsumerHandle {
                name: name.to_string(),
                channel,
            });
        }
        (
            Self {
                consumers: Arc::new(consumers),
                push_timeout: Duration::from_millis(500),
            },
            handles,
        )
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    /// Broadcast `item` to every registered consumer. State messages are
    /// never dropped; everything else can be evicted under pressure.
    pub fn push(&self, item: QueueItem) {
        for (_, channel) in self.consumers.iter() {
            push_one(channel, item.clone(), self.push_timeout);
        }
    }

    pub fn health(&self) -> Vec<(String, QueueHealth)> {
        self.consumers
            .iter()
            .map(|(name, channel)| {
                let depth = channel.buf.lock().len();
                (
                    name.clone(),
                    QueueHealth {
                        depth,
                        capacity: channel.capacity,
                        dropped: channel.dropped.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

fn push_one(channel: &Arc<ConsumerChannel>, item: QueueItem, timeout: Duration) {
    let mut buf = channel.buf.lock();
    if buf.len() >= channel.capacity && !item.is_state() {
        let deadline = Instant::now() + timeout;
        while buf.len() >= channel.capacity {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let result = channel.not_full.wait_for(&mut buf, remaining);
            if result.timed_out() {
                break;
            }
        }
        if buf.len() >= channel.capacity {
            buf.pop_front();
            channel.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("fan-out queue full, dropped oldest non-state message");
        }
    }
    buf.push_back(item);
    channel
        .last_push_ms
        .store(now_ms(), Ordering::Relaxed);
    channel.not_full.notify_one();
    channel.not_empty.notify_one();
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl ConsumerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pop one item, waiting up to `timeout`. Used by the supervisor's
    /// ~1s dispatch budget and by dedicated consumer threads alike.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueueItem> {
        let mut buf = self.channel.buf.lock();
        if buf.is_empty() {
            let deadline = Instant::now() + timeout;
            while buf.is_empty() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return None;
                }
                let result = self.channel.not_empty.wait_for(&mut buf, remaining);
                if result.timed_out() && buf.is_empty() {
                    return None;
                }
            }
        }
        let item = buf.pop_front();
        self.channel.not_full.notify_one();
        item
    }

    pub fn health(&self) -> QueueHealth {
        QueueHealth {
            depth: self.channel.buf.lock().len(),
            capacity: self.channel.capacity,
            dropped: self.channel.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceId, StateMessage, WorkerState};
    use chrono::Utc;

    fn state_item() -> QueueItem {
        QueueItem::State(StateMessage {
            device: DeviceId::Index(0),
            ts: Utc::now(),
            state: WorkerState::Running,
        })
    }

    #[test]
    fn broadcasts_to_every_consumer() {
        let (queue, handles) = FanoutQueue::new(&["a", "b"], 8);
        queue.push(state_item());
        for h in &handles {
            assert!(h.pop_timeout(Duration::from_millis(10)).is_some());
        }
    }

    fn signal_item(freq: f64) -> QueueItem {
        QueueItem::Signal(crate::model::Signal {
            device: DeviceId::Index(0),
            ts: Utc::now(),
            frequency: freq,
            duration: 0.010,
            max_dbw: -40.0,
            avg_dbw: -42.0,
            std_db: 1.0,
            noise_dbw: -80.0,
            snr_db: 38.0,
        })
    }

    #[test]
    fn drops_oldest_non_state_message_when_full() {
        let (queue, handles) = FanoutQueue::new(&["only"], 2);
        let queue = queue.with_push_timeout(Duration::from_millis(5));
        queue.push(signal_item(1.0));
        queue.push(signal_item(2.0));
        queue.push(signal_item(3.0)); // forces a drop, queue capacity is 2

        let health = handles[0].health();
        assert_eq!(health.dropped, 1);
        assert_eq!(health.depth, 2);
    }

    #[test]
    fn state_messages_are_never_dropped_even_when_full() {
        let (queue, handles) = FanoutQueue::new(&["only"], 1);
        let queue = queue.with_push_timeout(Duration::from_millis(5));
        queue.push(signal_item(1.0));
        queue.push(state_item());
        queue.push(state_item());

        let health = handles[0].health();
        assert_eq!(health.dropped, 0);
        assert_eq!(health.depth, 3);
    }
}
