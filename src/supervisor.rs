// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Starts/stops/restarts device workers, enforces per-device restart
//! budgets, runs the optional daily schedule, and drains the fan-out queue
//! to every registered consumer. Runs on its own thread of control,
//! separate from every worker (spec.md §5).

use crate::config::{Config, DeviceConfig};
use crate::consumers::Consumer;
use crate::matcher::{MatcherTolerances, SignalMatcher};
use crate::model::{DeviceId, QueueItem};
use crate::queue::{ConsumerHandle, FanoutQueue};
use crate::schedule::ScheduleInterval;
use crate::worker::{self, WorkerConfig, WorkerHandle};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A consumer dispatched inline on the supervisor's own dispatch loop
/// (cheap sinks: CSV, dashboard snapshot). Per spec.md §5, some consumers
/// instead run on their own thread (the MQTT publisher already owns its
/// connection thread internally and is dispatched inline here too - the
/// blocking work it does is a bounded `client.publish` call, not an
/// unbounded wait).
struct ConsumerEntry {
    handle: ConsumerHandle,
    consumer: Box<dyn Consumer>,
}

struct WorkerSlot {
    device_id: DeviceId,
    device_config: DeviceConfig,
    handle: Option<WorkerHandle>,
    restart_budget: u32,
    /// Whether the schedule currently wants this device running. Health
    /// checks are skipped for inactive slots - an intentionally stopped
    /// worker is not a failure.
    active: bool,
}

/// Raised when a worker exhausts its restart budget; the process
/// terminates rather than leaving a device silently dark forever.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorFatal {
    #[error("device {device} exhausted its restart budget ({restart_budget}), terminating")]
    RestartBudgetExhausted { device: DeviceId, restart_budget: u32 },
}

pub struct Supervisor {
    config: Config,
    queue: FanoutQueue,
    workers: Vec<WorkerSlot>,
    matcher: SignalMatcher,
    matcher_handle: ConsumerHandle,
    consumers: Vec<ConsumerEntry>,
    running: Arc<AtomicBool>,
    schedule: Vec<ScheduleInterval>,
    schedule_running: bool,
    cpu_count: Option<usize>,
    demo: bool,
}

impl Supervisor {
    /// Build a supervisor from a validated configuration: create the
    /// fan-out queue, register the matcher plus every consumer named in
    /// `consumers`, and spawn one worker per configured device, honoring
    /// the schedule's initial state.
    ///
    /// `demo` forces every worker onto the deterministic fake SDR backend
    /// regardless of whether this binary was built with the `hardware`
    /// feature.
    pub fn build(
        config: Config,
        consumers: Vec<(&str, Box<dyn Consumer>)>,
        running: Arc<AtomicBool>,
        demo: bool,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let mut names: Vec<&str> = vec!["matcher"];
        names.extend(consumers.iter().map(|(n, _)| *n));

        let (queue, mut handles) = FanoutQueue::new(&names, 1024);
        let matcher_handle = handles.remove(0);

        let consumer_entries = consumers
            .into_iter()
            .zip(handles)
            .map(|((_, consumer), handle)| ConsumerEntry { handle, consumer })
            .collect();

        let device_configs = config.device_configs();
        let schedule = config.schedule_intervals()?;
        let schedule_running =
            crate::schedule::is_active(&schedule, chrono::Local::now().time());

        let cpu_count = if config.cpu_affinity {
            let ids = core_affinity::get_core_ids().unwrap_or_default();
            if ids.is_empty() {
                warn!("cpu_affinity requested but no core ids were reported; leaving scheduling to the OS");
                None
            } else {
                Some(ids.len())
            }
        } else {
            None
        };

        let mut workers = Vec::with_capacity(device_configs.len());
        for (index, device_config) in device_configs.into_iter().enumerate() {
            let handle = if schedule_running {
                Some(spawn_worker(index, &device_config, &config, &queue, cpu_count, demo))
            } else {
                None
            };
            workers.push(WorkerSlot {
                device_id: device_config.id.clone(),
                device_config,
                handle,
                restart_budget: config.sdr_max_restart,
                active: schedule_running,
            });
        }

        let matcher = SignalMatcher::new(
            config.device.clone(),
            MatcherTolerances {
                matching_timeout_s: config.matching_timeout_s,
                time_diff_s: config.matching_time_diff_s,
                bandwidth_hz: config.matching_bandwidth_hz,
                duration_diff_s: config.matching_duration_diff_ms.map(|ms| ms / 1000.0),
            },
        );

        Ok(Self {
            config,
            queue,
            workers,
            matcher,
            matcher_handle,
            consumers: consumer_entries,
            running,
            schedule,
            schedule_running,
            cpu_count,
            demo,
        })
    }

    /// Run the supervision loop until `running` is cleared (clean
    /// shutdown) or a worker exhausts its restart budget (fatal).
    pub fn run(mut self) -> anyhow::Result<()> {
        info!("supervisor starting, {} device(s) configured", self.workers.len());
        while self.running.load(Ordering::Relaxed) {
            let tick_start = Instant::now();
            self.check_workers()?;
            self.apply_schedule();
            let remaining = Duration::from_secs(1).saturating_sub(tick_start.elapsed());
            self.dispatch_tick(remaining);
        }
        self.shutdown();
        Ok(())
    }

    fn check_workers(&mut self) -> Result<(), SupervisorFatal> {
        let now_ms = Utc::now().timestamp_millis();
        let timeout_ms = (self.config.sdr_timeout_s * 1000.0 * 2.0) as i64;

        for index in 0..self.workers.len() {
            if !self.workers[index].active {
                continue;
            }
            let dead = match &self.workers[index].handle {
                None => true,
                Some(h) => !h.health().is_alive() || now_ms - h.health().last_data_ts_ms() > timeout_ms,
            };
            if !dead {
                continue;
            }

            if let Some(mut handle) = self.workers[index].handle.take() {
                handle.stop();
                if !handle.join(Duration::from_secs(5)) {
                    warn!(device = %self.workers[index].device_id, "worker did not exit within grace period, abandoning thread");
                }
            }

            let slot = &mut self.workers[index];
            if slot.restart_budget == 0 {
                error!(device = %slot.device_id, "restart budget exhausted, terminating");
                return Err(SupervisorFatal::RestartBudgetExhausted {
                    device: slot.device_id.clone(),
                    restart_budget: self.config.sdr_max_restart,
                });
            }
            slot.restart_budget -= 1;
            warn!(device = %slot.device_id, "respawning worker, {} restart(s) remaining", slot.restart_budget);
            let device_config = slot.device_config.clone();
            slot.handle = Some(spawn_worker(index, &device_config, &self.config, &self.queue, self.cpu_count, self.demo));
        }
        Ok(())
    }

    /// Start or stop every worker when entering or leaving a scheduled
    /// window. A no-op when no schedule is configured (always on).
    fn apply_schedule(&mut self) {
        if self.schedule.is_empty() {
            return;
        }
        let now = chrono::Local::now().time();
        let should_run = crate::schedule::is_active(&self.schedule, now);
        if should_run == self.schedule_running {
            return;
        }
        self.schedule_running = should_run;

        if should_run {
            info!("entering scheduled acquisition window, starting workers");
            for index in 0..self.workers.len() {
                self.workers[index].active = true;
                if self.workers[index].handle.is_none() {
                    let device_config = self.workers[index].device_config.clone();
                    self.workers[index].handle =
                        Some(spawn_worker(index, &device_config, &self.config, &self.queue, self.cpu_count, self.demo));
                }
            }
        } else {
            info!("leaving scheduled acquisition window, stopping workers");
            for slot in &mut self.workers {
                slot.active = false;
                if let Some(mut handle) = slot.handle.take() {
                    handle.stop();
                    if !handle.join(Duration::from_secs(5)) {
                        warn!(device = %slot.device_id, "worker did not exit within grace period, abandoning thread");
                    }
                }
            }
        }
    }

    /// Drain every consumer's channel (plus the matcher's) for up to
    /// `budget`, dispatching each popped item. Busy items are drained
    /// without waiting; an idle tick sleeps in short slices so the budget
    /// is not burned spinning.
    fn dispatch_tick(&mut self, budget: Duration) {
        let deadline = Instant::now() + budget;
        loop {
            let mut any = false;
            any |= self.dispatch_matcher_ready();
            for entry in &mut self.consumers {
                while let Some(item) = entry.handle.pop_timeout(Duration::from_millis(0)) {
                    any = true;
                    if let Err(err) = entry.consumer.handle(&item) {
                        warn!(consumer = entry.consumer.name(), "consumer failed to handle item: {err}");
                    }
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            if !any {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                std::thread::sleep(remaining.min(Duration::from_millis(50)));
            }
        }
    }

    /// Pop every immediately-available item from the matcher's channel.
    /// Only [`QueueItem::Signal`] drives matching; `MatchedSignal` and
    /// `StateMessage` items are ignored here, which is what keeps the
    /// matcher from ever re-consuming its own output (spec.md §4.6).
    fn dispatch_matcher_ready(&mut self) -> bool {
        let mut any = false;
        while let Some(item) = self.matcher_handle.pop_timeout(Duration::from_millis(0)) {
            any = true;
            if let QueueItem::Signal(signal) = item {
                for matched in self.matcher.step(signal) {
                    self.queue.push(QueueItem::Matched(matched));
                }
            }
        }
        any
    }

    /// Stop every worker, flush any in-flight matched groups so nothing
    /// pending is silently dropped, and give every consumer one last
    /// dispatch pass before the process exits.
    fn shutdown(&mut self) {
        info!("supervisor shutting down");
        for slot in &mut self.workers {
            if let Some(mut handle) = slot.handle.take() {
                handle.stop();
                if !handle.join(Duration::from_secs(5)) {
                    warn!(device = %slot.device_id, "worker did not exit within grace period during shutdown");
                }
            }
        }
        for matched in self.matcher.drain_all() {
            self.queue.push(QueueItem::Matched(matched));
        }
        self.dispatch_tick(Duration::from_millis(500));
    }
}

fn spawn_worker(
    index: usize,
    device_config: &DeviceConfig,
    config: &Config,
    queue: &FanoutQueue,
    cpu_count: Option<usize>,
    demo: bool,
) -> WorkerHandle {
    let worker_config = WorkerConfig {
        device: device_config.clone(),
        center_freq: config.center_freq,
        sample_rate: config.sample_rate,
        fft_nperseg: config.fft_nperseg,
        fft_window: config.fft_window,
        block_samples: config.sample_rate as usize,
        signal_threshold_dbw: config.signal_threshold_dbw,
        snr_threshold_db: config.snr_threshold_db,
        signal_min_duration_ms: config.signal_min_duration_ms,
        signal_max_duration_ms: config.signal_max_duration_ms,
        sdr_timeout_s: config.sdr_timeout_s,
        state_update_s: config.state_update_s,
        use_hardware: cfg!(feature = "hardware") && !demo,
        cpu_pin: cpu_count.map(|n| index % n),
    };
    worker::spawn(device_config.id.clone(), worker_config, queue.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::csv::CsvConsumer;
    use crate::model::DeviceId;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.device = vec![DeviceId::Index(0), DeviceId::Index(1)];
        config.calibration = vec![0.0, 0.0];
        config.sdr_timeout_s = 2.0;
        config.sample_rate = 64_000;
        config.fft_nperseg = 64;
        config
    }

    #[test]
    fn build_spawns_one_worker_per_device_and_registers_consumers() {
        let dir = std::env::temp_dir().join(format!("pulsewatch-sup-test-{}", std::process::id()));
        let csv = CsvConsumer::open_signals(&dir, "test").unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let supervisor = Supervisor::build(
            test_config(),
            vec![("csv-signal", Box::new(csv))],
            running,
            true,
        )
        .unwrap();
        assert_eq!(supervisor.workers.len(), 2);
        assert_eq!(supervisor.consumers.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn clean_shutdown_returns_ok_once_running_flag_clears() {
        let running = Arc::new(AtomicBool::new(true));
        let supervisor = Supervisor::build(test_config(), vec![], running.clone(), true).unwrap();

        let stopper = running.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            stopper.store(false, Ordering::Relaxed);
        });

        assert!(supervisor.run().is_ok());
    }
}
