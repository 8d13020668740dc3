// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! One worker owns one SDR end-to-end: acquisition, spectrogram, pulse
//! extraction, shadow filtering, and emission onto the fan-out queue. Runs
//! on a dedicated OS thread (`std::thread`, not a tokio task) so that a
//! slow or wedged SDR can never starve another device's acquisition loop
//! of a cooperative scheduler's attention.

use crate::config::DeviceConfig;
use crate::error::WorkerError;
use crate::extractor::{ExtractorConfig, PulseExtractor};
use crate::model::{DeviceId, QueueItem, StateMessage, WorkerState};
use crate::queue::FanoutQueue;
use crate::sdr::{open_device, SdrDevice};
use crate::shadow::filter_shadow_signals;
use crate::spectrogram::SpectrogramEngine;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared, lock-free health surface the supervisor polls once a second.
/// Single-writer (the worker thread), many-reader (the supervisor).
pub struct WorkerHealth {
    last_data_ts_ms: AtomicI64,
    alive: AtomicBool,
}

impl WorkerHealth {
    fn new() -> Self {
        Self {
            last_data_ts_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            alive: AtomicBool::new(true),
        }
    }

    pub fn last_data_ts_ms(&self) -> i64 {
        self.last_data_ts_ms.load(Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_data_ts_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }
}

/// Per-device timing and gating knobs a worker needs; a narrowed view of
/// [`crate::config::Config`] so the worker module doesn't depend on the
/// whole config surface.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub device: DeviceConfig,
    pub center_freq: u32,
    pub sample_rate: u32,
    pub fft_nperseg: usize,
    pub fft_window: crate::spectrogram::WindowKind,
    pub block_samples: usize,
    pub signal_threshold_dbw: f64,
    pub snr_threshold_db: f64,
    pub signal_min_duration_ms: f64,
    pub signal_max_duration_ms: f64,
    pub sdr_timeout_s: f64,
    pub state_update_s: f64,
    pub use_hardware: bool,
    /// CPU core to pin this worker's acquisition thread to
    /// (`device_index mod cpu_count`, per spec §4.7), or `None` to leave
    /// scheduling to the OS.
    pub cpu_pin: Option<usize>,
}

/// A running (or finished) device worker. `spawn` returns this immediately;
/// the acquisition loop runs on its own thread until it stops itself or is
/// asked to via [`WorkerHandle::stop`].
pub struct WorkerHandle {
    pub device_id: DeviceId,
    health: Arc<WorkerHealth>,
    running: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn health(&self) -> &WorkerHealth {
        &self.health
    }

    /// Cooperative stop: sets the shared running flag. The worker notices
    /// at its next loop turn (or watchdog tick) and exits; callers that
    /// need a hard guarantee should join with a grace period and then
    /// treat a still-alive thread as unrecoverable.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn join(&mut self, timeout: Duration) -> bool {
        if let Some(handle) = self.join.take() {
            // std::thread::JoinHandle has no timed join; a worker thread is
            // expected to notice `running` within one watchdog tick, so a
            // short sleep-then-check loop is an acceptable approximation.
            let start = std::time::Instant::now();
            while !handle.is_finished() {
                if start.elapsed() > timeout {
                    self.join = Some(handle);
                    return false;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            let _ = handle.join();
            true
        } else {
            true
        }
    }
}

/// Spawn a worker thread for `device_id`. Returns immediately; acquisition
/// begins on the new thread.
pub fn spawn(device_id: DeviceId, config: WorkerConfig, queue: FanoutQueue) -> WorkerHandle {
    let health = Arc::new(WorkerHealth::new());
    let running = Arc::new(AtomicBool::new(true));

    let thread_health = health.clone();
    let thread_running = running.clone();
    let thread_device_id = device_id.clone();

    let join = std::thread::Builder::new()
        .name(format!("sdr-worker-{device_id}"))
        .spawn(move || {
            run(thread_device_id, config, queue, thread_health, thread_running);
        })
        .expect("failed to spawn device worker thread");

    WorkerHandle {
        device_id,
        health,
        running,
        join: Some(join),
    }
}

fn run(
    device_id: DeviceId,
    config: WorkerConfig,
    queue: FanoutQueue,
    health: Arc<WorkerHealth>,
    running: Arc<AtomicBool>,
) {
    info!(device = %device_id, "SDR {device_id} starting acquisition");

    if let Some(core) = config.cpu_pin {
        if !core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
            warn!(device = %device_id, "SDR {device_id} could not pin to core {core}, leaving scheduling to the OS");
        }
    }

    if let Err(err) = acquire(&device_id, &config, &queue, &health, &running) {
        error!(device = %device_id, "SDR {device_id} stopping: {err}");
    }

    emit_state(&queue, &device_id, WorkerState::Stopped);
    health.mark_dead();
    info!(device = %device_id, "SDR {device_id} stopped");
}

/// Open, configure, and run the acquisition loop for one device. Every
/// failure kind the worker's state machine needs to react to (spec.md §4.4:
/// SDR I/O error, watchdog timeout, unrecoverable clock drift) is returned
/// as a typed [`WorkerError`] rather than logged ad-hoc at the call site, so
/// `run` has a single place to convert a failure into a `STOPPED` message.
fn acquire(
    device_id: &DeviceId,
    config: &WorkerConfig,
    queue: &FanoutQueue,
    health: &Arc<WorkerHealth>,
    running: &Arc<AtomicBool>,
) -> Result<(), WorkerError> {
    let mut sdr = open_device(device_id, config.use_hardware)
        .map_err(|err| WorkerError::SdrIo(format!("failed to open: {err}")))?;

    let result = (|| -> Result<(), WorkerError> {
        configure(sdr.as_mut(), config)
            .map_err(|err| WorkerError::SdrIo(format!("failed to configure: {err}")))?;

        let mut engine = SpectrogramEngine::new(config.fft_nperseg, config.fft_window);
        let extractor_config = ExtractorConfig::new(
            config.signal_threshold_dbw,
            config.snr_threshold_db,
            config.signal_min_duration_ms / 1000.0,
            config.signal_max_duration_ms / 1000.0,
            config.device.calibration_db,
        );
        let mut extractor = PulseExtractor::new(device_id.clone(), extractor_config);

        let block_len_s = config.block_samples as f64 / config.sample_rate as f64;

        let mut self_ts = Utc::now();
        let mut first_block = true;
        let mut last_heartbeat = Utc::now() - chrono::Duration::seconds(1_000_000);

        while running.load(Ordering::Relaxed) {
            let read_started = std::time::Instant::now();
            let samples = sdr
                .read_block(config.block_samples)
                .map_err(|err| WorkerError::SdrIo(format!("read error: {err}")))?;

            if read_started.elapsed() > Duration::from_secs_f64(config.sdr_timeout_s) {
                return Err(WorkerError::WatchdogTimeout {
                    timeout_s: config.sdr_timeout_s,
                });
            }

            let block_start = self_ts;
            let spectrogram =
                engine.compute(&samples, config.sample_rate as f64, config.center_freq as f64);
            let signals = extractor.extract(spectrogram, block_start);
            let filtered = filter_shadow_signals(&signals);

            for signal in filtered {
                queue.push(QueueItem::Signal(signal));
            }

            health.touch();

            let now = Utc::now();
            self_ts += chrono::Duration::microseconds((block_len_s * 1e6).round() as i64);
            let clock_drift = (now - self_ts).num_microseconds().unwrap_or(0) as f64 / 1e6;
            if clock_drift.abs() > 2.0 * block_len_s {
                extractor.reset();
                return Err(WorkerError::ClockDriftExceeded {
                    drift_s: clock_drift,
                    block_len_s,
                });
            }

            if first_block {
                emit_state(queue, device_id, WorkerState::Started);
                last_heartbeat = now;
                first_block = false;
            } else if (now - last_heartbeat).num_milliseconds() as f64 / 1000.0
                >= config.state_update_s
            {
                emit_state(queue, device_id, WorkerState::Running);
                last_heartbeat = now;
            }

            debug!(device = %device_id, "SDR {device_id} block processed in {:?}", read_started.elapsed());
        }

        Ok(())
    })();

    let _ = sdr.close();
    result
}

fn configure(sdr: &mut dyn SdrDevice, config: &WorkerConfig) -> Result<(), crate::sdr::SdrError> {
    sdr.set_sample_rate(config.sample_rate)?;
    sdr.set_center_freq(config.center_freq)?;
    sdr.set_gain(config.device.gain)?;
    Ok(())
}

fn emit_state(queue: &FanoutQueue, device_id: &DeviceId, state: WorkerState) {
    queue.push(QueueItem::State(StateMessage {
        device: device_id.clone(),
        ts: Utc::now(),
        state,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            device: DeviceConfig {
                id: DeviceId::Index(0),
                calibration_db: 0.0,
                gain: 20.0,
            },
            center_freq: 150_000_000,
            sample_rate: 300_000,
            fft_nperseg: 256,
            fft_window: crate::spectrogram::WindowKind::Hann,
            block_samples: 300_000,
            signal_threshold_dbw: -70.0,
            snr_threshold_db: 20.0,
            signal_min_duration_ms: 8.0,
            signal_max_duration_ms: 40.0,
            sdr_timeout_s: 5.0,
            state_update_s: 10.0,
            use_hardware: false,
            cpu_pin: None,
        }
    }

    #[test]
    fn worker_emits_started_then_stops_cleanly() {
        let (queue, handles) = FanoutQueue::new(&["test"], 64);
        let mut handle = spawn(DeviceId::Index(0), test_config(), queue);

        // Wait for at least a STARTED message, then ask it to stop.
        let mut saw_started = false;
        for _ in 0..50 {
            if let Some(item) = handles[0].pop_timeout(Duration::from_millis(50)) {
                if let QueueItem::State(s) = &item {
                    if s.state == WorkerState::Started {
                        saw_started = true;
                        break;
                    }
                }
            }
        }
        assert!(saw_started, "expected a STARTED state message");

        handle.stop();
        assert!(handle.join(Duration::from_secs(5)));
    }
}
