// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Per-frequency-bin plateau detection with cross-block stitching.
//!
//! Owns exactly one prior [`SpectrogramBlock`] so that a pulse beginning
//! near the end of block *n-1* can be reconstructed when block *n* arrives.
//! Negative `start` indices in the algorithm below refer to the tail of
//! that prior block; there is no lookahead beyond the current block.

use crate::model::{to_db, Signal};
use crate::spectrogram::SpectrogramBlock;
use chrono::{DateTime, Utc};

/// Thresholds and duration gates, already converted where convenient.
#[derive(Debug, Clone, Copy)]
pub struct ExtractorConfig {
    /// Linear power threshold, `10^(signal_threshold_dbw/10)`.
    pub p_thresh: f64,
    /// Linear SNR threshold, `10^(snr_threshold_db/10)`.
    pub snr_thresh: f64,
    pub min_duration_s: f64,
    pub max_duration_s: f64,
    pub calibration_db: f64,
}

impl ExtractorConfig {
    pub fn new(
        signal_threshold_dbw: f64,
        snr_threshold_db: f64,
        min_duration_s: f64,
        max_duration_s: f64,
        calibration_db: f64,
    ) -> Self {
        Self {
            p_thresh: crate::model::from_db(signal_threshold_dbw),
            snr_thresh: crate::model::from_db(snr_threshold_db),
            min_duration_s,
            max_duration_s,
            calibration_db,
        }
    }
}

/// Stateful, per-device plateau extractor. One instance per
/// [`crate::worker::DeviceWorker`]; never shared across devices.
pub struct PulseExtractor {
    device: crate::model::DeviceId,
    config: ExtractorConfig,
    prior: Option<(SpectrogramBlock, DateTime<Utc>)>,
}

impl PulseExtractor {
    pub fn new(device: crate::model::DeviceId, config: ExtractorConfig) -> Self {
        Self {
            device,
            config,
            prior: None,
        }
    }

    /// Drop the remembered prior block, forcing any in-progress stitching
    /// to restart. Called by the worker when clock drift forces a clean
    /// restart of the acquisition loop.
    pub fn reset(&mut self) {
        self.prior = None;
    }

    /// Extract signals from `block`, whose first sample was acquired at
    /// `block_start`. Returns signals in `(bin, start)` order, which the
    /// shadow filter relies on to preserve ordering among survivors.
    pub fn extract(&mut self, block: SpectrogramBlock, block_start: DateTime<Utc>) -> Vec<Signal> {
        let t_len = block.n_times();
        let dt = block.dt();
        let mut out = Vec::new();

        if t_len == 0 {
            self.prior = Some((block, block_start));
            return out;
        }

        let min_duration_num = (self.config.min_duration_s / dt).floor() as i64;
        let step = min_duration_num.max(1) as usize;

        let prior_len = self.prior.as_ref().map(|(b, _)| b.n_times()).unwrap_or(0);
        let start_min: i64 = if self.prior.is_some() {
            -(prior_len as i64) + 1
        } else {
            0
        };

        for f in 0..block.n_freqs() {
            let row = block.row(f);
            let freq_avg = lazy_mean(row);
            let mut freq_avg_computed = false;
            let mut freq_avg_val = 0.0;

            let mut ti_skip: i64 = i64::MIN;
            let mut t = 0usize;
            while t < t_len {
                let ti = t as i64;
                t += step;

                if ti < ti_skip {
                    continue;
                }

                let p = row[ti as usize];
                if !freq_avg_computed {
                    freq_avg_val = freq_avg();
                    freq_avg_computed = true;
                }
                if p < self.config.p_thresh || p / freq_avg_val < self.config.snr_thresh {
                    continue;
                }

                // Extend backwards, possibly into the prior block. Each
                // iteration re-tests the sample at the *current* `start`
                // (not `start - 1`) before decrementing, matching the
                // reference's loop: on the first sub-threshold sample it
                // breaks without decrementing, so `start` lands on that
                // failing sample rather than the last passing one - the
                // boundary sample is included in the slice/duration.
                let mut start = ti;
                while start > start_min {
                    let passes = self
                        .sample_at(&block, f, start, prior_len)
                        .map(|v| v >= self.config.p_thresh && v / freq_avg_val >= self.config.snr_thresh)
                        .unwrap_or(false);
                    if !passes {
                        break;
                    }
                    start -= 1;
                }

                // Extend forwards within the current block only.
                let mut end = ti;
                while end < t_len as i64 - 1 {
                    let candidate = end + 1;
                    let v = row[candidate as usize];
                    if v >= self.config.p_thresh && v / freq_avg_val >= self.config.snr_thresh {
                        end = candidate;
                    } else {
                        break;
                    }
                }
                // `end` is inclusive so far; the reference algorithm treats
                // the boundary as the first index that no longer qualifies,
                // so convert to that convention here.
                let end_exclusive = if end == t_len as i64 - 1 {
                    t_len as i64
                } else {
                    end + 1
                };
                ti_skip = end_exclusive;

                if end_exclusive == t_len as i64 {
                    // May continue into the next block; will be
                    // re-detected once that block is available.
                    continue;
                }

                let duration = self.duration_of(&block, start, end_exclusive, dt, prior_len);
                if duration < self.config.min_duration_s || duration > self.config.max_duration_s
                {
                    continue;
                }

                let slice = self.data_slice(&block, f, start, end_exclusive, prior_len);
                let ts = self.ts_of(&block, start, block_start, dt, prior_len);
                let signal = self.build_signal(&slice, freq_avg_val, block.freqs[f], ts, duration);
                out.push(signal);
            }
        }

        self.prior = Some((block, block_start));
        out
    }

    fn sample_at(&self, block: &SpectrogramBlock, f: usize, idx: i64, prior_len: usize) -> Option<f64> {
        if idx >= 0 {
            Some(block.row(f)[idx as usize])
        } else {
            let (prior_block, _) = self.prior.as_ref()?;
            let offset = prior_len as i64 + idx;
            if offset < 0 {
                return None;
            }
            Some(prior_block.row(f)[offset as usize])
        }
    }

    fn duration_of(
        &self,
        block: &SpectrogramBlock,
        start: i64,
        end_exclusive: i64,
        dt: f64,
        prior_len: usize,
    ) -> f64 {
        let end_time = block.times[(end_exclusive - 1) as usize] + dt;
        let start_time = if start >= 0 {
            block.times[start as usize]
        } else {
            let (prior_block, _) = self.prior.as_ref().expect("prior block must exist for negative start");
            let prior_dt = prior_block.dt();
            let offset = prior_len as i64 + start;
            -((prior_len as i64 - offset) as f64) * prior_dt
        };
        end_time - start_time
    }

    fn data_slice(
        &self,
        block: &SpectrogramBlock,
        f: usize,
        start: i64,
        end_exclusive: i64,
        prior_len: usize,
    ) -> Vec<f64> {
        let mut slice = Vec::new();
        if start < 0 {
            let (prior_block, _) = self.prior.as_ref().expect("prior block must exist for negative start");
            let row = prior_block.row(f);
            let from = (prior_len as i64 + start) as usize;
            slice.extend_from_slice(&row[from..]);
        }
        let current_from = start.max(0) as usize;
        slice.extend_from_slice(&block.row(f)[current_from..end_exclusive as usize]);
        slice
    }

    /// Absolute onset timestamp for a plateau starting at `start`, which may
    /// be negative (into the prior block).
    fn ts_of(
        &self,
        block: &SpectrogramBlock,
        start: i64,
        block_start: DateTime<Utc>,
        dt: f64,
        prior_len: usize,
    ) -> DateTime<Utc> {
        let _ = block;
        if start >= 0 {
            block_start + chrono::Duration::microseconds((start as f64 * dt * 1e6).round() as i64)
        } else {
            let (prior_block, prior_start) = self
                .prior
                .as_ref()
                .expect("prior block must exist for negative start");
            let prior_dt = prior_block.dt();
            let offset_from_prior_start = (prior_len as i64 + start) as f64 * prior_dt;
            *prior_start
                + chrono::Duration::microseconds((offset_from_prior_start * 1e6).round() as i64)
        }
    }

    fn build_signal(
        &self,
        slice: &[f64],
        freq_avg: f64,
        freq_offset: f64,
        ts: DateTime<Utc>,
        duration: f64,
    ) -> Signal {
        let n = slice.len() as f64;
        let sum: f64 = slice.iter().sum();
        let avg = sum / n;
        let max = slice.iter().cloned().fold(f64::MIN, f64::max);
        // Dispersion is computed in the dB domain about the dB-domain mean,
        // not dB of the linear mean - those differ by Jensen's inequality
        // for any non-constant slice.
        let mean_db = slice.iter().map(|v| to_db(*v)).sum::<f64>() / n;
        let var_db = slice
            .iter()
            .map(|v| {
                let d = to_db(*v) - mean_db;
                d * d
            })
            .sum::<f64>()
            / n;
        let std_db = var_db.sqrt();

        Signal {
            device: self.device.clone(),
            ts,
            frequency: freq_offset,
            duration,
            max_dbw: to_db(max) - self.config.calibration_db,
            avg_dbw: to_db(avg) - self.config.calibration_db,
            std_db,
            // Calibration is subtracted here too (the original leaves it
            // out), which keeps snr_db == avg_dbw - noise_dbw exactly
            // rather than only when calibration_db == 0.
            noise_dbw: to_db(freq_avg) - self.config.calibration_db,
            snr_db: to_db(avg / freq_avg),
        }
    }
}

fn lazy_mean(row: &[f64]) -> impl Fn() -> f64 + '_ {
    move || row.iter().sum::<f64>() / row.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceId;

    fn make_extractor(cal_db: f64) -> PulseExtractor {
        let cfg = ExtractorConfig::new(-70.0, 20.0, 0.008, 0.040, cal_db);
        PulseExtractor::new(DeviceId::Index(0), cfg)
    }

    fn synthetic_block(fs: f64, nperseg: usize, n_segments: usize, tone_bin: usize, tone_level: f64, noise_level: f64, active: impl Fn(usize) -> bool) -> SpectrogramBlock {
        let n_freqs = nperseg;
        let n_times = n_segments;
        let mut power = vec![noise_level; n_freqs * n_times];
        for t in 0..n_times {
            if active(t) {
                power[tone_bin * n_times + t] = tone_level;
            }
        }
        let dt = nperseg as f64 / fs;
        let times = (0..n_times).map(|t| t as f64 * dt).collect();
        let freqs = (0..n_freqs).map(|f| f as f64).collect();
        SpectrogramBlock {
            freqs,
            times,
            power,
            nperseg,
        }
    }

    #[test]
    fn std_db_centers_on_db_domain_mean() {
        // linear [1, 100] -> dB [0, 20], mean 10, std 10: verifies std_db is
        // computed about mean(dB(x)), not dB(mean(x)) (dB(50.5) =~ 17 dB,
        // which would give a materially different, wrong std).
        let ext = make_extractor(0.0);
        let signal = ext.build_signal(&[1.0, 100.0], 1.0, 0.0, Utc::now(), 0.01);
        assert!(
            (signal.std_db - 10.0).abs() < 1e-9,
            "expected std_db == 10.0, got {}",
            signal.std_db
        );
    }

    #[test]
    fn empty_block_yields_nothing() {
        let mut ext = make_extractor(0.0);
        let block = SpectrogramBlock {
            freqs: vec![],
            times: vec![],
            power: vec![],
            nperseg: 256,
        };
        let out = ext.extract(block, Utc::now());
        assert!(out.is_empty());
    }

    #[test]
    fn pulse_entirely_within_one_block_is_detected() {
        let fs = 300_000.0;
        let nperseg = 256;
        let dt = nperseg as f64 / fs;
        let n_segments = (fs / nperseg as f64).ceil() as usize; // ~1s worth
        let active_from = 10;
        let active_len = (0.016 / dt).round() as usize; // 16ms, inside [8,40]ms
        let block = synthetic_block(
            fs,
            nperseg,
            n_segments,
            5,
            crate::model::from_db(-40.0),
            crate::model::from_db(-80.0),
            |t| t >= active_from && t < active_from + active_len && t < n_segments - 5,
        );
        let mut ext = make_extractor(0.0);
        let out = ext.extract(block, Utc::now());
        assert_eq!(out.len(), 1, "expected exactly one detection, got {out:?}");
        let s = &out[0];
        assert!(s.max_dbw > -45.0 && s.max_dbw < -35.0);
    }

    #[test]
    fn end_of_block_candidate_is_rejected_then_recovered() {
        let fs = 300_000.0;
        let nperseg = 256;
        let n_segments = 40;
        let block1 = synthetic_block(
            fs,
            nperseg,
            n_segments,
            5,
            crate::model::from_db(-40.0),
            crate::model::from_db(-80.0),
            |t| t >= n_segments - 2,
        );
        let mut ext = make_extractor(0.0);
        let start = Utc::now();
        let out1 = ext.extract(block1, start);
        assert!(out1.is_empty(), "end-of-block candidate must be rejected");

        let block2 = synthetic_block(
            fs,
            nperseg,
            n_segments,
            5,
            crate::model::from_db(-40.0),
            crate::model::from_db(-80.0),
            |t| t < 20,
        );
        let dt = nperseg as f64 / fs;
        let block_len = chrono::Duration::microseconds((n_segments as f64 * dt * 1e6) as i64);
        let out2 = ext.extract(block2, start + block_len);
        assert_eq!(out2.len(), 1, "expected stitched detection on block 2");
    }
}
