// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Windowed FFT of a fixed-size I/Q block, `noverlap = 0`, two-sided
//! (signed) frequency axis, linear power.
//!
//! Bin ordering matches `numpy.fft.fftfreq` / `scipy.signal.spectrogram(...,
//! return_onesided=False)`: ascending from DC through the positive
//! frequencies up to (just below) the Nyquist rate, then wrapping to the
//! most negative frequency and ascending back to DC. This is deliberate -
//! the extractor's cross-block stitching only cares that bin `f` means the
//! same physical frequency in every block, not that the axis is visually
//! centered.

use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Window function applied to each `nperseg`-sample segment before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Hann,
    Hamming,
    Rectangular,
}

impl std::str::FromStr for WindowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hann" | "hanning" => Ok(WindowKind::Hann),
            "hamming" => Ok(WindowKind::Hamming),
            "rect" | "rectangular" | "boxcar" | "none" => Ok(WindowKind::Rectangular),
            other => Err(format!("unknown window kind: {other}")),
        }
    }
}

impl WindowKind {
    fn coefficients(self, n: usize) -> Vec<f64> {
        match self {
            WindowKind::Hann => (0..n)
                .map(|i| {
                    0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (n as f64 - 1.0)).cos()
                })
                .collect(),
            WindowKind::Hamming => (0..n)
                .map(|i| {
                    0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / (n as f64 - 1.0)).cos()
                })
                .collect(),
            WindowKind::Rectangular => vec![1.0; n],
        }
    }
}

/// The result of one acquisition step's spectrogram computation.
///
/// `power[f][t]` is linear (not dB) power, strictly positive (a tiny floor
/// is added to avoid literal zero on an all-silent bin).
#[derive(Debug, Clone)]
pub struct SpectrogramBlock {
    pub freqs: Vec<f64>,
    pub times: Vec<f64>,
    /// Row-major: `power[f * times.len() + t]`.
    pub power: Vec<f64>,
    pub nperseg: usize,
}

impl SpectrogramBlock {
    pub fn bin(&self, f: usize, t: usize) -> f64 {
        self.power[f * self.times.len() + t]
    }

    pub fn n_freqs(&self) -> usize {
        self.freqs.len()
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    /// Row for frequency bin `f` across the full time axis.
    pub fn row(&self, f: usize) -> &[f64] {
        let t = self.times.len();
        &self.power[f * t..(f + 1) * t]
    }

    pub fn dt(&self) -> f64 {
        if self.times.len() >= 2 {
            self.times[1] - self.times[0]
        } else {
            self.nperseg as f64 / (self.nperseg as f64).max(1.0)
        }
    }
}

/// Stateless computation of a [`SpectrogramBlock`] from a raw I/Q block.
pub struct SpectrogramEngine {
    nperseg: usize,
    window: WindowKind,
    planner: FftPlanner<f64>,
}

impl SpectrogramEngine {
    pub fn new(nperseg: usize, window: WindowKind) -> Self {
        Self {
            nperseg,
            window,
            planner: FftPlanner::new(),
        }
    }

    pub fn nperseg(&self) -> usize {
        self.nperseg
    }

    /// Compute the spectrogram of `samples` at sample rate `fs`, tuned to
    /// `center_freq` (only used to offset `freqs`, the engine itself is
    /// frequency-agnostic). `samples.len()` need not be an exact multiple
    /// of `nperseg`; the remainder is dropped, matching `T = N / nperseg`
    /// integer division.
    pub fn compute(
        &mut self,
        samples: &[Complex64],
        fs: f64,
        center_freq: f64,
    ) -> SpectrogramBlock {
        let nperseg = self.nperseg;
        let n_segments = if nperseg == 0 {
            0
        } else {
            samples.len() / nperseg
        };

        let dt = nperseg as f64 / fs;
        let times: Vec<f64> = (0..n_segments).map(|t| t as f64 * dt).collect();
        let freqs = fft_freqs(nperseg, fs, center_freq);

        if n_segments == 0 {
            return SpectrogramBlock {
                freqs,
                times,
                power: Vec::new(),
                nperseg,
            };
        }

        let window = self.window.coefficients(nperseg);
        let fft = self.planner.plan_fft_forward(nperseg);

        let mut power = vec![0.0f64; nperseg * n_segments];
        let mut scratch: Vec<Complex64> = vec![Complex64::new(0.0, 0.0); nperseg];

        for t in 0..n_segments {
            let seg = &samples[t * nperseg..(t + 1) * nperseg];
            for (i, s) in seg.iter().enumerate() {
                scratch[i] = s * window[i];
            }
            fft.process(&mut scratch);
            for f in 0..nperseg {
                let p = (scratch[f].norm_sqr() + 1e-20) / nperseg as f64;
                power[f * n_segments + t] = p;
            }
        }

        SpectrogramBlock {
            freqs,
            times,
            power,
            nperseg,
        }
    }
}

/// `fftfreq(n, 1/fs)` offset by `center_freq`, unshifted (DC-first) order.
fn fft_freqs(n: usize, fs: f64, center_freq: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let df = fs / n as f64;
    (0..n)
        .map(|i| {
            let signed_i = if i <= n / 2 {
                i as i64
            } else {
                i as i64 - n as i64
            };
            center_freq + signed_i as f64 * df
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize, fs: f64, freq: f64, amp: f64) -> Vec<Complex64> {
        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                let phase = 2.0 * std::f64::consts::PI * freq * t;
                Complex64::new(amp * phase.cos(), amp * phase.sin())
            })
            .collect()
    }

    #[test]
    fn segment_count_is_exact_division() {
        let mut engine = SpectrogramEngine::new(256, WindowKind::Hann);
        let samples = vec![Complex64::new(0.0, 0.0); 300_000];
        let block = engine.compute(&samples, 300_000.0, 0.0);
        assert_eq!(block.n_times(), 300_000 / 256);
        assert_eq!(block.n_freqs(), 256);
    }

    #[test]
    fn empty_block_yields_no_times() {
        let mut engine = SpectrogramEngine::new(256, WindowKind::Hann);
        let block = engine.compute(&[], 300_000.0, 0.0);
        assert_eq!(block.n_times(), 0);
    }

    #[test]
    fn tone_peaks_in_expected_bin() {
        let fs = 300_000.0;
        let nperseg = 256;
        let mut engine = SpectrogramEngine::new(nperseg, WindowKind::Rectangular);
        let freq = fs / nperseg as f64 * 10.0; // exactly bin 10
        let samples = tone(nperseg * 4, fs, freq, 1.0);
        let block = engine.compute(&samples, fs, 0.0);
        let mut best = (0usize, f64::MIN);
        for f in 0..block.n_freqs() {
            let p = block.bin(f, 0);
            if p > best.1 {
                best = (f, p);
            }
        }
        assert_eq!(best.0, 10);
    }

    #[test]
    fn window_from_str_accepts_known_names() {
        assert_eq!("hann".parse::<WindowKind>().unwrap(), WindowKind::Hann);
        assert_eq!(
            "rectangular".parse::<WindowKind>().unwrap(),
            WindowKind::Rectangular
        );
        assert!("bogus".parse::<WindowKind>().is_err());
    }
}
