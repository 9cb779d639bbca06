//! Spectral and statistical analysis of a captured buffer.
//!
//! None of these operations touch the input; each one widens the samples to f64 and works
//! on its own copy. Everything is computed over the whole buffer in one shot, there's no
//! streaming state carried between calls.

pub mod filter;
pub mod modulation;
pub mod peaks;
pub mod spectrogram;

pub use modulation::{Modulation, ModulationEstimate, ModulationThresholds};
pub use peaks::{PeakDetector, PeakRecord, PeakSpacing};
pub use spectrogram::Spectrogram;

use rustfft::FftPlanner;

use crate::{
    complex::{narrow, widen, Iq64},
    error::Result,
    Iq, LOG_EPSILON,
};

/// Power in dB of an FFT magnitude, the way the peak search and spectrum trace see it
pub(crate) fn magnitude_db(x: Iq64) -> f64 {
    20.0 * (x.norm() + LOG_EPSILON).log10()
}

/// Forward FFT of the whole buffer (unnormalized), in place
pub(crate) fn fft(mut buf: Vec<Iq64>) -> Vec<Iq64> {
    if !buf.is_empty() {
        FftPlanner::new().plan_fft_forward(buf.len()).process(&mut buf);
    }
    buf
}

/// Inverse FFT, normalized by 1/N so `ifft(fft(x)) == x`
pub(crate) fn ifft(mut buf: Vec<Iq64>) -> Vec<Iq64> {
    if !buf.is_empty() {
        FftPlanner::new().plan_fft_inverse(buf.len()).process(&mut buf);
        let scale = 1.0 / buf.len() as f64;
        buf.iter_mut().for_each(|x| *x *= scale);
    }
    buf
}

/// One-sided power spectrum with absolute frequencies, for the spectrum plot
#[derive(Debug, Clone)]
pub struct SpectrumTrace {
    /// Absolute frequency of each bin in Hz
    pub frequencies: Vec<f64>,
    /// `20*log10(|X|)` of each bin
    pub power_db: Vec<f64>,
}

pub struct SpectralAnalyzer {
    sample_rate: f64,
    thresholds: ModulationThresholds,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            thresholds: ModulationThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: ModulationThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Received signal strength in dBm (approximate, uncalibrated).
    ///
    /// An all-zero or empty buffer has no power and yields `-inf`, which callers treat as
    /// "no signal".
    pub fn rssi(&self, samples: &[Iq]) -> f64 {
        if samples.is_empty() {
            return f64::NEG_INFINITY;
        }
        let power = samples.iter().map(|s| s.norm_sqr() as f64).sum::<f64>() / samples.len() as f64;
        10.0 * power.log10() - 30.0
    }

    /// Find the spectral peaks in the non-negative half of the buffer's FFT.
    ///
    /// Results are strongest first, with equal powers ordered by ascending frequency offset.
    pub fn detect_peaks(&self, samples: &[Iq], detector: &PeakDetector) -> Vec<PeakRecord> {
        let n = samples.len();
        if n == 0 {
            return Vec::new();
        }
        let power_db: Vec<f64> = fft(widen(samples))[..n / 2]
            .iter()
            .map(|&x| magnitude_db(x))
            .collect();
        detector.find(&power_db, self.sample_rate / n as f64)
    }

    /// Zero-phase 4th order Butterworth band-pass between `low_hz` and `high_hz`
    pub fn bandpass(&self, samples: &[Iq], low_hz: f64, high_hz: f64) -> Result<Vec<Iq>> {
        let filter = filter::Bandpass::butterworth(4, low_hz, high_hz, self.sample_rate)?;
        Ok(narrow(&filter.filtfilt(&widen(samples))))
    }

    /// Best-effort guess at the modulation, see [`modulation`]
    pub fn modulation_estimate(&self, samples: &[Iq]) -> ModulationEstimate {
        modulation::estimate(&widen(samples), self.sample_rate, &self.thresholds)
    }

    /// Short-time power spectrum, `overlap` samples shared between neighboring windows
    pub fn spectrogram(
        &self,
        samples: &[Iq],
        window_size: usize,
        overlap: usize,
    ) -> Result<Spectrogram> {
        Spectrogram::compute(&widen(samples), self.sample_rate, window_size, overlap)
    }

    /// Default-sized spectrogram, averaged down to at most `max_rows` time rows
    pub fn waterfall(&self, samples: &[Iq], max_rows: usize) -> Result<Spectrogram> {
        Spectrogram::compute_limited(
            &widen(samples),
            self.sample_rate,
            spectrogram::DEFAULT_WINDOW,
            spectrogram::DEFAULT_OVERLAP,
            max_rows,
        )
    }

    /// Non-negative half of the spectrum, with frequencies shifted up to `center_frequency`
    pub fn spectrum(&self, samples: &[Iq], center_frequency: f64) -> SpectrumTrace {
        let n = samples.len();
        let bins = fft(widen(samples));
        let bin_width = if n == 0 { 0.0 } else { self.sample_rate / n as f64 };
        SpectrumTrace {
            frequencies: (0..n / 2)
                .map(|k| center_frequency + k as f64 * bin_width)
                .collect(),
            power_db: bins[..n / 2].iter().map(|&x| magnitude_db(x)).collect(),
        }
    }
}
