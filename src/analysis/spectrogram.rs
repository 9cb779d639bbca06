//! Time-frequency power matrix (waterfall)

use std::f64::consts::PI;

use rustfft::FftPlanner;
use tracing::warn;

use crate::{
    complex::Iq64,
    error::{CaptureError, Result},
    LOG_EPSILON,
};

pub const DEFAULT_WINDOW: usize = 1024;
pub const DEFAULT_OVERLAP: usize = 512;
const TUKEY_ALPHA: f64 = 0.25;

#[derive(Debug, Clone, Default)]
pub struct Spectrogram {
    /// Center time of each segment in seconds
    pub times: Vec<f64>,
    /// Frequency of each bin in Hz, in FFT order (DC first, negative frequencies in the upper half)
    pub frequencies: Vec<f64>,
    /// Power spectral density in dB, indexed `[segment][bin]`
    pub power_db: Vec<Vec<f64>>,
}

/// Periodic Tukey window with taper fraction `alpha`
pub fn tukey(len: usize, alpha: f64) -> Vec<f64> {
    // Periodic form: design len + 1 points symmetric and drop the last
    let m = len + 1;
    if len <= 1 {
        return vec![1.0; len];
    }
    let width = (alpha * (m - 1) as f64 / 2.0).floor() as usize;
    (0..len)
        .map(|i| {
            let i = i.min(m - 1 - i);
            if i < width {
                0.5 * (1.0 + (PI * (-1.0 + 2.0 * i as f64 / (alpha * (m - 1) as f64))).cos())
            } else {
                1.0
            }
        })
        .collect()
}

/// Bin frequencies for an `n` point FFT, same ordering as the FFT output
pub fn fft_frequencies(n: usize, sample_rate: f64) -> Vec<f64> {
    (0..n)
        .map(|k| {
            let k = if 2 * k < n { k as f64 } else { k as f64 - n as f64 };
            k * sample_rate / n as f64
        })
        .collect()
}

impl Spectrogram {
    pub fn compute(
        samples: &[Iq64],
        sample_rate: f64,
        window_size: usize,
        overlap: usize,
    ) -> Result<Self> {
        Self::compute_limited(samples, sample_rate, window_size, overlap, usize::MAX)
    }

    /// Same as [`Spectrogram::compute`], but neighboring segments are averaged (in linear
    /// power) so the result has at most `max_rows` rows. Keeps long captures plottable.
    pub fn compute_limited(
        samples: &[Iq64],
        sample_rate: f64,
        window_size: usize,
        overlap: usize,
        max_rows: usize,
    ) -> Result<Self> {
        if window_size == 0 || overlap >= window_size {
            return Err(CaptureError::InvalidRange(format!(
                "spectrogram overlap {overlap} must be smaller than the window size {window_size}"
            )));
        }
        if samples.is_empty() || max_rows == 0 {
            return Ok(Self::default());
        }
        let (nperseg, noverlap) = if samples.len() < window_size {
            warn!(
                "Buffer of {} samples is shorter than the {} sample window, shrinking the window",
                samples.len(),
                window_size
            );
            (samples.len(), samples.len() / 2)
        } else {
            (window_size, overlap)
        };
        let step = nperseg - noverlap;
        let segments = (samples.len() - nperseg) / step + 1;
        let group = (segments - 1) / max_rows + 1;
        let rows = (segments - 1) / group + 1;

        let window = tukey(nperseg, TUKEY_ALPHA);
        let scale = 1.0 / (sample_rate * window.iter().map(|w| w * w).sum::<f64>());
        let fft = FftPlanner::new().plan_fft_forward(nperseg);

        let mut buf = vec![Iq64::default(); nperseg];
        let mut power_db = Vec::with_capacity(rows);
        let mut times = Vec::with_capacity(rows);
        for row in 0..rows {
            let first = row * group;
            let last = (first + group).min(segments);
            let mut acc = vec![0f64; nperseg];
            for seg in first..last {
                let chunk = &samples[seg * step..seg * step + nperseg];
                let mean = chunk.iter().sum::<Iq64>() / nperseg as f64;
                for ((b, &x), &w) in buf.iter_mut().zip(chunk).zip(&window) {
                    *b = (x - mean) * w;
                }
                fft.process(&mut buf);
                for (a, x) in acc.iter_mut().zip(&buf) {
                    *a += x.norm_sqr() * scale;
                }
            }
            let count = (last - first) as f64;
            power_db.push(
                acc.iter()
                    .map(|p| 10.0 * (p / count + LOG_EPSILON).log10())
                    .collect(),
            );
            let center = |seg: usize| (nperseg as f64 / 2.0 + (seg * step) as f64) / sample_rate;
            times.push((center(first) + center(last - 1)) / 2.0);
        }

        Ok(Self {
            times,
            frequencies: fft_frequencies(nperseg, sample_rate),
            power_db,
        })
    }

    pub fn num_segments(&self) -> usize {
        self.power_db.len()
    }

    pub fn num_bins(&self) -> usize {
        self.frequencies.len()
    }

    /// Smallest and largest finite power in the matrix
    pub fn power_range(&self) -> Option<(f64, f64)> {
        self.power_db
            .iter()
            .flatten()
            .copied()
            .filter(|p| p.is_finite())
            .fold(None, |acc, p| match acc {
                None => Some((p, p)),
                Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::tests::tone, complex::widen};

    #[test]
    fn test_shape() {
        let fs = 1_024_000.0;
        let x = widen(&tone(10_240, 64_000.0, fs, 0.5));
        let s = Spectrogram::compute(&x, fs, DEFAULT_WINDOW, DEFAULT_OVERLAP).unwrap();
        // (10240 - 1024) / 512 + 1
        assert_eq!(s.num_segments(), 19);
        assert_eq!(s.num_bins(), 1024);
        assert_eq!(s.times.len(), 19);
        assert!((s.times[0] - 512.0 / fs).abs() < 1e-12);
        assert!((s.times[1] - s.times[0] - 512.0 / fs).abs() < 1e-12);
    }

    #[test]
    fn test_tone_lands_in_its_bin() {
        let fs = 1_024_000.0;
        // 1 kHz bins, tone in bin 64
        let x = widen(&tone(4096, 64_000.0, fs, 0.5));
        let s = Spectrogram::compute(&x, fs, DEFAULT_WINDOW, DEFAULT_OVERLAP).unwrap();
        for row in &s.power_db {
            let loudest = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap();
            assert_eq!(loudest, 64);
            assert_eq!(s.frequencies[loudest], 64_000.0);
        }
    }

    #[test]
    fn test_short_buffer_shrinks_window() {
        let x = widen(&tone(100, 1_000.0, 8_000.0, 0.5));
        let s = Spectrogram::compute(&x, 8_000.0, DEFAULT_WINDOW, DEFAULT_OVERLAP).unwrap();
        assert_eq!(s.num_segments(), 1);
        assert_eq!(s.num_bins(), 100);
    }

    #[test]
    fn test_limited_rows_average_segments() {
        let fs = 1_024_000.0;
        let x = widen(&tone(10_240, 64_000.0, fs, 0.5));
        let full = Spectrogram::compute(&x, fs, DEFAULT_WINDOW, DEFAULT_OVERLAP).unwrap();
        let limited =
            Spectrogram::compute_limited(&x, fs, DEFAULT_WINDOW, DEFAULT_OVERLAP, 5).unwrap();
        // 19 segments in groups of 4
        assert_eq!(limited.num_segments(), 5);
        assert!((limited.power_db[0][64] - full.power_db[0][64]).abs() < 0.1);
        assert!(limited.times.windows(2).all(|t| t[1] > t[0]));
    }

    #[test]
    fn test_bad_overlap() {
        assert!(matches!(
            Spectrogram::compute(&[Iq64::default(); 10], 1.0, 4, 4),
            Err(CaptureError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_tukey_window() {
        let w = tukey(16, 0.25);
        assert_eq!(w.len(), 16);
        assert_eq!(w[0], 0.0);
        assert!(w[4..13].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_fft_frequencies() {
        assert_eq!(fft_frequencies(4, 8.0), vec![0.0, 2.0, -4.0, -2.0]);
    }
}
