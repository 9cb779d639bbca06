//! Coarse modulation classification.
//!
//! This is a heuristic, not a demodulator. A complex I/Q buffer already is an analytic signal;
//! a buffer with no quadrature part goes through a Hilbert transform first. Either way we get
//! an instantaneous amplitude and frequency, and the spread of each decides the class, checked
//! in a fixed order (amplitude first). The default thresholds of 0.1 (amplitude std) and 1 kHz
//! (frequency std) are rules of thumb, see [`ModulationThresholds`].

use std::{f64::consts::PI, fmt};

use crate::complex::Iq64;

use super::{fft, ifft};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    AmLike,
    FmLike,
    CwUnknown,
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Modulation::AmLike => "Likely AM",
            Modulation::FmLike => "Likely FM",
            Modulation::CwUnknown => "Unknown/CW",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationThresholds {
    /// Amplitude standard deviation above which we call it AM
    pub amplitude_std: f64,
    /// Instantaneous frequency standard deviation (Hz) above which we call it FM
    pub frequency_std_hz: f64,
}

impl Default for ModulationThresholds {
    fn default() -> Self {
        Self {
            amplitude_std: 0.1,
            frequency_std_hz: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationEstimate {
    pub modulation: Modulation,
    pub amplitude_std: f64,
    /// Hz
    pub frequency_std: f64,
    pub mean_amplitude: f64,
}

impl ModulationThresholds {
    pub fn classify(&self, amplitude_std: f64, frequency_std: f64) -> Modulation {
        if amplitude_std > self.amplitude_std {
            Modulation::AmLike
        } else if frequency_std > self.frequency_std_hz {
            Modulation::FmLike
        } else {
            Modulation::CwUnknown
        }
    }
}

/// Analytic signal of a real sequence, built in the frequency domain: keep DC (and Nyquist
/// for even lengths), double the positive frequencies, zero the negative ones.
pub fn analytic_signal(real: &[f64]) -> Vec<Iq64> {
    let n = real.len();
    let mut spectrum = fft(real.iter().map(|&x| Iq64::new(x, 0.0)).collect());
    for (k, bin) in spectrum.iter_mut().enumerate().skip(1) {
        if 2 * k < n {
            *bin *= 2.0;
        } else if 2 * k > n {
            *bin = Iq64::default();
        }
    }
    ifft(spectrum)
}

fn mean_std(x: &[f64]) -> (f64, f64) {
    if x.is_empty() {
        return (0.0, 0.0);
    }
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

pub fn estimate(
    samples: &[Iq64],
    sample_rate: f64,
    thresholds: &ModulationThresholds,
) -> ModulationEstimate {
    let analytic = if samples.iter().any(|s| s.im != 0.0) {
        samples.to_vec()
    } else {
        let in_phase: Vec<f64> = samples.iter().map(|s| s.re).collect();
        analytic_signal(&in_phase)
    };

    let amplitude: Vec<f64> = analytic.iter().map(|a| a.norm()).collect();
    // Phase step between neighbors, already wrapped into (-pi, pi]
    let inst_freq: Vec<f64> = analytic
        .windows(2)
        .map(|w| (w[1] * w[0].conj()).arg() * sample_rate / (2.0 * PI))
        .collect();

    let (mean_amplitude, amplitude_std) = mean_std(&amplitude);
    let (_, frequency_std) = mean_std(&inst_freq);

    ModulationEstimate {
        modulation: thresholds.classify(amplitude_std, frequency_std),
        amplitude_std,
        frequency_std,
        mean_amplitude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 48_000.0;
    const N: usize = 48_000;

    /// Complex baseband signal with amplitude `amp(t)` and phase `phase(t)`
    fn synth(amp: impl Fn(f64) -> f64, phase: impl Fn(f64) -> f64) -> Vec<Iq64> {
        (0..N)
            .map(|i| {
                let t = i as f64 / FS;
                Iq64::from_polar(amp(t), phase(t))
            })
            .collect()
    }

    #[test]
    fn test_cw() {
        let x = synth(|_| 0.5, |t| 2.0 * PI * 1000.0 * t);
        let est = estimate(&x, FS, &ModulationThresholds::default());
        assert_eq!(est.modulation, Modulation::CwUnknown);
        assert!((est.mean_amplitude - 0.5).abs() < 1e-3);
        assert!(est.frequency_std < 1.0);
    }

    #[test]
    fn test_am() {
        let x = synth(
            |t| 0.5 * (1.0 + 0.5 * (2.0 * PI * 50.0 * t).cos()),
            |t| 2.0 * PI * 1000.0 * t,
        );
        let est = estimate(&x, FS, &ModulationThresholds::default());
        assert_eq!(est.modulation, Modulation::AmLike);
        assert!((est.amplitude_std - 0.25 / 2f64.sqrt()).abs() < 0.01);
    }

    #[test]
    fn test_fm() {
        // 3 kHz deviation at a 100 Hz rate around 10 kHz
        let x = synth(
            |_| 0.5,
            |t| 2.0 * PI * 10_000.0 * t + 30.0 * (2.0 * PI * 100.0 * t).sin(),
        );
        let est = estimate(&x, FS, &ModulationThresholds::default());
        assert_eq!(est.modulation, Modulation::FmLike);
        assert!((est.frequency_std - 3000.0 / 2f64.sqrt()).abs() < 50.0);
    }

    #[test]
    fn test_fm_on_carrier() {
        // Same deviation with the radio tuned onto the carrier, so the phase swings through DC
        let x = synth(|_| 0.5, |t| 30.0 * (2.0 * PI * 100.0 * t).sin());
        let est = estimate(&x, FS, &ModulationThresholds::default());
        assert_eq!(est.modulation, Modulation::FmLike);
        assert!(est.amplitude_std < 1e-9, "{est:?}");
        assert!((est.frequency_std - 3000.0 / 2f64.sqrt()).abs() < 50.0, "{est:?}");
    }

    #[test]
    fn test_real_buffer_uses_hilbert() {
        let x: Vec<Iq64> = (0..N)
            .map(|i| Iq64::new(0.5 * (2.0 * PI * 1000.0 * i as f64 / FS).cos(), 0.0))
            .collect();
        let est = estimate(&x, FS, &ModulationThresholds::default());
        assert_eq!(est.modulation, Modulation::CwUnknown);
        assert!((est.mean_amplitude - 0.5).abs() < 1e-6, "{est:?}");
    }

    #[test]
    fn test_amplitude_checked_before_frequency() {
        let t = ModulationThresholds::default();
        assert_eq!(t.classify(0.2, 5000.0), Modulation::AmLike);
        assert_eq!(t.classify(0.05, 5000.0), Modulation::FmLike);
        assert_eq!(t.classify(0.05, 10.0), Modulation::CwUnknown);
        let loose = ModulationThresholds {
            amplitude_std: 1.0,
            frequency_std_hz: 10_000.0,
        };
        assert_eq!(loose.classify(0.2, 5000.0), Modulation::CwUnknown);
    }

    #[test]
    fn test_short_buffers() {
        let est = estimate(&[], FS, &ModulationThresholds::default());
        assert_eq!(est.modulation, Modulation::CwUnknown);
        let est = estimate(&[Iq64::new(1.0, 0.0)], FS, &ModulationThresholds::default());
        assert_eq!(est.frequency_std, 0.0);
    }
}
