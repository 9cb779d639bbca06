//! Butterworth band-pass, applied forward and backward for zero phase.
//!
//! The analog low-pass prototype is moved to the band with the usual low-pass to band-pass
//! substitution (every prototype pole becomes two), mapped to z with a pre-warped bilinear
//! transform, and realized as a cascade of biquads in Direct Form II Transposed. An order `N`
//! design has `2N` poles, `N` zeros at DC and `N` at Nyquist, so each biquad gets the
//! numerator `1 - z^-2`.

use std::f64::consts::PI;

use crate::{
    complex::Iq64,
    error::{CaptureError, Result},
};

/// One second-order section, `H(z) = (b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2)`
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
}

impl Biquad {
    pub fn new(b: [f64; 3], a: [f64; 2]) -> Self {
        Self { b, a }
    }

    fn response(&self, omega: f64) -> Iq64 {
        let z1 = Iq64::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = self.b[0] + z1 * self.b[1] + z2 * self.b[2];
        let den = 1.0 + z1 * self.a[0] + z2 * self.a[1];
        num / den
    }

    /// Filter `x` in place starting from `state`
    fn run(&self, x: &mut [Iq64], mut state: [Iq64; 2]) {
        for v in x.iter_mut() {
            let input = *v;
            let output = self.b[0] * input + state[0];
            state[0] = self.b[1] * input - self.a[0] * output + state[1];
            state[1] = self.b[2] * input - self.a[1] * output;
            *v = output;
        }
    }

    /// Internal state after a long run of constant input `x` for a section with no DC gain
    fn settled_state(&self, x: Iq64) -> [Iq64; 2] {
        [-self.b[0] * x, self.b[2] * x]
    }
}

#[derive(Debug, Clone)]
pub struct Bandpass {
    sections: Vec<Biquad>,
}

/// Check that `low < high` and both sit strictly inside `(0, nyquist)`
pub fn validate_band(low_hz: f64, high_hz: f64, sample_rate: f64) -> Result<()> {
    let nyquist = sample_rate / 2.0;
    if !(low_hz.is_finite() && high_hz.is_finite()) {
        return Err(CaptureError::InvalidRange(format!(
            "band edges must be finite, got {low_hz} to {high_hz} Hz"
        )));
    }
    if low_hz >= high_hz {
        return Err(CaptureError::InvalidRange(format!(
            "low edge {low_hz} Hz must be below high edge {high_hz} Hz"
        )));
    }
    if low_hz <= 0.0 || high_hz >= nyquist {
        return Err(CaptureError::InvalidRange(format!(
            "band {low_hz} to {high_hz} Hz must lie inside (0, {nyquist}) Hz"
        )));
    }
    Ok(())
}

fn prewarp(freq_hz: f64, sample_rate: f64) -> f64 {
    2.0 * sample_rate * (PI * freq_hz / sample_rate).tan()
}

fn butterworth_poles(order: usize) -> impl Iterator<Item = Iq64> {
    (0..order).map(move |k| {
        let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
        Iq64::from_polar(1.0, theta)
    })
}

impl Bandpass {
    /// Design an `order` Butterworth band-pass (a 2 * `order` pole filter)
    pub fn butterworth(order: usize, low_hz: f64, high_hz: f64, sample_rate: f64) -> Result<Self> {
        validate_band(low_hz, high_hz, sample_rate)?;
        if order == 0 {
            return Err(CaptureError::InvalidRange("filter order must be positive".into()));
        }
        let w1 = prewarp(low_hz, sample_rate);
        let w2 = prewarp(high_hz, sample_rate);
        let bw = w2 - w1;
        let w0 = (w1 * w2).sqrt();
        let fs2 = 2.0 * sample_rate;

        // Band transformation then bilinear transform
        let mut poles: Vec<Iq64> = butterworth_poles(order)
            .flat_map(|p| {
                let p_lp = p * (bw / 2.0);
                let root = (p_lp * p_lp - w0 * w0).sqrt();
                [p_lp + root, p_lp - root]
            })
            .map(|s| (fs2 + s) / (fs2 - s))
            .collect();

        // Upper half plane poles, each paired with its conjugate
        poles.sort_by(|a, b| b.im.total_cmp(&a.im));
        poles.truncate(order);

        // Digital frequency where the analog passband center lands
        let center = 2.0 * (w0 / fs2).atan();
        let sections = poles
            .into_iter()
            .map(|p| {
                let raw = Biquad::new([1.0, 0.0, -1.0], [-2.0 * p.re, p.norm_sqr()]);
                let g = 1.0 / raw.response(center).norm();
                Biquad::new([g, 0.0, -g], raw.a)
            })
            .collect();

        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Magnitude response at `freq_hz`
    pub fn gain_at(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq_hz / sample_rate;
        self.sections
            .iter()
            .map(|s| s.response(omega))
            .fold(Iq64::new(1.0, 0.0), |acc, h| acc * h)
            .norm()
    }

    /// Single causal pass, each section starting settled on the first input sample
    fn pass(&self, x: &mut [Iq64]) {
        let Some(&first) = x.first() else {
            return;
        };
        for (i, section) in self.sections.iter().enumerate() {
            // Only the first section sees a nonzero steady input
            let state = if i == 0 {
                section.settled_state(first)
            } else {
                [Iq64::default(); 2]
            };
            section.run(x, state);
        }
    }

    /// Forward-backward filtering. The ends are padded with an odd reflection of the signal
    /// so the start-up transient lands in the padding. Output length equals input length.
    pub fn filtfilt(&self, x: &[Iq64]) -> Vec<Iq64> {
        let n = x.len();
        if n == 0 {
            return Vec::new();
        }
        let pad = (3 * (2 * self.sections.len() + 1)).min(n - 1);
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * x[0] - x[i]));
        ext.extend_from_slice(x);
        ext.extend((1..=pad).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));

        self.pass(&mut ext);
        ext.reverse();
        self.pass(&mut ext);
        ext.reverse();

        ext[pad..pad + n].to_vec()
    }
}
