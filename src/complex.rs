use num_complex::Complex;

/// A single I/Q sample as it comes off the radio (complex64)
pub type Iq = Complex<f32>;

/// Working precision for all the DSP
pub type Iq64 = Complex<f64>;

/// Widen a buffer of captured samples to the DSP working precision
pub fn widen(samples: &[Iq]) -> Vec<Iq64> {
    samples
        .iter()
        .map(|s| Iq64::new(s.re as f64, s.im as f64))
        .collect()
}

/// Narrow DSP output back to capture precision
pub fn narrow(samples: &[Iq64]) -> Vec<Iq> {
    samples
        .iter()
        .map(|s| Iq::new(s.re as f32, s.im as f32))
        .collect()
}
