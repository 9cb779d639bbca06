pub mod analysis;
pub mod args;
pub mod capture;
pub mod codec;
pub mod complex;
pub mod device;
pub mod error;
pub mod exfil;
pub mod monitoring;
pub mod report;
pub mod rtlsdr;

pub use complex::Iq;
pub use error::{CaptureError, DeviceError};

/// Lowest center frequency we'll tune to (Hz)
pub const MIN_FREQUENCY_HZ: f64 = 30e6;
/// Highest center frequency we'll tune to (Hz)
pub const MAX_FREQUENCY_HZ: f64 = 3000e6;
/// Full-scale value for 16-bit PCM, inputs are assumed normalized to [-1, 1]
pub const PCM_FULL_SCALE: f32 = 32767.0;
/// Floor added before taking logs so empty bins don't produce -inf
pub const LOG_EPSILON: f64 = 1e-12;
