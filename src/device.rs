//! Radio front end abstraction.
//!
//! A driver opens devices by index; a device is a stateful capability that owns the hardware
//! until it's closed. The capture controller never reaches for a device on its own, it's
//! handed a driver.

use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::{debug, info, warn};

use crate::{error::DeviceError, Iq};

pub type DeviceResult<T> = Result<T, DeviceError>;

/// An open radio
pub trait SdrDevice {
    fn name(&self) -> &str;

    fn set_sample_rate(&mut self, hz: u32) -> DeviceResult<()>;
    fn sample_rate(&self) -> u32;

    fn set_center_frequency(&mut self, hz: f64) -> DeviceResult<()>;
    fn center_frequency(&self) -> f64;

    fn set_gain(&mut self, db: f64) -> DeviceResult<()>;
    fn gain(&self) -> f64;

    /// Blocking read of exactly `n` samples
    fn read_samples(&mut self, n: usize) -> DeviceResult<Vec<Iq>>;

    /// Release the hardware. Called once per open.
    fn close(&mut self) -> DeviceResult<()>;
}

/// Something that can open radios by index
pub trait SdrDriver {
    type Device: SdrDevice;

    fn open(&mut self, device_index: u32) -> DeviceResult<Self::Device>;
}

/// Owns an open device for the length of a session and guarantees it is closed exactly once,
/// either explicitly through [`DeviceGuard::close`] or when the guard is dropped.
pub struct DeviceGuard<D: SdrDevice> {
    device: D,
    closed: bool,
}

impl<D: SdrDevice> DeviceGuard<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            closed: false,
        }
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    /// Best-effort teardown, failures are logged
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.device.close() {
            Ok(()) => info!("{} closed", self.device.name()),
            Err(e) => warn!("Failed to close {}: {}", self.device.name(), e),
        }
    }
}

impl<D: SdrDevice> Drop for DeviceGuard<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Synthetic radio: a single tone at a fixed offset from the tuned frequency plus complex
/// Gaussian noise. Handy for dry runs without hardware.
pub struct SimulatedDriver {
    pub tone_offset_hz: f64,
    pub amplitude: f64,
    pub noise_sigma: f64,
    pub seed: u64,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self {
            tone_offset_hz: 25_000.0,
            amplitude: 0.5,
            noise_sigma: 0.01,
            seed: 0x5eed,
        }
    }
}

impl SdrDriver for SimulatedDriver {
    type Device = SimulatedDevice;

    fn open(&mut self, device_index: u32) -> DeviceResult<SimulatedDevice> {
        if device_index != 0 {
            return Err(DeviceError::DeviceNotFound(format!(
                "simulated device {device_index}"
            )));
        }
        let noise = Normal::new(0.0, self.noise_sigma)
            .map_err(|e| DeviceError::DeviceNotFound(format!("bad noise level: {e}")))?;
        debug!("Opened simulated device");
        Ok(SimulatedDevice {
            sample_rate: 2_048_000,
            center_frequency: 100e6,
            gain: 0.0,
            tone_offset_hz: self.tone_offset_hz,
            amplitude: self.amplitude,
            noise,
            rng: StdRng::seed_from_u64(self.seed),
            phase: 0.0,
        })
    }
}

pub struct SimulatedDevice {
    sample_rate: u32,
    center_frequency: f64,
    gain: f64,
    tone_offset_hz: f64,
    amplitude: f64,
    noise: Normal<f64>,
    rng: StdRng,
    phase: f64,
}

impl SdrDevice for SimulatedDevice {
    fn name(&self) -> &str {
        "Simulated SDR"
    }

    fn set_sample_rate(&mut self, hz: u32) -> DeviceResult<()> {
        if hz == 0 {
            return Err(DeviceError::Configuration {
                what: "sample rate",
                code: -1,
            });
        }
        self.sample_rate = hz;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn set_center_frequency(&mut self, hz: f64) -> DeviceResult<()> {
        self.center_frequency = hz;
        Ok(())
    }

    fn center_frequency(&self) -> f64 {
        self.center_frequency
    }

    fn set_gain(&mut self, db: f64) -> DeviceResult<()> {
        self.gain = db;
        Ok(())
    }

    fn gain(&self) -> f64 {
        self.gain
    }

    fn read_samples(&mut self, n: usize) -> DeviceResult<Vec<Iq>> {
        let step = 2.0 * std::f64::consts::PI * self.tone_offset_hz / self.sample_rate as f64;
        let mut samples = Vec::with_capacity(n);
        for _ in 0..n {
            let re = self.amplitude * self.phase.cos() + self.noise.sample(&mut self.rng);
            let im = self.amplitude * self.phase.sin() + self.noise.sample(&mut self.rng);
            samples.push(Iq::new(re as f32, im as f32));
            self.phase = (self.phase + step) % (2.0 * std::f64::consts::PI);
        }
        Ok(samples)
    }

    fn close(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc};

    struct Counting {
        closes: Rc<Cell<usize>>,
    }

    impl SdrDevice for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn set_sample_rate(&mut self, _: u32) -> DeviceResult<()> {
            Ok(())
        }
        fn sample_rate(&self) -> u32 {
            1
        }
        fn set_center_frequency(&mut self, _: f64) -> DeviceResult<()> {
            Ok(())
        }
        fn center_frequency(&self) -> f64 {
            0.0
        }
        fn set_gain(&mut self, _: f64) -> DeviceResult<()> {
            Ok(())
        }
        fn gain(&self) -> f64 {
            0.0
        }
        fn read_samples(&mut self, _: usize) -> DeviceResult<Vec<Iq>> {
            Err(DeviceError::ReadFailed("nope".into()))
        }
        fn close(&mut self) -> DeviceResult<()> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_guard_closes_once() {
        let closes = Rc::new(Cell::new(0));
        let guard = DeviceGuard::new(Counting {
            closes: closes.clone(),
        });
        guard.close();
        assert_eq!(closes.get(), 1);

        {
            let mut guard = DeviceGuard::new(Counting {
                closes: closes.clone(),
            });
            assert!(guard.device().read_samples(4).is_err());
        }
        assert_eq!(closes.get(), 2);
    }

    #[test]
    fn test_simulated_device_tone() {
        let mut device = SimulatedDriver {
            noise_sigma: 0.0,
            ..Default::default()
        }
        .open(0)
        .unwrap();
        device.set_sample_rate(100_000).unwrap();
        let samples = device.read_samples(1000).unwrap();
        assert_eq!(samples.len(), 1000);
        assert!(samples.iter().all(|s| (s.norm() - 0.5).abs() < 1e-5));
    }

    #[test]
    fn test_simulated_only_has_one_device() {
        assert!(matches!(
            SimulatedDriver::default().open(1),
            Err(DeviceError::DeviceNotFound(_))
        ));
    }
}
