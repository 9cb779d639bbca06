//! This module contains all the capture logic
//!
//! A session is one bounded acquisition: open the radio, configure it, pull a single buffer
//! of `duration * sample_rate` samples, let go of the radio, then analyze and persist what
//! came back. Nothing is streamed and nothing outlives the session except the files it writes.

use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::{debug, error, info, warn};

use crate::{
    analysis::{
        filter::validate_band, ModulationThresholds, PeakDetector, PeakRecord, SpectralAnalyzer,
        Spectrogram, SpectrumTrace,
    },
    codec::OutputFormat,
    device::{DeviceGuard, SdrDevice, SdrDriver},
    error::{CaptureError, DeviceError, Result},
    exfil,
    report::CaptureReport,
    Iq, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ,
};

/// Peaks we call out in the log, the report gets all of them
const LOGGED_PEAKS: usize = 5;
/// Most time rows in the waterfall artifact
const WATERFALL_ROWS: usize = 1024;

/// Shared flag that asks a running session to stop at its next safe point
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Analyzing,
    Persisting,
    Completed,
    Failed,
}

/// Band of interest for the band-pass pass of the analysis, in baseband Hz
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Passband {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl fmt::Display for Passband {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} Hz", self.low_hz, self.high_hz)
    }
}

impl FromStr for Passband {
    type Err = CaptureError;

    /// `LOW:HIGH` in Hz
    fn from_str(s: &str) -> Result<Self> {
        let bad = || CaptureError::InvalidRange(format!("passband `{s}` is not LOW:HIGH in Hz"));
        let (low, high) = s.split_once(':').ok_or_else(bad)?;
        let low_hz = low.trim().parse().map_err(|_| bad())?;
        let high_hz = high.trim().parse().map_err(|_| bad())?;
        Ok(Self { low_hz, high_hz })
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device_index: u32,
    /// Hz
    pub sample_rate: u32,
    /// Hz
    pub center_frequency: f64,
    /// dB
    pub gain: f64,
    /// Seconds
    pub duration: f64,
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
    /// Hz, informational
    pub filter_bandwidth: f64,
    pub passband: Option<Passband>,
    pub analyze: bool,
    pub plot: bool,
    pub thresholds: ModulationThresholds,
    pub peaks: PeakDetector,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            sample_rate: 2_048_000,
            center_frequency: 100e6,
            gain: 40.0,
            duration: 30.0,
            output_path: PathBuf::from("iq_capture.wav"),
            output_format: OutputFormat::Wav,
            filter_bandwidth: 50_000.0,
            passband: None,
            analyze: false,
            plot: false,
            thresholds: ModulationThresholds::default(),
            peaks: PeakDetector::default(),
        }
    }
}

fn check_frequency(hz: f64) -> Result<()> {
    if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&hz) {
        return Err(CaptureError::InvalidRange(format!(
            "frequency {:.3} MHz is outside {}-{} MHz",
            hz / 1e6,
            MIN_FREQUENCY_HZ / 1e6,
            MAX_FREQUENCY_HZ / 1e6
        )));
    }
    Ok(())
}

impl CaptureConfig {
    /// Everything that can be checked without touching hardware
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CaptureError::InvalidRange("sample rate must be positive".into()));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(CaptureError::InvalidRange(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        if !(self.filter_bandwidth.is_finite() && self.filter_bandwidth >= 0.0) {
            return Err(CaptureError::InvalidRange(format!(
                "filter bandwidth must be non-negative, got {}",
                self.filter_bandwidth
            )));
        }
        if !self.gain.is_finite() {
            return Err(CaptureError::InvalidRange(format!("gain {} dB", self.gain)));
        }
        check_frequency(self.center_frequency)?;
        if let Some(band) = self.passband {
            validate_band(band.low_hz, band.high_hz, self.sample_rate as f64)?;
        }
        if self.num_samples() == 0 {
            return Err(CaptureError::InvalidRange(format!(
                "{} s at {} Hz is less than one sample",
                self.duration, self.sample_rate
            )));
        }
        Ok(())
    }

    /// Samples to request from the radio. Rounded down so we never ask for more than
    /// `duration` worth, except that a product within float error of a whole count is taken
    /// as that count.
    pub fn num_samples(&self) -> usize {
        let exact = self.duration * self.sample_rate as f64;
        let nearest = exact.round();
        if (exact - nearest).abs() < 1e-6 {
            nearest as usize
        } else {
            exact.floor() as usize
        }
    }

    pub fn report_path(&self) -> PathBuf {
        exfil::report_path(&self.output_path)
    }

    /// Move the next session to a new center frequency
    pub fn retune(&mut self, hz: f64) -> Result<()> {
        check_frequency(hz)?;
        self.center_frequency = hz;
        info!("Frequency changed to {:.3} MHz", hz / 1e6);
        Ok(())
    }

    pub fn set_gain(&mut self, db: f64) {
        self.gain = db;
        info!("Gain changed to {} dB", db);
    }
}

/// Data products that only get written once the samples are safely on disk
struct PlotArtifacts {
    spectrum: SpectrumTrace,
    waterfall: Spectrogram,
}

pub struct CaptureController<D: SdrDriver> {
    driver: D,
    cancel: CancelToken,
    state: SessionState,
}

impl<D: SdrDriver> CaptureController<D> {
    pub fn new(driver: D, cancel: CancelToken) -> Self {
        Self {
            driver,
            cancel,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(CaptureError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run one capture session start to finish. The radio is closed exactly once whatever
    /// happens, and a cancelled session leaves no files behind.
    pub fn run_session(&mut self, config: &CaptureConfig) -> Result<CaptureReport> {
        self.state = SessionState::Idle;
        match self.session(config) {
            Ok(report) => {
                self.transition(SessionState::Completed);
                info!("Capture session completed");
                Ok(report)
            }
            Err(e) if e.is_cancelled() => {
                self.transition(SessionState::Failed);
                warn!("Capture cancelled, nothing written");
                Err(CaptureError::Cancelled)
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                error!("Capture session failed: {}", e);
                Err(e)
            }
        }
    }

    fn session(&mut self, config: &CaptureConfig) -> Result<CaptureReport> {
        config.validate()?;
        let num_samples = config.num_samples();
        self.checkpoint()?;

        self.transition(SessionState::Capturing);
        info!(
            "Starting signal capture on {:.3} MHz for {} seconds",
            config.center_frequency / 1e6,
            config.duration
        );
        let samples = self.acquire(config, num_samples)?;
        self.checkpoint()?;

        let mut report = CaptureReport::new(config);
        let artifacts = if config.analyze || config.plot {
            self.transition(SessionState::Analyzing);
            analyze(config, &samples, &mut report)?
        } else {
            None
        };
        self.checkpoint()?;

        self.transition(SessionState::Persisting);
        exfil::write_samples(
            &config.output_path,
            &samples,
            config.output_format,
            config.sample_rate,
        )?;
        if let Some(artifacts) = artifacts {
            exfil::write_spectrum_csv(
                &exfil::spectrum_path(&config.output_path),
                &artifacts.spectrum,
                exfil::SPECTRUM_POINTS,
            )?;
            exfil::write_waterfall_png(
                &exfil::waterfall_path(&config.output_path),
                &artifacts.waterfall,
            )?;
        }
        exfil::write_report(&config.report_path(), &report)?;
        Ok(report)
    }

    /// Open, configure, read, close
    fn acquire(&mut self, config: &CaptureConfig, num_samples: usize) -> Result<Vec<Iq>> {
        let mut guard = DeviceGuard::new(self.driver.open(config.device_index)?);
        let device = guard.device();
        info!("Opened {}", device.name());
        device.set_sample_rate(config.sample_rate)?;
        device.set_center_frequency(config.center_frequency)?;
        device.set_gain(config.gain)?;
        info!("  Sample Rate: {:.3} MHz", device.sample_rate() as f64 / 1e6);
        info!("  Center Frequency: {:.3} MHz", device.center_frequency() / 1e6);
        info!("  Gain: {} dB", device.gain());

        debug!("Requesting {} samples", num_samples);
        let samples = device.read_samples(num_samples)?;
        guard.close();
        if samples.len() != num_samples {
            return Err(DeviceError::ReadFailed(format!(
                "short read, got {} of {} samples",
                samples.len(),
                num_samples
            ))
            .into());
        }
        info!("Captured {} samples", samples.len());
        Ok(samples)
    }
}

fn peak_line(index: usize, peak: &PeakRecord, center_frequency: f64) -> String {
    format!(
        "Peak {}: {:.6} MHz, {:.2} dB",
        index + 1,
        (center_frequency + peak.frequency_offset_hz) / 1e6,
        peak.power_db
    )
}

fn analyze(
    config: &CaptureConfig,
    samples: &[Iq],
    report: &mut CaptureReport,
) -> Result<Option<PlotArtifacts>> {
    let analyzer =
        SpectralAnalyzer::new(config.sample_rate as f64).with_thresholds(config.thresholds);

    if config.analyze {
        let rssi = analyzer.rssi(samples);
        info!("RSSI: {:.2} dBm", rssi);
        report.push(format!("RSSI: {rssi:.2} dBm"));

        let peaks = analyzer.detect_peaks(samples, &config.peaks);
        info!("Detected {} peaks", peaks.len());
        report.push(format!("Detected Peaks: {}", peaks.len()));
        for (i, peak) in peaks.iter().enumerate() {
            let line = peak_line(i, peak, config.center_frequency);
            if i < LOGGED_PEAKS {
                info!("  {}", line);
            }
            report.push(format!("  {line}"));
        }

        let estimate = analyzer.modulation_estimate(samples);
        info!(
            "Modulation: {} (amplitude std {:.4}, frequency std {:.1} Hz)",
            estimate.modulation, estimate.amplitude_std, estimate.frequency_std
        );
        report.push(format!("Modulation: {}", estimate.modulation));
        report.push(format!("  Amplitude Std: {:.4}", estimate.amplitude_std));
        report.push(format!("  Frequency Std: {:.1} Hz", estimate.frequency_std));
        report.push(format!("  Mean Amplitude: {:.4}", estimate.mean_amplitude));

        if let Some(band) = config.passband {
            let filtered = analyzer.bandpass(samples, band.low_hz, band.high_hz)?;
            let peaks = analyzer.detect_peaks(&filtered, &config.peaks);
            info!("Passband {}: {} peaks", band, peaks.len());
            report.push(format!("Passband {}: {} peaks", band, peaks.len()));
            for (i, peak) in peaks.iter().enumerate() {
                report.push(format!("  {}", peak_line(i, peak, config.center_frequency)));
            }
        }
    }

    if !config.plot {
        return Ok(None);
    }
    Ok(Some(PlotArtifacts {
        spectrum: analyzer.spectrum(samples, config.center_frequency),
        waterfall: analyzer.waterfall(samples, WATERFALL_ROWS)?,
    }))
}
