//! Argument parsing for running from the command line

use std::path::PathBuf;

use chrono::{DateTime, Local};
use clap::Parser;
use clap_verbosity_flag::InfoLevel;

use crate::{
    analysis::PeakDetector,
    capture::{CaptureConfig, Passband},
    codec::OutputFormat,
    exfil, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(after_help = "Examples:
  iq_slurper --freq 446.056 --gain 40 --duration 30 --output signal.wav
  iq_slurper --freq 162.550 --sample-rate 2048000 --duration 60 --format raw
  iq_slurper --freq 144.390 --gain 30 --filter-range 10 --analyze")]
pub struct Args {
    /// Center frequency in MHz (30-3000)
    #[clap(short, long, value_parser = valid_frequency)]
    pub freq: f64,
    /// RF gain in dB
    #[clap(short, long, default_value_t = 40.0)]
    pub gain: f64,
    /// Sample rate in Hz
    #[clap(short, long, default_value_t = 2_048_000)]
    #[clap(value_parser = clap::value_parser!(u32).range(1..))]
    pub sample_rate: u32,
    /// Capture duration in seconds
    #[clap(short, long, default_value_t = 30.0)]
    pub duration: f64,
    /// Output filename (generated from the frequency and time if not given)
    #[clap(short, long)]
    pub output: Option<PathBuf>,
    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Wav)]
    pub format: OutputFormat,
    /// Filter bandwidth in kHz
    #[clap(long, default_value_t = 50.0)]
    pub filter_range: f64,
    /// Band-pass the capture to LOW:HIGH (baseband Hz) and look for peaks there too
    #[clap(long, value_parser = valid_passband)]
    pub passband: Option<Passband>,
    /// Peak detection threshold in dB
    #[clap(long, default_value_t = -60.0, allow_hyphen_values = true)]
    pub peak_threshold: f64,
    /// Minimum spacing between reported peaks in Hz (default is 1000 FFT bins)
    #[clap(long, value_parser = valid_spacing)]
    pub peak_distance_hz: Option<f64>,
    /// Perform signal analysis after the capture
    #[clap(long)]
    pub analyze: bool,
    /// Write spectrum and waterfall data products next to the output
    #[clap(long)]
    pub plot: bool,
    /// Logging level, overrides -v/-q
    #[clap(long, value_enum, ignore_case = true)]
    pub log_level: Option<LogLevel>,
    /// Directory for log files
    #[clap(long, default_value = "logs")]
    pub log_dir: PathBuf,
    /// RTL-SDR device index
    #[clap(long, default_value_t = 0)]
    pub device_index: u32,
    /// Use a synthetic tone-plus-noise radio instead of hardware
    #[clap(long)]
    pub simulate: bool,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<InfoLevel>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warning => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl Args {
    pub fn level_filter(&self) -> tracing_subscriber::filter::LevelFilter {
        match self.log_level {
            Some(level) => level.into(),
            None => convert_filter(self.verbose.log_level_filter()),
        }
    }

    /// Build the session configuration, filling in the output name from `now` if needed
    pub fn into_config(self, now: &DateTime<Local>) -> CaptureConfig {
        let output_path = self
            .output
            .unwrap_or_else(|| exfil::default_output_path(self.freq, self.format, now));
        let mut peaks = PeakDetector::default().with_threshold(self.peak_threshold);
        if let Some(hz) = self.peak_distance_hz {
            peaks = peaks.with_min_distance_hz(hz);
        }
        CaptureConfig {
            device_index: self.device_index,
            sample_rate: self.sample_rate,
            center_frequency: self.freq * 1e6,
            gain: self.gain,
            duration: self.duration,
            output_path,
            output_format: self.format,
            filter_bandwidth: self.filter_range * 1e3,
            passband: self.passband,
            analyze: self.analyze,
            plot: self.plot,
            peaks,
            ..Default::default()
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_frequency(s: &str) -> Result<f64, String> {
    let freq: f64 = s.parse().map_err(|_| format!("`{s}` isn't a frequency in MHz"))?;
    let (lo, hi) = (MIN_FREQUENCY_HZ / 1e6, MAX_FREQUENCY_HZ / 1e6);
    if !(lo..=hi).contains(&freq) {
        return Err(format!(
            "Frequency {freq} MHz is outside valid range ({lo}-{hi} MHz)"
        ));
    }
    Ok(freq)
}

fn valid_spacing(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(hz) if hz.is_finite() && hz > 0.0 => Ok(hz),
        _ => Err(format!("`{s}` isn't a positive spacing in Hz")),
    }
}

fn valid_passband(s: &str) -> Result<Passband, String> {
    s.parse().map_err(|e: crate::CaptureError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PeakSpacing;
    use chrono::TimeZone;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["iq_slurper", "--freq", "446.056"]).unwrap();
        assert_eq!(args.gain, 40.0);
        assert_eq!(args.sample_rate, 2_048_000);
        assert_eq!(args.duration, 30.0);
        assert_eq!(args.format, OutputFormat::Wav);
        assert_eq!(args.peak_distance_hz, None);
        assert_eq!(args.level_filter(), LevelFilter::INFO);

        let now = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let config = args.into_config(&now);
        assert!((config.center_frequency - 446.056e6).abs() < 1e-3);
        assert_eq!(config.filter_bandwidth, 50_000.0);
        assert_eq!(config.peaks.min_distance, PeakSpacing::Bins(1000));
        assert_eq!(
            config.output_path,
            PathBuf::from("iq_capture_446_056MHz_20240102_030405.wav")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frequency_range() {
        assert!(Args::try_parse_from(["iq_slurper", "--freq", "29.9"]).is_err());
        assert!(Args::try_parse_from(["iq_slurper", "--freq", "3000.1"]).is_err());
        assert!(Args::try_parse_from(["iq_slurper", "--freq", "3000"]).is_ok());
        assert!(Args::try_parse_from(["iq_slurper"]).is_err());
    }

    #[test]
    fn test_full_command_line() {
        let args = Args::try_parse_from([
            "iq_slurper",
            "--freq",
            "144.39",
            "--format",
            "raw",
            "--output",
            "aprs.raw",
            "--passband",
            "1000:5000",
            "--peak-threshold",
            "-40",
            "--peak-distance-hz",
            "12500",
            "--analyze",
            "--log-level",
            "WARNING",
        ])
        .unwrap();
        assert_eq!(args.level_filter(), LevelFilter::WARN);
        let config = args.into_config(&Local::now());
        assert_eq!(config.output_format, OutputFormat::Raw);
        assert_eq!(config.output_path, PathBuf::from("aprs.raw"));
        assert_eq!(config.peaks.threshold_db, -40.0);
        assert_eq!(config.peaks.min_distance, PeakSpacing::Hz(12_500.0));
        assert!(config.analyze && !config.plot);
        assert_eq!(
            config.passband,
            Some(Passband {
                low_hz: 1000.0,
                high_hz: 5000.0
            })
        );
    }

    #[test]
    fn test_bad_values() {
        assert!(Args::try_parse_from(["iq_slurper", "--freq", "100", "--format", "mp3"]).is_err());
        assert!(Args::try_parse_from(["iq_slurper", "--freq", "100", "--passband", "5k"]).is_err());
        assert!(Args::try_parse_from([
            "iq_slurper",
            "--freq",
            "100",
            "--peak-distance-hz",
            "0"
        ])
        .is_err());
        assert!(
            Args::try_parse_from(["iq_slurper", "--freq", "100", "--sample-rate", "0"]).is_err()
        );
    }

    #[test]
    fn test_verbosity() {
        let args = Args::try_parse_from(["iq_slurper", "--freq", "100", "-v"]).unwrap();
        assert_eq!(args.level_filter(), LevelFilter::DEBUG);
        let args = Args::try_parse_from(["iq_slurper", "--freq", "100", "-q"]).unwrap();
        assert_eq!(args.level_filter(), LevelFilter::WARN);
    }

    #[test]
    fn test_convert_filter() {
        assert_eq!(convert_filter(log::LevelFilter::Off), LevelFilter::OFF);
        assert_eq!(convert_filter(log::LevelFilter::Trace), LevelFilter::TRACE);
    }
}
