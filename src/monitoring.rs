//! In this module, we set up where the logs go and what a session announces about itself.
//! Everything goes to stderr and to a timestamped plain-text file under the log directory,
//! so a capture run can be audited after the fact.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Local;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

use crate::capture::CaptureConfig;

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!(
        "iq_slurper_{}.log",
        Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// Install the global subscriber. Returns the path of the log file.
pub fn init_logging(level: LevelFilter, log_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let path = log_file_path(log_dir);
    let file = File::create(&path)?;

    let stderr_layer = fmt::layer().with_writer(io::stderr).with_target(false);
    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(level)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    info!("Logging initialized. Log file: {}", path.display());
    Ok(path)
}

/// Session parameters, logged once before the radio is opened
pub fn log_capture_session(config: &CaptureConfig) {
    info!("CAPTURE SESSION STARTED");
    info!("{}", "-".repeat(30));
    info!("Frequency: {:.3} MHz", config.center_frequency / 1e6);
    info!("Gain: {} dB", config.gain);
    info!("Sample Rate: {} Hz", config.sample_rate);
    info!("Duration: {} seconds", config.duration);
    info!("Output File: {}", config.output_path.display());
    info!("Output Format: {}", config.output_format);
    info!("Filter Range: {} kHz", config.filter_bandwidth / 1e3);
    if let Some(band) = config.passband {
        info!("Passband: {}", band);
    }
    info!("Analysis Enabled: {}", config.analyze);
    info!("Plotting Enabled: {}", config.plot);
    info!("Device Index: {}", config.device_index);
    info!("{}", "-".repeat(30));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        let path = log_file_path(Path::new("logs"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("iq_slurper_"));
        assert!(name.ends_with(".log"));
        // iq_slurper_YYYYmmdd_HHMMSS.log
        assert_eq!(name.len(), "iq_slurper_".len() + 15 + ".log".len());
        assert_eq!(path.parent(), Some(Path::new("logs")));
    }
}
