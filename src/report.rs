//! Plain-text summary of a capture session

use std::fmt;

use chrono::{DateTime, Local};

use crate::{capture::CaptureConfig, codec::OutputFormat};

const TITLE: &str = "IQ CAPTURE ANALYSIS REPORT";

/// Lines are appended while the session runs and the whole thing is written once at the end
#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub generated: DateTime<Local>,
    /// Hz
    pub center_frequency: f64,
    pub sample_rate: u32,
    pub filter_bandwidth: f64,
    pub output_format: OutputFormat,
    lines: Vec<String>,
}

impl CaptureReport {
    /// Empty report whose header describes the session `config` sets up
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            generated: Local::now(),
            center_frequency: config.center_frequency,
            sample_rate: config.sample_rate,
            filter_bandwidth: config.filter_bandwidth,
            output_format: config.output_format,
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CaptureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{TITLE}")?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Generated: {}", self.generated.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Center Frequency: {:.6} MHz", self.center_frequency / 1e6)?;
        writeln!(f, "Sample Rate: {} Hz", self.sample_rate)?;
        writeln!(f, "Filter Bandwidth: {} Hz", self.filter_bandwidth)?;
        writeln!(f, "Output Format: {}", self.output_format)?;
        writeln!(f)?;
        if self.lines.is_empty() {
            return writeln!(f, "No analysis results available.");
        }
        writeln!(f, "ANALYSIS RESULTS:")?;
        writeln!(f, "{}", "-".repeat(20))?;
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
