//! Error types for the capture pipeline

use std::io;

/// Failures coming out of the radio front end
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("librtlsdr not found - install the rtl-sdr package")]
    LibraryNotFound,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device open failed: error code {0}")]
    OpenFailed(i32),

    #[error("Failed to set {what}: error code {code}")]
    Configuration { what: &'static str, code: i32 },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Read interrupted")]
    Interrupted,
}

/// Everything a capture session can fail with
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Capture cancelled")]
    Cancelled,
}

impl CaptureError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            CaptureError::Cancelled | CaptureError::Device(DeviceError::Interrupted)
        )
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
