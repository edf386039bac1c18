//! Error types for psuctl

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Image {} rejected: {reason}", .path.display())]
    ImageRejected { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CliError {
    /// Classify a firmware error raised while checking `path`.
    pub fn from_firmware(path: &std::path::Path, error: psu_firmware_update::FirmwareUpdateError) -> Self {
        use psu_firmware_update::FirmwareUpdateError;
        match error {
            FirmwareUpdateError::Io { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Self::FileNotFound(path.to_path_buf())
            }
            FirmwareUpdateError::Io { source, .. } => Self::IoError(source),
            other => Self::ImageRejected {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        }
    }

    /// Classify a monitor configuration error raised while reading `path`.
    pub fn from_monitor(path: &std::path::Path, error: psu_monitor::MonitorError) -> Self {
        use psu_monitor::MonitorError;
        match error {
            MonitorError::ConfigIo { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Self::FileNotFound(path.to_path_buf())
            }
            MonitorError::ConfigIo { source, .. } => Self::IoError(source),
            other => Self::InvalidConfiguration(other.to_string()),
        }
    }
}
