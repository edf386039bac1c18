//! Error types for firmware update operations.

use psu_device::{FwUpdateStage, PsuError};
use psu_pmbus::{CompletionCode, FirmwareDeviceStatus, PmBusCommand};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a firmware update run.
#[derive(Debug, Error)]
pub enum FirmwareUpdateError {
    /// The image file could not be read.
    #[error("Failed to read firmware image {}: {source}", .path.display())]
    Io {
        /// Image path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A line of the image is malformed.
    #[error("Corrupt firmware image at line {line}: {reason}")]
    CorruptImage {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// No record sits at the target's model id address.
    #[error("Model id record at {address:#010x} not found")]
    ModelIdMissing {
        /// Address searched for.
        address: u32,
    },

    /// The record at the model id address is not an 8-byte info record.
    #[error("Record at line {line} holds no model id")]
    ModelIdMalformed {
        /// 1-based line number.
        line: usize,
    },

    /// The image does not reach the write end address on the final ROM page.
    #[error("Image never reaches {end:#06x} on ROM page {final_page}")]
    IncompleteImage {
        /// Write end address.
        end: u16,
        /// Final ROM page.
        final_page: u8,
    },

    /// A bus transaction failed.
    #[error("{stage} failed: {source}")]
    Device {
        /// Stage being attempted.
        stage: FwUpdateStage,
        /// Device error.
        #[source]
        source: PsuError,
    },

    /// A bus transaction for an image line failed.
    #[error("{stage} failed at image line {line}: {source}")]
    LineFailed {
        /// Stage being attempted.
        stage: FwUpdateStage,
        /// 1-based image line.
        line: usize,
        /// Device error.
        #[source]
        source: PsuError,
    },

    /// The bootloader reported an unexpected status.
    #[error("{stage}: status after {after} was {actual:?}, expected {expected:?}")]
    UnexpectedStatus {
        /// Stage being attempted.
        stage: FwUpdateStage,
        /// Command whose outcome was polled.
        after: PmBusCommand,
        /// 1-based image line, when the command wrote one.
        line: Option<usize>,
        /// Required status.
        expected: FirmwareDeviceStatus,
        /// Reported status.
        actual: FirmwareDeviceStatus,
    },

    /// Read-back data differs from the image.
    #[error(
        "Verify mismatch at line {line}, ROM page {page}, address {address:#06x}: expected {expected}, read {actual}"
    )]
    VerifyMismatch {
        /// 1-based image line.
        line: usize,
        /// ROM page.
        page: u8,
        /// Page-relative address.
        address: u16,
        /// Expected bytes, hex.
        expected: String,
        /// Bytes read, hex.
        actual: String,
    },

    /// The PSU already has an update running.
    #[error("Firmware update already in progress for PSU {0}")]
    UpdateInProgress(u8),

    /// No PSU with this id.
    #[error("Unknown PSU {0}")]
    UnknownPsu(u8),

    /// The worker thread could not be started.
    #[error("Failed to spawn firmware update worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker thread panicked.
    #[error("Firmware update worker for PSU {0} panicked")]
    WorkerPanicked(u8),
}

/// Result alias for firmware update operations.
pub type FirmwareUpdateResult<T> = std::result::Result<T, FirmwareUpdateError>;

impl FirmwareUpdateError {
    /// Create a corrupt image error.
    #[must_use]
    pub fn corrupt(line: usize, reason: impl Into<String>) -> Self {
        Self::CorruptImage {
            line,
            reason: reason.into(),
        }
    }

    /// Completion code reported to code-only callers.
    ///
    /// Write failures keep the device code; everything else is
    /// `UnspecifiedError`.
    #[must_use]
    pub fn completion_code(&self) -> CompletionCode {
        match self {
            Self::Device { source, .. } | Self::LineFailed { source, .. } => {
                source.completion_code()
            }
            Self::UpdateInProgress(_) => CompletionCode::CmdFailedNotSupportedInPresentState,
            _ => CompletionCode::UnspecifiedError,
        }
    }

    /// True for errors raised while loading or validating the image.
    #[must_use]
    pub fn is_image_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::CorruptImage { .. }
                | Self::ModelIdMissing { .. }
                | Self::ModelIdMalformed { .. }
                | Self::IncompleteImage { .. }
        )
    }
}
