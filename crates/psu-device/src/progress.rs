//! Observable firmware update progress.
//!
//! Written only by the update engine while it holds the PSU lock; read by
//! diagnostics at any time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall outcome of the latest update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FwUpdateStatus {
    /// No update has run.
    #[default]
    NotStarted,
    /// An update is running.
    InProgress,
    /// The last update completed and verified.
    Success,
    /// The last update stopped early.
    Failed,
}

impl FwUpdateStatus {
    /// True for `Success` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Last stage attempted by the update engine, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum FwUpdateStage {
    /// No stage attempted.
    #[default]
    NotStarted,
    /// Reading the image file.
    ReadFile,
    /// Locating the model id record.
    ExtractModelId,
    /// Sending the bootloader password.
    EnterFirmwareUpgradeMode,
    /// Sending the model id and waiting for erase.
    SendModelId,
    /// Programming flash.
    WriteFirmwareImage,
    /// Reading flash back.
    VerifyFirmwareImage,
    /// Leaving the bootloader.
    ExitFirmwareUpgradeMode,
    /// Every stage succeeded.
    Completed,
}

impl fmt::Display for FwUpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for FwUpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status and stage pair for one PSU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FwProgress {
    /// Overall outcome.
    pub status: FwUpdateStatus,
    /// Last stage attempted.
    pub stage: FwUpdateStage,
}
