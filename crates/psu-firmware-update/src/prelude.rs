//! Convenience re-exports for common firmware update types.

pub use crate::engine::FirmwareUpdateEngine;
pub use crate::error::{FirmwareUpdateError, FirmwareUpdateResult};
pub use crate::image::{FirmwareImage, ImageSummary, WritePlan};
pub use crate::manager::{FirmwareUpdateManager, UpdateHandle};
pub use crate::target::{Target, TargetLayout};
pub use crate::timing::UpdateTimings;
pub use psu_device::{FwUpdateStage, FwUpdateStatus};
