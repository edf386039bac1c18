//! In-field firmware reprogramming for PSU microcontrollers.
//!
//! An update walks one PSU through a strictly linear sequence of stages:
//!
//! ```text
//! ReadFile -> ExtractModelId -> EnterFirmwareUpgradeMode -> SendModelId
//!          -> WriteFirmwareImage -> VerifyFirmwareImage
//!          -> ExitFirmwareUpgradeMode -> Completed
//! ```
//!
//! Any failure is terminal for the run. Once the bootloader password has been
//! sent, leaving the bootloader is attempted on every exit path, including a
//! panic unwind.
//!
//! - [`image`]: hex-record image parser and write plan
//! - [`target`]: primary/secondary memory layouts and bootloader constants
//! - [`timing`]: device-mandated delays
//! - [`engine`]: the stage machine, run synchronously under the PSU lock
//! - [`manager`]: precondition checks and one worker thread per update
//!
//! # Example
//!
//! ```ignore
//! use psu_firmware_update::prelude::*;
//!
//! let manager = FirmwareUpdateManager::new(registry);
//! let handle = manager.start_update(1, "psu_primary.hex", Target::Primary)?;
//! handle.join()?;
//! ```

#![deny(static_mut_refs, missing_debug_implementations)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod engine;
pub mod error;
pub mod image;
pub mod manager;
pub mod prelude;
pub mod target;
pub mod timing;

pub use engine::FirmwareUpdateEngine;
pub use error::{FirmwareUpdateError, FirmwareUpdateResult};
pub use image::{FirmwareImage, HexRecord, ImageSummary, PlanStep, RecordPayload, WritePlan};
pub use manager::{FirmwareUpdateManager, UpdateHandle};
pub use target::{Target, TargetLayout, enter_mode_pec};
pub use timing::UpdateTimings;
