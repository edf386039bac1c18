//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use psu_test_helpers::prelude::*;
//! ```

pub use crate::bootloader::Bootloader;
pub use crate::image::{ImageBuilder, payload_for, record_line, small_layout};
pub use crate::must::{must, must_some};
pub use crate::platform::{
    RecordingBlades, RecordingChassis, RecordingIndicator, RecordingPlatform,
};
pub use crate::sim::{STATUS_WORD_OFF, SimBattery, SimPsu, SimulatedBus, Transaction};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
