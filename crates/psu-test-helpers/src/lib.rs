//! Shared test utilities for the PSU manager crates.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with `#[track_caller]`
//! - [`sim`] - A simulated chassis bus with programmable PSUs and alert line
//! - [`bootloader`] - The PSU bootloader as seen over the bus
//! - [`image`] - Synthetic firmware images for any target layout
//! - [`platform`] - Recording blade manager, indicator and platform actions
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! psu-test-helpers = { workspace = true }
//! ```
//!
//! ```rust,ignore
//! use psu_test_helpers::prelude::*;
//! ```

#![allow(clippy::unwrap_used, clippy::panic)]

pub mod bootloader;
pub mod image;
pub mod must;
pub mod platform;
pub mod prelude;
pub mod sim;

pub use must::{must, must_some};
