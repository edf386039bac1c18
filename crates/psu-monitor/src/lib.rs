//! Fault monitor and remediation loop for chassis PSUs.
//!
//! A long-lived thread sweeps the PSU registry, classifies PSU and battery
//! faults, tries to clear them and escalates what remains to the chassis
//! failure indicator and to the blades.
//!
//! # Strategies
//!
//! - **Alert driven**: the shared alert line gates the sweep. An asserted
//!   line sweeps immediately; a quiet line sweeps once per poll interval; a
//!   failed alert read degrades to polling for that pass.
//! - **Polling**: every pass sweeps.
//!
//! # Example
//!
//! ```no_run
//! use psu_monitor::prelude::*;
//! use std::sync::Arc;
//!
//! fn run(registry: PsuRegistry, services: MonitorServices) -> MonitorResult<()> {
//!     let config = MonitorConfig::builder().alert_monitoring(false).build()?;
//!     let handle = Arc::new(PsuMonitor::new(config, registry, services)?).spawn()?;
//!     // ...
//!     handle.shutdown()
//! }
//! ```

#![deny(static_mut_refs, missing_debug_implementations)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod discharge;
pub mod energy;
pub mod error;
pub mod faults;
pub mod monitor;
pub mod platform;
pub mod prelude;

pub use config::{MonitorConfig, MonitorConfigBuilder};
pub use discharge::DischargeTimer;
pub use energy::{BatteryAggregate, ENERGY_SCALING_FACTOR, EnergyBroadcast, EnergyFigures};
pub use error::{MonitorError, MonitorResult};
pub use faults::{FaultType, PsuFault, UnresolvedFault, UnresolvedKind};
pub use monitor::{MonitorHandle, MonitorServices, MonitorStats, PassReport, PsuMonitor};
pub use platform::{
    BladeAlertConfig, BladeManager, ChassisIndicator, CriticalBatteryEvent, PlatformActions,
};
