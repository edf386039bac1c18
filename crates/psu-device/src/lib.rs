//! PSU device model for rack power supplies.
//!
//! This crate turns intents such as "turn off" or "get status" into bus
//! transactions against a [`BusTransport`], decoded with `psu-pmbus`.
//!
//! # Architecture
//!
//! - [`transport`]: the blocking bus interface the chassis provides
//! - [`psu`]: [`PowerSupply`] operations and the [`Psu`] implementation
//! - [`battery`]: battery telemetry and discharge classification
//! - [`alert`]: the shared PSU alert line
//! - [`progress`]: observable firmware update status and stage
//! - [`registry`]: one entry per PSU bundling its lock, busy flag and cached state
//! - [`error`]: device error types
//!
//! # Locking
//!
//! Every multi-transaction sequence against PSU *i* holds that PSU's entry
//! lock. The busy flag is checked before the lock so routine monitoring never
//! waits behind a firmware update.

#![deny(static_mut_refs, missing_debug_implementations)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod alert;
pub mod battery;
pub mod error;
pub mod prelude;
pub mod progress;
pub mod psu;
pub mod registry;
pub mod transport;

pub use alert::{ALERT_LINE_STATUS, AlertLine};
pub use battery::{BatteryStatus, BatteryStatusReport, DischargeState, EnergyStorageSnapshot};
pub use error::{Direction, PsuError, PsuResult};
pub use progress::{FwProgress, FwUpdateStage, FwUpdateStatus};
pub use psu::{
    BatteryVendorTable, DEFAULT_POWER_OFF_BACKOFF, FaultStatusRegisters, PowerSupply, Psu,
    PsuId, PsuStatus, PsuVariant,
};
pub use registry::{BusyGuard, CachedStatus, PsuEntry, PsuRegistry, PsuSnapshot};
pub use transport::{BusRequest, BusResponse, BusTransport, DeviceKind};
