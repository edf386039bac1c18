//! Chassis collaborators the monitor escalates to.
//!
//! The blade manager, the chassis failure indicator and the platform-wide
//! critical battery action live outside this crate. The monitor only sees
//! these traits.

use crate::energy::EnergyBroadcast;
use psu_pmbus::CompletionCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-blade alert configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BladeAlertConfig {
    /// PSU alert forwarding enabled on the blade.
    pub alert_enabled: bool,
    /// DPC override currently asserted.
    pub dpc_asserted: bool,
}

/// Blade management interface.
pub trait BladeManager: Send + Sync {
    /// Send the energy storage state to every blade.
    ///
    /// Returns the completion code each blade answered with.
    fn broadcast_energy_storage(&self, broadcast: &EnergyBroadcast) -> BTreeMap<u8, CompletionCode>;

    /// Blades currently powered on.
    fn powered_blades(&self) -> Vec<u8>;

    /// Read a blade's alert configuration.
    ///
    /// # Errors
    ///
    /// Returns the blade's completion code on failure.
    fn alert_config(&self, blade_id: u8) -> Result<BladeAlertConfig, CompletionCode>;

    /// Write a blade's alert configuration.
    fn set_alert_config(&self, blade_id: u8, config: BladeAlertConfig) -> CompletionCode;
}

/// Chassis-wide PSU failure indicator.
pub trait ChassisIndicator: Send + Sync {
    /// Assert or clear the indicator.
    fn set_psu_failure(&self, asserted: bool);
}

/// What triggered a critical battery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalBatteryEvent {
    /// Longest running discharge.
    pub discharge_time: Option<Duration>,
    /// Mean charge of present packs with a charge reading, percent.
    pub average_charge: Option<u8>,
}

/// Platform-wide actions.
pub trait PlatformActions: Send + Sync {
    /// Run the critical battery action. May block; called off the monitor thread.
    fn critical_battery(&self, event: &CriticalBatteryEvent);
}
