//! Fault classification and remediation outcomes.

use core::fmt;
use psu_device::PsuId;
use serde::{Deserialize, Serialize};

/// What the investigate step found on a PSU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultType {
    /// Status unreadable or output not on.
    PsuFailure,
    /// Output on with a fault bit latched.
    PsuFaultPresent,
    /// Battery discharging into the chassis.
    OnBattery,
    /// Battery fault bit set, or battery state unreadable.
    BatteryFault,
}

impl FaultType {
    /// True for classifications that only battery-capable PSUs produce.
    #[must_use]
    pub fn is_battery(self) -> bool {
        matches!(self, Self::OnBattery | Self::BatteryFault)
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PsuFailure => write!(f, "PSU failure"),
            Self::PsuFaultPresent => write!(f, "PSU fault present"),
            Self::OnBattery => write!(f, "Running on battery"),
            Self::BatteryFault => write!(f, "Battery fault"),
        }
    }
}

/// A classified PSU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsuFault {
    /// Slot id.
    pub psu_id: PsuId,
    /// Classification.
    pub fault: FaultType,
}

/// Why remediation left a PSU in the failure set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnresolvedKind {
    /// CLEAR_FAULTS itself failed.
    PsuClearFaultFailed,
    /// Output still off after clearing faults.
    PsuPowerOff,
    /// Output on but drawing no power.
    PsuNoOutputPower,
    /// Battery fault indicator still asserted after clearing.
    BatteryFault,
}

impl fmt::Display for UnresolvedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PsuClearFaultFailed => write!(f, "Clear faults failed"),
            Self::PsuPowerOff => write!(f, "PSU output off"),
            Self::PsuNoOutputPower => write!(f, "PSU delivering no power"),
            Self::BatteryFault => write!(f, "Battery fault persists"),
        }
    }
}

/// A PSU remediation could not fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedFault {
    /// Slot id.
    pub psu_id: PsuId,
    /// Why it stays failed.
    pub kind: UnresolvedKind,
}
