//! Battery telemetry and discharge classification.

use crate::error::PsuError;
use chrono::{DateTime, Utc};
use psu_pmbus::{BatteryFaults, BatteryHealth, CompletionCode};
use serde::{Deserialize, Serialize};

/// Charge/discharge classification of a battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DischargeState {
    /// Health reports charging.
    Charging,
    /// Health reports discharging and the battery delivers power.
    Discharging,
    /// Neither charging nor delivering power.
    Floating,
    /// Telemetry unavailable.
    #[default]
    Unknown,
}

impl DischargeState {
    /// Classify from the health word and the battery output power.
    ///
    /// A discharging flag with zero output is `Floating`: AC-coupled
    /// hysteresis briefly raises the flag without any real draw.
    #[must_use]
    pub fn classify(health: BatteryHealth, power_output_w: i32) -> Self {
        if health.contains(BatteryHealth::CHARGING) {
            Self::Charging
        } else if health.contains(BatteryHealth::DISCHARGING) && power_output_w != 0 {
            Self::Discharging
        } else {
            Self::Floating
        }
    }
}

/// Fields of the composite battery read. `None` marks a failed sub-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// Battery output power, watts.
    pub power_output_w: Option<i32>,
    /// Charge level, percent.
    pub charge_level: Option<i32>,
    /// Fault indicator.
    pub faults: Option<BatteryFaults>,
}

impl BatteryStatus {
    /// True when the fault indicator was read and has any bit set.
    #[must_use]
    pub fn fault_asserted(&self) -> bool {
        self.faults.is_some_and(BatteryFaults::any)
    }
}

/// Result of the composite battery read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryStatusReport {
    /// Whatever could be read.
    pub status: BatteryStatus,
    /// `Success` only if every sub-read succeeded.
    pub code: CompletionCode,
}

impl BatteryStatusReport {
    /// A successful, as yet unfilled, report.
    #[must_use]
    pub fn new(status: BatteryStatus) -> Self {
        Self {
            status,
            code: CompletionCode::Success,
        }
    }

    /// A report with no data.
    #[must_use]
    pub fn failed(code: CompletionCode) -> Self {
        Self {
            status: BatteryStatus::default(),
            code,
        }
    }

    /// Mark the report failed. The first failure wins.
    pub fn record_failure(&mut self, err: &PsuError) {
        if self.code.is_success() {
            self.code = err.completion_code();
        }
    }

    /// True when every sub-read succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

/// Per-PSU energy storage view shared with the blade broadcast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyStorageSnapshot {
    /// Battery pack present.
    pub present: bool,
    /// Charge level, percent, clamped to 0..=100. `None` when the read failed.
    pub charge_level: Option<u8>,
    /// Battery output power, watts.
    pub power_output_w: i32,
    /// Any battery fault seen this pass.
    pub fault: bool,
    /// Discharge classification.
    pub state: DischargeState,
    /// When the telemetry was taken.
    pub updated_at: DateTime<Utc>,
}

impl EnergyStorageSnapshot {
    /// Build from the battery reads of one monitor pass.
    ///
    /// Unknown health means the pack is reported absent.
    #[must_use]
    pub fn from_readings(
        report: &BatteryStatusReport,
        health: Option<BatteryHealth>,
        state: DischargeState,
    ) -> Self {
        let charge_level = report
            .status
            .charge_level
            .and_then(|level| u8::try_from(level.clamp(0, 100)).ok());
        Self {
            present: health.is_some_and(|h| h.contains(BatteryHealth::PRESENT)),
            charge_level,
            power_output_w: report.status.power_output_w.unwrap_or(0),
            fault: !report.is_success() || health.is_none() || report.status.fault_asserted(),
            state,
            updated_at: Utc::now(),
        }
    }
}
