//! Backup energy figures broadcast to blades while on battery.

use crate::config::MonitorConfig;
use psu_device::{DischargeState, EnergyStorageSnapshot};
use serde::{Deserialize, Serialize};

/// Joules represented by one broadcast unit.
pub const ENERGY_SCALING_FACTOR: u16 = 50;

/// Aggregate view of the configured batteries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryAggregate {
    /// At least one pack reports present.
    pub present: bool,
    /// Packs reporting present.
    pub present_count: usize,
    /// Mean charge of the present packs whose charge level was read, percent.
    /// `None` when no present pack has a charge reading.
    pub average_charge: Option<u8>,
}

impl BatteryAggregate {
    /// Aggregate snapshots from the configured batteries.
    ///
    /// A pack whose charge read failed counts as present but stays out of
    /// the average.
    #[must_use]
    pub fn from_snapshots(snapshots: &[EnergyStorageSnapshot]) -> Self {
        let present_count = snapshots.iter().filter(|s| s.present).count();
        let charges: Vec<u32> = charged_packs(snapshots).map(u32::from).collect();
        let count = u32::try_from(charges.len()).unwrap_or(u32::MAX);
        let average_charge = charges
            .iter()
            .sum::<u32>()
            .checked_div(count)
            .map(|average| u8::try_from(average).unwrap_or(u8::MAX));
        Self {
            present: present_count > 0,
            present_count,
            average_charge,
        }
    }

    /// True when the charge is known to be below `threshold`, or no pack is
    /// present at all.
    #[must_use]
    pub fn charge_below(&self, threshold: u8) -> bool {
        match self.average_charge {
            Some(average) => average < threshold,
            None => !self.present,
        }
    }
}

/// Charge levels of present packs with a successful charge read.
fn charged_packs(snapshots: &[EnergyStorageSnapshot]) -> impl Iterator<Item = u8> + '_ {
    snapshots
        .iter()
        .filter(|s| s.present)
        .filter_map(|s| s.charge_level)
}

/// Energy available to blades, raw and scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyFigures {
    /// Energy stored across present packs, joules.
    pub available_joules: u64,
    /// Share of one blade, joules.
    pub blade_joules: u64,
    /// Share of one NVDIMM, joules.
    pub nvdimm_joules: u64,
    /// `blade_joules` in broadcast units.
    pub blade_units: u16,
    /// `nvdimm_joules` in broadcast units.
    pub nvdimm_units: u16,
}

impl EnergyFigures {
    /// Compute the figures for `snapshots` under `config`.
    #[must_use]
    pub fn compute(snapshots: &[EnergyStorageSnapshot], config: &MonitorConfig) -> Self {
        let capacity = u64::from(config.battery_capacity_joules);
        let available_joules: u64 = charged_packs(snapshots)
            .map(|charge| u64::from(charge) * capacity / 100)
            .sum();
        let blade_joules = available_joules
            .checked_div(u64::from(config.blade_population))
            .unwrap_or(0);
        let nvdimm_joules = blade_joules
            .checked_div(u64::from(config.nvdimms_per_blade))
            .unwrap_or(0);
        Self {
            available_joules,
            blade_joules,
            nvdimm_joules,
            blade_units: to_units(blade_joules),
            nvdimm_units: to_units(nvdimm_joules),
        }
    }
}

fn to_units(joules: u64) -> u16 {
    u16::try_from(joules / u64::from(ENERGY_SCALING_FACTOR)).unwrap_or(u16::MAX)
}

/// Payload of one energy storage broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyBroadcast {
    /// Any battery present.
    pub present: bool,
    /// Chassis battery state.
    pub state: DischargeState,
    /// Joules per unit in the energy fields.
    pub scaling_factor: u16,
    /// Energy per blade, scaled.
    pub blade_energy: u16,
    /// Energy per NVDIMM, scaled.
    pub nvdimm_energy: u16,
}

impl EnergyBroadcast {
    /// Broadcast for a chassis running from battery.
    #[must_use]
    pub fn on_battery(aggregate: &BatteryAggregate, figures: &EnergyFigures) -> Self {
        Self {
            present: aggregate.present,
            state: DischargeState::Discharging,
            scaling_factor: ENERGY_SCALING_FACTOR,
            blade_energy: figures.blade_units,
            nvdimm_energy: figures.nvdimm_units,
        }
    }
}
