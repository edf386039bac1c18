//! Primary and secondary microcontroller layouts.

use psu_device::PsuId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which microcontroller of the PSU is reprogrammed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Primary-side controller.
    Primary,
    /// Secondary-side controller.
    Secondary,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        })
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!("unknown firmware target '{other}'")),
        }
    }
}

/// Memory layout and bootloader constants of one target.
///
/// Addresses below `0x0001_0000` are offsets within a ROM page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLayout {
    /// Target these constants belong to.
    pub target: Target,
    /// Address of the info record carrying the model id.
    pub model_id_address: u32,
    /// First programmed (and verified) address on ROM page 0.
    pub write_start: u16,
    /// Last programmed address on the final ROM page.
    pub write_end: u16,
    /// Address of the last record of a ROM page.
    pub rom_page_end: u16,
    /// ROM page holding `write_end`.
    pub final_rom_page: u8,
    /// Bootloader password.
    pub password: [u8; 4],
    /// Payload of `ExitFirmwareUpgradeMode`.
    pub exit_code: u8,
}

impl TargetLayout {
    /// Primary controller layout.
    pub const PRIMARY: Self = Self {
        target: Target::Primary,
        model_id_address: 0x00FF_0000,
        write_start: 0x0800,
        write_end: 0x7FF0,
        rom_page_end: 0xFFF0,
        final_rom_page: 1,
        password: [0x3A, 0xC5, 0x01, 0x7E],
        exit_code: 0x01,
    };

    /// Secondary controller layout.
    pub const SECONDARY: Self = Self {
        target: Target::Secondary,
        model_id_address: 0x00FE_0000,
        write_start: 0x0400,
        write_end: 0x3FF0,
        rom_page_end: 0xFFF0,
        final_rom_page: 0,
        password: [0x3A, 0xC5, 0x02, 0x7E],
        exit_code: 0x02,
    };

    /// Production layout of `target`.
    #[must_use]
    pub const fn for_target(target: Target) -> Self {
        match target {
            Target::Primary => Self::PRIMARY,
            Target::Secondary => Self::SECONDARY,
        }
    }
}

/// PEC trailer of `EnterFirmwareUpgradeMode` for this slot and target.
///
/// The frame covered is the slot's bus address, the opcode and the fixed
/// password, so there are exactly four values.
#[must_use]
pub const fn enter_mode_pec(psu_id: PsuId, target: Target) -> u8 {
    let odd_slot = psu_id.get() % 2 == 1;
    match (odd_slot, target) {
        (true, Target::Primary) => 0x50,
        (true, Target::Secondary) => 0x6F,
        (false, Target::Primary) => 0x02,
        (false, Target::Secondary) => 0x3D,
    }
}
