//! Status-word, battery and bootloader status decode.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// OPERATION payload that turns the output on.
pub const OPERATION_ON: u8 = 0x80;
/// OPERATION payload that turns the output off.
pub const OPERATION_OFF: u8 = 0x00;

const OFF_BIT: u16 = 1 << 6;
const POWER_GOOD_NEGATED_BIT: u16 = 1 << 11;

/// Output state derived from STATUS_WORD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    /// Output enabled and power good.
    On,
    /// Output off or power not good.
    Off,
}

/// Raw STATUS_WORD (low byte first on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusWord(pub u16);

impl StatusWord {
    /// Build from the two wire bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }

    /// Low status byte.
    #[must_use]
    pub fn low(self) -> u8 {
        self.0.to_le_bytes()[0]
    }

    /// High status byte.
    #[must_use]
    pub fn high(self) -> u8 {
        self.0.to_le_bytes()[1]
    }

    /// `On` only when POWER_GOOD# and OFF are both clear.
    #[must_use]
    pub fn power_state(self) -> PowerState {
        if self.0 & (POWER_GOOD_NEGATED_BIT | OFF_BIT) == 0 {
            PowerState::On
        } else {
            PowerState::Off
        }
    }

    /// Convenience for `power_state() == On`.
    #[must_use]
    pub fn is_on(self) -> bool {
        self.power_state() == PowerState::On
    }

    /// Any bit set in either byte.
    #[must_use]
    pub fn fault_present(self) -> bool {
        self.0 != 0
    }
}

bitflags! {
    /// Battery fault indicator register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BatteryFaults: u8 {
        /// Summary battery fault.
        const BATTERY_FAULT = 1 << 7;
        /// Cell under-voltage.
        const UNDER_VOLTAGE = 1 << 6;
        /// Over-current while charging.
        const OVER_CURRENT_CHARGE = 1 << 5;
        /// Over-temperature.
        const OVER_TEMPERATURE = 1 << 4;
        /// Cell balance not good.
        const CELL_BALANCE_NOT_GOOD = 1 << 3;
        /// Cell over-voltage.
        const OVER_VOLTAGE = 1 << 2;
        /// Over-current while discharging.
        const OVER_CURRENT_DISCHARGE = 1 << 1;
    }
}

impl BatteryFaults {
    /// True when any defined fault bit is set.
    #[must_use]
    pub fn any(self) -> bool {
        !self.is_empty()
    }
}

bitflags! {
    /// Battery health status word. Low byte carries state, high byte alarms.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BatteryHealth: u16 {
        /// Battery is charging.
        const CHARGING = 1 << 0;
        /// Battery is discharging.
        const DISCHARGING = 1 << 1;
        /// Battery fully charged.
        const FULLY_CHARGED = 1 << 2;
        /// Battery fully discharged.
        const FULLY_DISCHARGED = 1 << 3;
        /// Battery pack present.
        const PRESENT = 1 << 4;
        /// Over-charged alarm.
        const OVER_CHARGED_ALARM = 1 << 8;
        /// Terminate-charge alarm.
        const TERMINATE_CHARGE_ALARM = 1 << 9;
        /// Over-temperature alarm.
        const OVER_TEMPERATURE_ALARM = 1 << 10;
        /// Terminate-discharge alarm.
        const TERMINATE_DISCHARGE_ALARM = 1 << 11;
        /// Remaining-capacity alarm.
        const REMAINING_CAPACITY_ALARM = 1 << 12;
    }
}

impl BatteryHealth {
    /// Build from the two wire bytes, dropping undefined bits.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self::from_bits_truncate(u16::from_le_bytes(bytes))
    }

    /// Any alarm bit in the high byte.
    #[must_use]
    pub fn has_alarm(self) -> bool {
        self.bits() & 0xFF00 != 0
    }
}

/// Status byte reported by the bootloader through `FirmwareUpdateStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FirmwareDeviceStatus {
    /// Last command accepted.
    NoError,
    /// Model id matched and program memory was erased.
    FlashEraseOk,
    /// Model id did not match the running image.
    ModelIdMismatch,
    /// Payload checksum rejected.
    ChecksumError,
    /// Flash program failed.
    FlashWriteError,
    /// Address outside program memory.
    AddressOutOfRange,
    /// Bootloader still working.
    Busy,
    /// Any undocumented value.
    Unknown(u8),
}

impl FirmwareDeviceStatus {
    /// Decode the raw status byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::NoError,
            0x01 => Self::FlashEraseOk,
            0x02 => Self::ModelIdMismatch,
            0x03 => Self::ChecksumError,
            0x04 => Self::FlashWriteError,
            0x05 => Self::AddressOutOfRange,
            0x06 => Self::Busy,
            other => Self::Unknown(other),
        }
    }

    /// Raw wire value.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::NoError => 0x00,
            Self::FlashEraseOk => 0x01,
            Self::ModelIdMismatch => 0x02,
            Self::ChecksumError => 0x03,
            Self::FlashWriteError => 0x04,
            Self::AddressOutOfRange => 0x05,
            Self::Busy => 0x06,
            Self::Unknown(other) => other,
        }
    }
}
