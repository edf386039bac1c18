//! PmBus command table.
//!
//! Each command pairs an opcode with the number of bytes its read response
//! carries. Write-only commands report a zero-length response; block reads
//! include their leading count byte in the length.

use crate::error::{PmBusError, PmBusResult};
use core::fmt;

/// Every command the PSU manager issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PmBusCommand {
    /// OPERATION: on/off control.
    Operation,
    /// CLEAR_FAULTS: clear latched status bits.
    ClearFaults,
    /// STATUS_WORD: two-byte summary status.
    StatusWord,
    /// STATUS_VOUT register.
    StatusVout,
    /// STATUS_IOUT register.
    StatusIout,
    /// STATUS_INPUT register.
    StatusInput,
    /// STATUS_TEMPERATURE register.
    StatusTemperature,
    /// STATUS_CML register.
    StatusCml,
    /// STATUS_FANS_1_2 register.
    StatusFans12,
    /// READ_POUT: output power, linear encoded.
    ReadPout,
    /// MFR_MODEL block read.
    MfrModel,
    /// MFR_REVISION block read.
    MfrRevision,
    /// MFR_SERIAL block read.
    MfrSerial,
    /// Battery extended operation mode.
    ExtendedOperationMode,
    /// Battery fault indicator bit field.
    BatteryFaultIndicator,
    /// Battery health status word.
    BatteryHealthStatus,
    /// Battery charge level, linear encoded percentage.
    BatteryChargeLevel,
    /// Battery power output, linear encoded watts.
    BatteryPowerOutput,
    /// Battery firmware revision block read.
    BatteryFirmwareRevision,
    /// Enter the bootloader.
    EnterFirmwareUpgradeMode,
    /// Send the image model id and start the flash erase.
    SendModelId,
    /// Bootloader status byte.
    FirmwareUpdateStatus,
    /// Write eight bytes of program memory.
    WriteImageData,
    /// Write ROM-page-advance data.
    WriteRomPageData,
    /// Latch the address for the next image read.
    SetReadAddress,
    /// Read eight bytes of program memory.
    ReadImageData,
    /// Select the ROM page for subsequent reads.
    SelectRomPage,
    /// Leave the bootloader.
    ExitFirmwareUpgradeMode,
}

impl PmBusCommand {
    /// All commands, in opcode order.
    pub const ALL: [PmBusCommand; 28] = [
        Self::Operation,
        Self::ClearFaults,
        Self::StatusWord,
        Self::StatusVout,
        Self::StatusIout,
        Self::StatusInput,
        Self::StatusTemperature,
        Self::StatusCml,
        Self::StatusFans12,
        Self::ReadPout,
        Self::MfrModel,
        Self::MfrRevision,
        Self::MfrSerial,
        Self::ExtendedOperationMode,
        Self::BatteryFaultIndicator,
        Self::BatteryHealthStatus,
        Self::BatteryChargeLevel,
        Self::BatteryPowerOutput,
        Self::BatteryFirmwareRevision,
        Self::EnterFirmwareUpgradeMode,
        Self::SendModelId,
        Self::FirmwareUpdateStatus,
        Self::WriteImageData,
        Self::WriteRomPageData,
        Self::SetReadAddress,
        Self::ReadImageData,
        Self::SelectRomPage,
        Self::ExitFirmwareUpgradeMode,
    ];

    /// Wire opcode.
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Operation => 0x01,
            Self::ClearFaults => 0x03,
            Self::StatusWord => 0x79,
            Self::StatusVout => 0x7A,
            Self::StatusIout => 0x7B,
            Self::StatusInput => 0x7C,
            Self::StatusTemperature => 0x7D,
            Self::StatusCml => 0x7E,
            Self::StatusFans12 => 0x81,
            Self::ReadPout => 0x96,
            Self::MfrModel => 0x9A,
            Self::MfrRevision => 0x9B,
            Self::MfrSerial => 0x9E,
            Self::ExtendedOperationMode => 0xD6,
            Self::BatteryFaultIndicator => 0xD7,
            Self::BatteryHealthStatus => 0xD8,
            Self::BatteryChargeLevel => 0xD9,
            Self::BatteryPowerOutput => 0xDA,
            Self::BatteryFirmwareRevision => 0xDB,
            Self::EnterFirmwareUpgradeMode => 0xF0,
            Self::SendModelId => 0xF1,
            Self::FirmwareUpdateStatus => 0xF2,
            Self::WriteImageData => 0xF3,
            Self::WriteRomPageData => 0xF4,
            Self::SetReadAddress => 0xF5,
            Self::ReadImageData => 0xF6,
            Self::SelectRomPage => 0xF7,
            Self::ExitFirmwareUpgradeMode => 0xF8,
        }
    }

    /// Number of bytes a read of this command returns, count byte included.
    #[must_use]
    pub const fn response_length(self) -> u8 {
        match self {
            Self::ClearFaults
            | Self::EnterFirmwareUpgradeMode
            | Self::SendModelId
            | Self::WriteImageData
            | Self::WriteRomPageData
            | Self::SetReadAddress
            | Self::SelectRomPage
            | Self::ExitFirmwareUpgradeMode => 0,
            Self::Operation
            | Self::StatusVout
            | Self::StatusIout
            | Self::StatusInput
            | Self::StatusTemperature
            | Self::StatusCml
            | Self::StatusFans12
            | Self::ExtendedOperationMode
            | Self::BatteryFaultIndicator
            | Self::FirmwareUpdateStatus => 1,
            Self::StatusWord
            | Self::ReadPout
            | Self::BatteryHealthStatus
            | Self::BatteryChargeLevel
            | Self::BatteryPowerOutput => 2,
            Self::BatteryFirmwareRevision => 5,
            Self::ReadImageData => 8,
            Self::MfrRevision => 9,
            Self::MfrModel | Self::MfrSerial => 17,
        }
    }

    /// True for block reads whose first response byte is a length prefix.
    #[must_use]
    pub const fn is_block_read(self) -> bool {
        matches!(
            self,
            Self::MfrModel | Self::MfrRevision | Self::MfrSerial | Self::BatteryFirmwareRevision
        )
    }

    /// Look a command up by opcode.
    ///
    /// # Errors
    ///
    /// Returns [`PmBusError::UnsupportedCommand`] for opcodes outside the table.
    pub fn from_opcode(opcode: u8) -> PmBusResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|cmd| cmd.opcode() == opcode)
            .ok_or(PmBusError::UnsupportedCommand(opcode))
    }

    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Operation => "Operation",
            Self::ClearFaults => "ClearFaults",
            Self::StatusWord => "StatusWord",
            Self::StatusVout => "StatusVout",
            Self::StatusIout => "StatusIout",
            Self::StatusInput => "StatusInput",
            Self::StatusTemperature => "StatusTemperature",
            Self::StatusCml => "StatusCml",
            Self::StatusFans12 => "StatusFans12",
            Self::ReadPout => "ReadPout",
            Self::MfrModel => "MfrModel",
            Self::MfrRevision => "MfrRevision",
            Self::MfrSerial => "MfrSerial",
            Self::ExtendedOperationMode => "ExtendedOperationMode",
            Self::BatteryFaultIndicator => "BatteryFaultIndicator",
            Self::BatteryHealthStatus => "BatteryHealthStatus",
            Self::BatteryChargeLevel => "BatteryChargeLevel",
            Self::BatteryPowerOutput => "BatteryPowerOutput",
            Self::BatteryFirmwareRevision => "BatteryFirmwareRevision",
            Self::EnterFirmwareUpgradeMode => "EnterFirmwareUpgradeMode",
            Self::SendModelId => "SendModelId",
            Self::FirmwareUpdateStatus => "FirmwareUpdateStatus",
            Self::WriteImageData => "WriteImageData",
            Self::WriteRomPageData => "WriteRomPageData",
            Self::SetReadAddress => "SetReadAddress",
            Self::ReadImageData => "ReadImageData",
            Self::SelectRomPage => "SelectRomPage",
            Self::ExitFirmwareUpgradeMode => "ExitFirmwareUpgradeMode",
        }
    }
}

impl TryFrom<u8> for PmBusCommand {
    type Error = PmBusError;

    fn try_from(opcode: u8) -> PmBusResult<Self> {
        Self::from_opcode(opcode)
    }
}

impl fmt::Display for PmBusCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#04x})", self.name(), self.opcode())
    }
}

/// Expected response length for a raw opcode.
///
/// # Errors
///
/// Returns [`PmBusError::UnsupportedCommand`] for opcodes outside the table.
pub fn expected_response_length(opcode: u8) -> PmBusResult<u8> {
    PmBusCommand::from_opcode(opcode).map(PmBusCommand::response_length)
}
