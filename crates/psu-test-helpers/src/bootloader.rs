//! The PSU bootloader as seen over the bus.
//!
//! Checks the password, PEC, model id and payload checksums the way the
//! device does, keeps programmed flash keyed by (ROM page, address) and
//! answers read-back from it. Failures can be injected per test.

use psu_firmware_update::{Target, TargetLayout};
use psu_pmbus::{CompletionCode, FirmwareDeviceStatus, PmBusCommand, pec, verify_twos_complement};
use std::collections::BTreeMap;

/// Bootloader state of one simulated PSU.
#[derive(Debug, Clone)]
pub struct Bootloader {
    /// Model id the running image expects.
    pub model_id: [u8; 8],
    /// Target currently in bootloader mode.
    pub active: Option<Target>,
    /// Value returned by the next `FirmwareUpdateStatus` read.
    pub status: FirmwareDeviceStatus,
    /// Current ROM page.
    pub page: u8,
    /// Address latched by `SetReadAddress`.
    pub read_address: u16,
    /// Programmed memory.
    pub flash: BTreeMap<(u8, u16), [u8; 8]>,
    /// Payloads of `WriteRomPageData`.
    pub page_writes: Vec<[u8; 8]>,
    /// `WriteImageData` commands accepted.
    pub data_writes: usize,
    /// Successful bootloader entries.
    pub entries: usize,
    /// Exit codes received, in order.
    pub exit_codes: Vec<u8>,
    /// Report this status after the n-th (1-based) `WriteImageData`.
    pub fail_write: Option<(usize, FirmwareDeviceStatus)>,
    /// Flip the first byte read back from this (page, address).
    pub corrupt_read: Option<(u8, u16)>,
    /// Fail the enter transaction with this code.
    pub reject_enter: Option<CompletionCode>,
}

impl Default for Bootloader {
    fn default() -> Self {
        Self::new(*b"PSU-0001")
    }
}

impl Bootloader {
    /// A bootloader accepting images for `model_id`.
    pub fn new(model_id: [u8; 8]) -> Self {
        Self {
            model_id,
            active: None,
            status: FirmwareDeviceStatus::NoError,
            page: 0,
            read_address: 0,
            flash: BTreeMap::new(),
            page_writes: Vec::new(),
            data_writes: 0,
            entries: 0,
            exit_codes: Vec::new(),
            fail_write: None,
            corrupt_read: None,
            reject_enter: None,
        }
    }

    /// True while in bootloader mode.
    pub fn in_bootloader(&self) -> bool {
        self.active.is_some()
    }

    /// Handle a bootloader write. `bus_address` is the PSU's address.
    pub fn write(&mut self, command: PmBusCommand, payload: &[u8], bus_address: u8) -> CompletionCode {
        if command == PmBusCommand::EnterFirmwareUpgradeMode {
            return self.enter(payload, bus_address);
        }
        if self.active.is_none() {
            return CompletionCode::CmdFailedNotSupportedInPresentState;
        }

        let mut frame = vec![command.opcode()];
        frame.extend_from_slice(payload);
        if !verify_twos_complement(&frame) {
            self.status = FirmwareDeviceStatus::ChecksumError;
            return CompletionCode::Success;
        }
        let body = payload.split_last().map_or(&[][..], |(_, body)| body);

        match command {
            PmBusCommand::SendModelId => {
                if body == self.model_id {
                    self.flash.clear();
                    self.page = 0;
                    self.status = FirmwareDeviceStatus::FlashEraseOk;
                } else {
                    self.status = FirmwareDeviceStatus::ModelIdMismatch;
                }
            }
            PmBusCommand::WriteImageData => {
                self.data_writes += 1;
                if let Some((nth, status)) = self.fail_write {
                    if nth == self.data_writes {
                        self.status = status;
                        return CompletionCode::Success;
                    }
                }
                let Some((address, data)) = body.split_first_chunk::<2>() else {
                    return CompletionCode::RequestDataLengthInvalid;
                };
                let Ok(data) = <[u8; 8]>::try_from(data) else {
                    return CompletionCode::RequestDataLengthInvalid;
                };
                self.flash
                    .insert((self.page, u16::from_le_bytes(*address)), data);
                self.status = FirmwareDeviceStatus::NoError;
            }
            PmBusCommand::WriteRomPageData => {
                let Ok(data) = <[u8; 8]>::try_from(body) else {
                    return CompletionCode::RequestDataLengthInvalid;
                };
                self.page_writes.push(data);
                self.page = self.page.wrapping_add(1);
                self.status = FirmwareDeviceStatus::NoError;
            }
            PmBusCommand::SetReadAddress => {
                let Ok(address) = <[u8; 2]>::try_from(body) else {
                    return CompletionCode::RequestDataLengthInvalid;
                };
                self.read_address = u16::from_le_bytes(address);
            }
            PmBusCommand::SelectRomPage => {
                let Some(page) = body.first() else {
                    return CompletionCode::RequestDataLengthInvalid;
                };
                self.page = *page;
            }
            PmBusCommand::ExitFirmwareUpgradeMode => {
                self.exit_codes.push(body.first().copied().unwrap_or_default());
                self.active = None;
            }
            _ => return CompletionCode::InvalidCommand,
        }
        CompletionCode::Success
    }

    /// Handle a bootloader read.
    pub fn read(&self, command: PmBusCommand) -> Result<Vec<u8>, CompletionCode> {
        if self.active.is_none() {
            return Err(CompletionCode::CmdFailedNotSupportedInPresentState);
        }
        match command {
            PmBusCommand::FirmwareUpdateStatus => Ok(vec![self.status.as_u8()]),
            PmBusCommand::ReadImageData => {
                let key = (self.page, self.read_address);
                let mut data = self.flash.get(&key).copied().unwrap_or([0xFF; 8]);
                if self.corrupt_read == Some(key) {
                    data[0] ^= 0xFF;
                }
                Ok(data.to_vec())
            }
            _ => Err(CompletionCode::InvalidCommand),
        }
    }

    fn enter(&mut self, payload: &[u8], bus_address: u8) -> CompletionCode {
        if let Some(code) = self.reject_enter {
            return code;
        }
        let Some((password, [carried])) = payload.split_first_chunk::<4>() else {
            return CompletionCode::RequestDataLengthInvalid;
        };
        let Some(layout) = [TargetLayout::PRIMARY, TargetLayout::SECONDARY]
            .into_iter()
            .find(|layout| layout.password == *password)
        else {
            return CompletionCode::InvalidDataFieldInRequest;
        };
        let mut frame = vec![bus_address, PmBusCommand::EnterFirmwareUpgradeMode.opcode()];
        frame.extend_from_slice(password);
        if pec(&frame) != *carried {
            return CompletionCode::InvalidDataFieldInRequest;
        }
        self.active = Some(layout.target);
        self.entries += 1;
        self.page = 0;
        self.status = FirmwareDeviceStatus::NoError;
        CompletionCode::Success
    }
}
