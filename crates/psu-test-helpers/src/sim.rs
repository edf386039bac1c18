//! A simulated chassis bus.
//!
//! [`SimulatedBus`] implements [`BusTransport`] over a table of programmable
//! PSUs plus the shared alert line, and records every transaction. Tests
//! mutate PSU registers through [`SimulatedBus::update`] while the code under
//! test runs.

use crate::bootloader::Bootloader;
use parking_lot::Mutex;
use psu_device::{
    BatteryVendorTable, BusRequest, BusResponse, BusTransport, DeviceKind, PsuId, PsuRegistry,
    PsuVariant,
};
use psu_pmbus::{
    BatteryFaults, BatteryHealth, CompletionCode, OPERATION_OFF, OPERATION_ON, PmBusCommand,
    encode_linear,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// STATUS_WORD with the output off: OFF and POWER_GOOD# set.
pub const STATUS_WORD_OFF: u16 = (1 << 6) | (1 << 11);

/// Battery pack behind a simulated PSU.
#[derive(Debug, Clone)]
pub struct SimBattery {
    /// Health word.
    pub health: BatteryHealth,
    /// Charge percent.
    pub charge_level: i16,
    /// Output power, watts.
    pub power_output_w: i16,
    /// Fault indicator.
    pub faults: BatteryFaults,
    /// Faults survive a clear.
    pub sticky_faults: bool,
    /// Pack firmware revision.
    pub firmware_revision: String,
    /// Extended operation mode byte.
    pub extended_mode: u8,
}

impl Default for SimBattery {
    fn default() -> Self {
        Self {
            health: BatteryHealth::PRESENT | BatteryHealth::FULLY_CHARGED,
            charge_level: 100,
            power_output_w: 0,
            faults: BatteryFaults::empty(),
            sticky_faults: false,
            firmware_revision: "B1.0".into(),
            extended_mode: 0,
        }
    }
}

impl SimBattery {
    /// A pack discharging at `watts` with `charge` percent left.
    pub fn discharging(charge: i16, watts: i16) -> Self {
        Self {
            health: BatteryHealth::PRESENT | BatteryHealth::DISCHARGING,
            charge_level: charge,
            power_output_w: watts,
            ..Self::default()
        }
    }

    /// A pack charging with `charge` percent.
    pub fn charging(charge: i16) -> Self {
        Self {
            health: BatteryHealth::PRESENT | BatteryHealth::CHARGING,
            charge_level: charge,
            ..Self::default()
        }
    }
}

/// Register file of one simulated PSU.
#[derive(Debug, Clone)]
pub struct SimPsu {
    /// STATUS_WORD.
    pub status_word: u16,
    /// STATUS_WORD after a CLEAR_FAULTS; `None` leaves it unchanged.
    pub status_after_clear: Option<u16>,
    /// READ_POUT, watts.
    pub power_output_w: i16,
    /// STATUS_VOUT/IOUT/INPUT/TEMPERATURE/CML/FANS_1_2.
    pub status_registers: [u8; 6],
    /// MFR_MODEL.
    pub model: String,
    /// MFR_SERIAL.
    pub serial: String,
    /// MFR_REVISION.
    pub revision: String,
    /// Battery pack, if any.
    pub battery: Option<SimBattery>,
    /// Opcodes that fail with the given code.
    pub failures: HashMap<u8, CompletionCode>,
    /// Bootloader.
    pub bootloader: Bootloader,
    /// OPERATION payloads written, in order.
    pub operations: Vec<u8>,
    /// CLEAR_FAULTS writes.
    pub clear_faults: usize,
}

impl Default for SimPsu {
    fn default() -> Self {
        Self {
            status_word: 0,
            status_after_clear: None,
            power_output_w: 450,
            status_registers: [0; 6],
            model: "PSU-1600W".into(),
            serial: "SN0000001".into(),
            revision: "1.02".into(),
            battery: None,
            failures: HashMap::new(),
            bootloader: Bootloader::default(),
            operations: Vec::new(),
            clear_faults: 0,
        }
    }
}

impl SimPsu {
    /// A healthy PSU with a charged battery pack.
    pub fn with_battery() -> Self {
        Self {
            battery: Some(SimBattery::default()),
            ..Self::default()
        }
    }

    /// A PSU whose output is off.
    pub fn off() -> Self {
        Self {
            status_word: STATUS_WORD_OFF,
            power_output_w: 0,
            ..Self::default()
        }
    }

    /// Make `command` fail with `code`.
    pub fn fail(&mut self, command: PmBusCommand, code: CompletionCode) -> &mut Self {
        self.failures.insert(command.opcode(), code);
        self
    }

    /// Stop failing `command`.
    pub fn heal(&mut self, command: PmBusCommand) -> &mut Self {
        self.failures.remove(&command.opcode());
        self
    }

    /// The matching device variant.
    pub fn variant(&self) -> PsuVariant {
        if self.battery.is_some() {
            PsuVariant::Battery(BatteryVendorTable::STANDARD)
        } else {
            PsuVariant::Basic
        }
    }

    fn read(&self, command: PmBusCommand) -> Result<Vec<u8>, CompletionCode> {
        let [vout, iout, input, temperature, cml, fans] = self.status_registers;
        let battery = || self.battery.as_ref().ok_or(CompletionCode::InvalidCommand);
        match command {
            PmBusCommand::Operation => Ok(vec![if self.status_word & (1 << 6) == 0 {
                OPERATION_ON
            } else {
                OPERATION_OFF
            }]),
            PmBusCommand::StatusWord => Ok(self.status_word.to_le_bytes().to_vec()),
            PmBusCommand::StatusVout => Ok(vec![vout]),
            PmBusCommand::StatusIout => Ok(vec![iout]),
            PmBusCommand::StatusInput => Ok(vec![input]),
            PmBusCommand::StatusTemperature => Ok(vec![temperature]),
            PmBusCommand::StatusCml => Ok(vec![cml]),
            PmBusCommand::StatusFans12 => Ok(vec![fans]),
            PmBusCommand::ReadPout => Ok(encode_linear(self.power_output_w, 0).to_vec()),
            PmBusCommand::MfrModel => Ok(block(&self.model, command)),
            PmBusCommand::MfrSerial => Ok(block(&self.serial, command)),
            PmBusCommand::MfrRevision => Ok(block(&self.revision, command)),
            PmBusCommand::ExtendedOperationMode => Ok(vec![battery()?.extended_mode]),
            PmBusCommand::BatteryFaultIndicator => Ok(vec![battery()?.faults.bits()]),
            PmBusCommand::BatteryHealthStatus => Ok(battery()?.health.bits().to_le_bytes().to_vec()),
            PmBusCommand::BatteryChargeLevel => Ok(encode_linear(battery()?.charge_level, 0).to_vec()),
            PmBusCommand::BatteryPowerOutput => {
                Ok(encode_linear(battery()?.power_output_w, 0).to_vec())
            }
            PmBusCommand::BatteryFirmwareRevision => {
                Ok(block(&battery()?.firmware_revision, command))
            }
            PmBusCommand::FirmwareUpdateStatus | PmBusCommand::ReadImageData => {
                self.bootloader.read(command)
            }
            _ => Err(CompletionCode::InvalidCommand),
        }
    }

    fn write(&mut self, command: PmBusCommand, payload: &[u8], bus_address: u8) -> CompletionCode {
        match command {
            PmBusCommand::Operation => {
                let Some(&operation) = payload.first() else {
                    return CompletionCode::RequestDataLengthInvalid;
                };
                self.operations.push(operation);
                if operation == OPERATION_OFF {
                    self.status_word |= STATUS_WORD_OFF;
                } else {
                    self.status_word &= !STATUS_WORD_OFF;
                }
                CompletionCode::Success
            }
            PmBusCommand::ClearFaults => {
                self.clear_faults += 1;
                if let Some(word) = self.status_after_clear {
                    self.status_word = word;
                }
                CompletionCode::Success
            }
            PmBusCommand::ExtendedOperationMode => match (&mut self.battery, payload.first()) {
                (Some(battery), Some(&mode)) => {
                    battery.extended_mode = mode;
                    CompletionCode::Success
                }
                (None, _) => CompletionCode::InvalidCommand,
                (_, None) => CompletionCode::RequestDataLengthInvalid,
            },
            PmBusCommand::BatteryFaultIndicator => match &mut self.battery {
                Some(battery) => {
                    if !battery.sticky_faults {
                        battery.faults = BatteryFaults::empty();
                    }
                    CompletionCode::Success
                }
                None => CompletionCode::InvalidCommand,
            },
            PmBusCommand::EnterFirmwareUpgradeMode
            | PmBusCommand::SendModelId
            | PmBusCommand::WriteImageData
            | PmBusCommand::WriteRomPageData
            | PmBusCommand::SetReadAddress
            | PmBusCommand::SelectRomPage
            | PmBusCommand::ExitFirmwareUpgradeMode => {
                self.bootloader.write(command, payload, bus_address)
            }
            _ => CompletionCode::InvalidCommand,
        }
    }
}

/// Length-prefixed ASCII block padded to the command's response length.
fn block(text: &str, command: PmBusCommand) -> Vec<u8> {
    let capacity = usize::from(command.response_length()).saturating_sub(1);
    let mut bytes: Vec<u8> = text.bytes().take(capacity).collect();
    bytes.resize(capacity, 0);
    let mut out = vec![u8::try_from(capacity).unwrap_or(u8::MAX)];
    out.extend(bytes);
    out
}

/// One recorded bus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Device kind addressed.
    pub kind: DeviceKind,
    /// Device id addressed.
    pub device_id: u8,
    /// Opcode sent.
    pub command: u8,
    /// Write payload, empty for reads.
    pub payload: Vec<u8>,
    /// True for reads.
    pub read: bool,
}

#[derive(Debug)]
struct BusState {
    psus: BTreeMap<u8, SimPsu>,
    alert: Result<bool, CompletionCode>,
    log: Vec<Transaction>,
}

/// Simulated chassis bus.
#[derive(Debug)]
pub struct SimulatedBus {
    state: Mutex<BusState>,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self {
            state: Mutex::new(BusState {
                psus: BTreeMap::new(),
                alert: Ok(false),
                log: Vec::new(),
            }),
        }
    }
}

impl SimulatedBus {
    /// An empty bus with the alert line deasserted.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus with `psus` in slots 1, 2, ...
    pub fn with_psus(psus: impl IntoIterator<Item = SimPsu>) -> Arc<Self> {
        let bus = Self::new();
        {
            let mut state = bus.state.lock();
            for (slot, psu) in (1u8..).zip(psus) {
                state.psus.insert(slot, psu);
            }
        }
        Arc::new(bus)
    }

    /// Insert or replace the PSU in `slot`.
    pub fn insert(&self, slot: u8, psu: SimPsu) {
        self.state.lock().psus.insert(slot, psu);
    }

    /// Mutate the PSU in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is empty.
    pub fn update<R>(&self, slot: u8, f: impl FnOnce(&mut SimPsu) -> R) -> R {
        let mut state = self.state.lock();
        let psu = state
            .psus
            .get_mut(&slot)
            .unwrap_or_else(|| panic!("no simulated PSU in slot {slot}"));
        f(psu)
    }

    /// Copy of the PSU in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is empty.
    pub fn psu(&self, slot: u8) -> SimPsu {
        self.update(slot, |psu| psu.clone())
    }

    /// Drive the alert line.
    pub fn set_alert(&self, asserted: bool) {
        self.state.lock().alert = Ok(asserted);
    }

    /// Make alert line reads fail.
    pub fn fail_alert(&self, code: CompletionCode) {
        self.state.lock().alert = Err(code);
    }

    /// Device variants in slot order, for building a registry.
    pub fn variants(&self) -> Vec<PsuVariant> {
        self.state.lock().psus.values().map(SimPsu::variant).collect()
    }

    /// A registry over every simulated PSU.
    pub fn registry(self: &Arc<Self>) -> PsuRegistry {
        let transport: Arc<dyn BusTransport> = self.clone();
        PsuRegistry::from_variants(&transport, &self.variants())
    }

    /// Every transaction so far.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().log.clone()
    }

    /// Transactions addressed to PSU `slot`.
    pub fn transactions_for(&self, slot: u8) -> Vec<Transaction> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|t| t.kind == DeviceKind::Psu && t.device_id == slot)
            .cloned()
            .collect()
    }

    /// Writes of `command` to PSU `slot`.
    pub fn writes_of(&self, slot: u8, command: PmBusCommand) -> Vec<Vec<u8>> {
        self.transactions_for(slot)
            .into_iter()
            .filter(|t| !t.read && t.command == command.opcode())
            .map(|t| t.payload)
            .collect()
    }

    /// Number of transactions of `command` to PSU `slot`.
    pub fn count(&self, slot: u8, command: PmBusCommand) -> usize {
        self.transactions_for(slot)
            .iter()
            .filter(|t| t.command == command.opcode())
            .count()
    }

    /// Forget recorded transactions.
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }
}

impl BusTransport for SimulatedBus {
    fn send_receive(&self, kind: DeviceKind, device_id: u8, request: &BusRequest) -> BusResponse {
        let mut state = self.state.lock();
        let is_read = request.response_length > 0;
        state.log.push(Transaction {
            kind,
            device_id,
            command: request.command,
            payload: request.payload.clone(),
            read: is_read,
        });

        if kind == DeviceKind::PsuAlertLine {
            return match state.alert {
                Ok(asserted) => BusResponse::success(vec![u8::from(asserted)]),
                Err(code) => BusResponse::failure(code),
            };
        }

        let Some(psu) = state.psus.get_mut(&device_id) else {
            return BusResponse::failure(CompletionCode::Timeout);
        };
        if let Some(code) = psu.failures.get(&request.command) {
            return BusResponse::failure(*code);
        }
        let Ok(command) = PmBusCommand::from_opcode(request.command) else {
            return BusResponse::failure(CompletionCode::InvalidCommand);
        };

        if is_read {
            match psu.read(command) {
                Ok(data) => BusResponse::success(data),
                Err(code) => BusResponse::failure(code),
            }
        } else {
            let bus_address = PsuId::new(device_id).map_or(0, PsuId::bus_address);
            let code = psu.write(command, &request.payload, bus_address);
            if code.is_success() {
                BusResponse::success(Vec::new())
            } else {
                BusResponse::failure(code)
            }
        }
    }
}
