//! PSU operations.
//!
//! [`PowerSupply`] carries the operations every PSU variant shares. Only the
//! bus primitives and the power-off policy are required; everything else is
//! built on [`PowerSupply::raw_read`] and [`PowerSupply::raw_write`].
//! Battery operations return [`PsuError::NotSupported`] on
//! [`PsuVariant::Basic`] units.

use crate::battery::{BatteryStatus, BatteryStatusReport};
use crate::error::{Direction, PsuError, PsuResult};
use crate::transport::{BusRequest, BusTransport, DeviceKind};
use parking_lot::Mutex;
use psu_pmbus::{
    BatteryFaults, BatteryHealth, CompletionCode, OPERATION_OFF, OPERATION_ON, PmBusCommand,
    PmBusError, PowerState, StatusWord, decode_ascii_block, decode_linear,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Minimum spacing between two accepted power-off requests to one PSU.
pub const DEFAULT_POWER_OFF_BACKOFF: Duration = Duration::from_secs(30);

const ODD_SLOT_ADDRESS: u8 = 0xB0;
const EVEN_SLOT_ADDRESS: u8 = 0xB2;

/// 1-based PSU slot id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PsuId(u8);

impl PsuId {
    /// Create an id. Slot ids start at 1.
    #[must_use]
    pub fn new(id: u8) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    /// Raw slot number.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Zero-based position in per-PSU tables.
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0.saturating_sub(1))
    }

    /// Bus address: odd slots answer on `0xB0`, even slots on `0xB2`.
    #[must_use]
    pub const fn bus_address(self) -> u8 {
        if self.0 % 2 == 1 {
            ODD_SLOT_ADDRESS
        } else {
            EVEN_SLOT_ADDRESS
        }
    }
}

impl fmt::Display for PsuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vendor constants for battery-backed PSUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryVendorTable {
    /// Vendor name, for logs.
    pub vendor: &'static str,
    /// Byte written to the fault indicator to clear it.
    pub fault_clear_payload: u8,
}

impl BatteryVendorTable {
    /// Table for the common battery backup unit.
    pub const STANDARD: Self = Self {
        vendor: "standard-bbu",
        fault_clear_payload: 0x00,
    };
}

impl Default for BatteryVendorTable {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Capability tag of a PSU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsuVariant {
    /// PSU without energy storage.
    Basic,
    /// PSU with an attached battery backup unit.
    Battery(BatteryVendorTable),
}

impl PsuVariant {
    /// True for battery-backed units.
    #[must_use]
    pub fn has_battery(&self) -> bool {
        matches!(self, Self::Battery(_))
    }

    /// Vendor table of a battery-backed unit.
    #[must_use]
    pub fn battery_table(&self) -> Option<&BatteryVendorTable> {
        match self {
            Self::Battery(table) => Some(table),
            Self::Basic => None,
        }
    }
}

/// Decoded STATUS_WORD read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsuStatus {
    /// Raw status word.
    pub word: StatusWord,
    /// Output state.
    pub state: PowerState,
    /// Any status bit set.
    pub fault_present: bool,
}

impl PsuStatus {
    /// Decode a raw status word.
    #[must_use]
    pub fn from_word(word: StatusWord) -> Self {
        Self {
            word,
            state: word.power_state(),
            fault_present: word.fault_present(),
        }
    }

    /// Output is on and power good.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.state == PowerState::On
    }
}

/// Detailed status registers, each `None` when its read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaultStatusRegisters {
    /// STATUS_VOUT.
    pub vout: Option<u8>,
    /// STATUS_IOUT.
    pub iout: Option<u8>,
    /// STATUS_INPUT.
    pub input: Option<u8>,
    /// STATUS_TEMPERATURE.
    pub temperature: Option<u8>,
    /// STATUS_CML.
    pub cml: Option<u8>,
    /// STATUS_FANS_1_2.
    pub fans_1_2: Option<u8>,
}

impl FaultStatusRegisters {
    /// Number of registers that could be read.
    #[must_use]
    pub fn readable(&self) -> usize {
        [
            self.vout,
            self.iout,
            self.input,
            self.temperature,
            self.cml,
            self.fans_1_2,
        ]
        .iter()
        .flatten()
        .count()
    }
}

impl fmt::Display for FaultStatusRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("vout", self.vout),
            ("iout", self.iout),
            ("input", self.input),
            ("temperature", self.temperature),
            ("cml", self.cml),
            ("fans_1_2", self.fans_1_2),
        ];
        let mut first = true;
        for (name, value) in fields {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match value {
                Some(v) => write!(f, "{name}={v:#04x}")?,
                None => write!(f, "{name}=?")?,
            }
        }
        Ok(())
    }
}

/// Operations shared by every PSU variant.
pub trait PowerSupply: Send + Sync + fmt::Debug {
    /// Slot id.
    fn id(&self) -> PsuId;

    /// Capability tag.
    fn variant(&self) -> &PsuVariant;

    /// Issue a read and return the raw response bytes.
    ///
    /// # Errors
    ///
    /// Fails on a non-success completion code or a response shorter than the
    /// command table requires.
    fn raw_read(&self, command: PmBusCommand) -> PsuResult<Vec<u8>>;

    /// Issue a write of `payload`.
    ///
    /// # Errors
    ///
    /// Fails on a non-success completion code.
    fn raw_write(&self, command: PmBusCommand, payload: &[u8]) -> PsuResult<()>;

    /// Turn the output on or off.
    ///
    /// Turning on is unconditional. Turning off is accepted at most once per
    /// backoff window; the check and the stamp happen under one lock.
    ///
    /// # Errors
    ///
    /// Returns [`PsuError::PowerOffBackoff`] inside the window, without
    /// touching the bus, or a transaction error.
    fn set_power(&self, on: bool) -> PsuResult<()>;

    /// Read and decode STATUS_WORD.
    ///
    /// # Errors
    ///
    /// Fails when the read fails.
    fn status(&self) -> PsuResult<PsuStatus> {
        let bytes = read_array::<2, _>(self, PmBusCommand::StatusWord)?;
        Ok(PsuStatus::from_word(StatusWord::from_bytes(bytes)))
    }

    /// MFR_MODEL as text.
    ///
    /// # Errors
    ///
    /// Fails when the read fails or the block is not ASCII.
    fn model(&self) -> PsuResult<String> {
        read_ascii(self, PmBusCommand::MfrModel)
    }

    /// MFR_SERIAL as text.
    ///
    /// # Errors
    ///
    /// Fails when the read fails or the block is not ASCII.
    fn serial(&self) -> PsuResult<String> {
        read_ascii(self, PmBusCommand::MfrSerial)
    }

    /// MFR_REVISION as text.
    ///
    /// # Errors
    ///
    /// Fails when the read fails or the block is not ASCII.
    fn firmware_revision(&self) -> PsuResult<String> {
        read_ascii(self, PmBusCommand::MfrRevision)
    }

    /// Output power in watts.
    ///
    /// # Errors
    ///
    /// Fails when the read fails.
    fn power_output(&self) -> PsuResult<i32> {
        read_array::<2, _>(self, PmBusCommand::ReadPout).map(decode_linear)
    }

    /// CLEAR_FAULTS.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    fn clear_faults(&self) -> PsuResult<()> {
        self.raw_write(PmBusCommand::ClearFaults, &[])
    }

    /// Best-effort dump of the detailed status registers.
    fn fault_status_registers(&self) -> FaultStatusRegisters {
        let byte = |command| read_array::<1, _>(self, command).ok().map(|[b]| b);
        FaultStatusRegisters {
            vout: byte(PmBusCommand::StatusVout),
            iout: byte(PmBusCommand::StatusIout),
            input: byte(PmBusCommand::StatusInput),
            temperature: byte(PmBusCommand::StatusTemperature),
            cml: byte(PmBusCommand::StatusCml),
            fans_1_2: byte(PmBusCommand::StatusFans12),
        }
    }

    /// Battery extended operation mode byte.
    ///
    /// # Errors
    ///
    /// Not supported on basic units; otherwise fails when the read fails.
    fn extended_operation_mode(&self) -> PsuResult<u8> {
        require_battery(self, "extended_operation_mode")?;
        read_array::<1, _>(self, PmBusCommand::ExtendedOperationMode).map(|[b]| b)
    }

    /// Set the battery extended operation mode.
    ///
    /// # Errors
    ///
    /// Not supported on basic units; otherwise fails when the write fails.
    fn set_extended_operation_mode(&self, mode: u8) -> PsuResult<()> {
        require_battery(self, "set_extended_operation_mode")?;
        self.raw_write(PmBusCommand::ExtendedOperationMode, &[mode])
    }

    /// Battery fault indicator.
    ///
    /// # Errors
    ///
    /// Not supported on basic units; otherwise fails when the read fails.
    fn battery_faults(&self) -> PsuResult<BatteryFaults> {
        require_battery(self, "battery_faults")?;
        read_array::<1, _>(self, PmBusCommand::BatteryFaultIndicator)
            .map(|[b]| BatteryFaults::from_bits_truncate(b))
    }

    /// Clear the battery fault indicator.
    ///
    /// # Errors
    ///
    /// Not supported on basic units; otherwise fails when the write fails.
    fn clear_battery_faults(&self) -> PsuResult<()> {
        let table = require_battery(self, "clear_battery_faults")?;
        self.raw_write(
            PmBusCommand::BatteryFaultIndicator,
            &[table.fault_clear_payload],
        )
    }

    /// Battery health status word.
    ///
    /// # Errors
    ///
    /// Not supported on basic units; otherwise fails when the read fails.
    fn battery_health(&self) -> PsuResult<BatteryHealth> {
        require_battery(self, "battery_health")?;
        read_array::<2, _>(self, PmBusCommand::BatteryHealthStatus).map(BatteryHealth::from_bytes)
    }

    /// Battery charge level in percent.
    ///
    /// # Errors
    ///
    /// Not supported on basic units; otherwise fails when the read fails.
    fn battery_charge_level(&self) -> PsuResult<i32> {
        require_battery(self, "battery_charge_level")?;
        read_array::<2, _>(self, PmBusCommand::BatteryChargeLevel).map(decode_linear)
    }

    /// Battery output power in watts.
    ///
    /// # Errors
    ///
    /// Not supported on basic units; otherwise fails when the read fails.
    fn battery_power_output(&self) -> PsuResult<i32> {
        require_battery(self, "battery_power_output")?;
        read_array::<2, _>(self, PmBusCommand::BatteryPowerOutput).map(decode_linear)
    }

    /// Battery firmware revision as text.
    ///
    /// # Errors
    ///
    /// Not supported on basic units; otherwise fails when the read fails.
    fn battery_firmware_revision(&self) -> PsuResult<String> {
        require_battery(self, "battery_firmware_revision")?;
        read_ascii(self, PmBusCommand::BatteryFirmwareRevision)
    }

    /// Composite battery read: power output, charge level, fault indicator.
    ///
    /// The fault indicator is cleared afterwards whatever the outcome; it
    /// re-asserts if the condition persists. A failed sub-read marks the
    /// report failed but keeps everything that was read.
    fn battery_status(&self) -> BatteryStatusReport {
        if let Err(err) = require_battery(self, "battery_status") {
            return BatteryStatusReport::failed(err.completion_code());
        }

        let mut report = BatteryStatusReport::new(BatteryStatus::default());
        match self.battery_power_output() {
            Ok(watts) => report.status.power_output_w = Some(watts),
            Err(err) => report.record_failure(&err),
        }
        match self.battery_charge_level() {
            Ok(level) => report.status.charge_level = Some(level),
            Err(err) => report.record_failure(&err),
        }
        match self.battery_faults() {
            Ok(faults) => report.status.faults = Some(faults),
            Err(err) => report.record_failure(&err),
        }
        if let Err(err) = self.clear_battery_faults() {
            warn!(psu_id = %self.id(), error = %err, "Failed to clear battery fault indicator");
        }
        report
    }
}

fn require_battery<P: PowerSupply + ?Sized>(
    psu: &P,
    operation: &'static str,
) -> PsuResult<BatteryVendorTable> {
    psu.variant()
        .battery_table()
        .copied()
        .ok_or_else(|| PsuError::not_supported(psu.id().get(), operation))
}

fn read_array<const N: usize, P: PowerSupply + ?Sized>(
    psu: &P,
    command: PmBusCommand,
) -> PsuResult<[u8; N]> {
    let data = psu.raw_read(command)?;
    data.get(..N)
        .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
        .ok_or_else(|| {
            PsuError::decode(
                psu.id().get(),
                command,
                PmBusError::short_response(command.name(), N, data.len()),
            )
        })
}

fn read_ascii<P: PowerSupply + ?Sized>(psu: &P, command: PmBusCommand) -> PsuResult<String> {
    let data = psu.raw_read(command)?;
    decode_ascii_block(&data).map_err(|source| PsuError::decode(psu.id().get(), command, source))
}

/// A PSU reached through the chassis bus.
pub struct Psu {
    id: PsuId,
    variant: PsuVariant,
    transport: Arc<dyn BusTransport>,
    power_off_backoff: Duration,
    last_power_off: Mutex<Option<Instant>>,
}

impl Psu {
    /// Create a PSU on `transport`.
    #[must_use]
    pub fn new(id: PsuId, variant: PsuVariant, transport: Arc<dyn BusTransport>) -> Self {
        Self {
            id,
            variant,
            transport,
            power_off_backoff: DEFAULT_POWER_OFF_BACKOFF,
            last_power_off: Mutex::new(None),
        }
    }

    /// Override the power-off backoff window.
    #[must_use]
    pub fn with_power_off_backoff(mut self, backoff: Duration) -> Self {
        self.power_off_backoff = backoff;
        self
    }

    /// Current power-off backoff window.
    #[must_use]
    pub fn power_off_backoff(&self) -> Duration {
        self.power_off_backoff
    }

    fn send(&self, request: &BusRequest) -> (CompletionCode, Vec<u8>) {
        let response = self
            .transport
            .send_receive(DeviceKind::Psu, self.id.get(), request);
        (response.code(), response.data)
    }
}

impl fmt::Debug for Psu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Psu")
            .field("id", &self.id)
            .field("variant", &self.variant)
            .field("power_off_backoff", &self.power_off_backoff)
            .finish_non_exhaustive()
    }
}

impl PowerSupply for Psu {
    fn id(&self) -> PsuId {
        self.id
    }

    fn variant(&self) -> &PsuVariant {
        &self.variant
    }

    fn raw_read(&self, command: PmBusCommand) -> PsuResult<Vec<u8>> {
        let (code, data) = self.send(&BusRequest::read(command));
        if !code.is_success() {
            debug!(psu_id = %self.id, command = %command, code = %code, "Read failed");
            return Err(PsuError::transaction(
                self.id.get(),
                command,
                Direction::Read,
                code,
            ));
        }
        let expected = if command.is_block_read() {
            1
        } else {
            usize::from(command.response_length())
        };
        if data.len() < expected {
            return Err(PsuError::decode(
                self.id.get(),
                command,
                PmBusError::short_response(command.name(), expected, data.len()),
            ));
        }
        Ok(data)
    }

    fn raw_write(&self, command: PmBusCommand, payload: &[u8]) -> PsuResult<()> {
        let (code, _) = self.send(&BusRequest::write(command, payload));
        if code.is_success() {
            Ok(())
        } else {
            debug!(psu_id = %self.id, command = %command, code = %code, "Write failed");
            Err(PsuError::transaction(
                self.id.get(),
                command,
                Direction::Write,
                code,
            ))
        }
    }

    fn set_power(&self, on: bool) -> PsuResult<()> {
        if on {
            return self.raw_write(PmBusCommand::Operation, &[OPERATION_ON]);
        }

        let mut last_off = self.last_power_off.lock();
        let now = Instant::now();
        if let Some(previous) = *last_off {
            let elapsed = now.saturating_duration_since(previous);
            if elapsed <= self.power_off_backoff {
                let remaining = self.power_off_backoff.saturating_sub(elapsed);
                debug!(psu_id = %self.id, ?remaining, "Power-off inside backoff window");
                return Err(PsuError::PowerOffBackoff {
                    psu_id: self.id.get(),
                    remaining,
                });
            }
        }
        self.raw_write(PmBusCommand::Operation, &[OPERATION_OFF])?;
        *last_off = Some(now);
        Ok(())
    }
}
