//! Blocking bus transport interface.
//!
//! The chassis owns the physical bus. Every call is synchronous: the
//! transport returns once the device has answered or its own timeout fired.
//! Transport-level failures are reported through the completion byte, never
//! through a separate error channel.

use psu_pmbus::{CompletionCode, PmBusCommand};
use serde::{Deserialize, Serialize};

/// Class of device a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// A PSU slot, addressed by its 1-based id.
    Psu,
    /// The wired-OR alert line shared by all PSUs.
    PsuAlertLine,
}

/// A single outgoing transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRequest {
    /// Command opcode.
    pub command: u8,
    /// Payload bytes, including any checksum or PEC trailer.
    pub payload: Vec<u8>,
    /// Number of bytes the caller expects back.
    pub response_length: u8,
}

impl BusRequest {
    /// A read of `command` with its table response length.
    #[must_use]
    pub fn read(command: PmBusCommand) -> Self {
        Self {
            command: command.opcode(),
            payload: Vec::new(),
            response_length: command.response_length(),
        }
    }

    /// A write of `payload` to `command`.
    #[must_use]
    pub fn write(command: PmBusCommand, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command: command.opcode(),
            payload: payload.into(),
            response_length: 0,
        }
    }
}

/// The answer to a [`BusRequest`].
///
/// `data` is meaningful only when `completion_code` is zero.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BusResponse {
    /// Raw completion byte, zero on success.
    pub completion_code: u8,
    /// Response bytes.
    pub data: Vec<u8>,
}

impl BusResponse {
    /// Successful response carrying `data`.
    #[must_use]
    pub fn success(data: impl Into<Vec<u8>>) -> Self {
        Self {
            completion_code: 0,
            data: data.into(),
        }
    }

    /// Failed response with no data.
    #[must_use]
    pub fn failure(code: CompletionCode) -> Self {
        Self {
            completion_code: code.as_u8(),
            data: Vec::new(),
        }
    }

    /// Decoded completion code.
    #[must_use]
    pub fn code(&self) -> CompletionCode {
        CompletionCode::from_u8(self.completion_code)
    }
}

/// The chassis bus.
///
/// Implementations must be safe to call from the monitor thread and from
/// firmware update workers at the same time. Per-PSU serialization is the
/// caller's job.
pub trait BusTransport: Send + Sync {
    /// Send `request` to device `device_id` of class `kind` and wait for the answer.
    fn send_receive(&self, kind: DeviceKind, device_id: u8, request: &BusRequest) -> BusResponse;
}
