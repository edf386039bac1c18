//! Completion codes reported by every bus transaction.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Result discriminator of a single device transaction.
///
/// `Success` is the only code under which payload fields may be interpreted.
/// Codes the transport reports that are not in this closed set decode to
/// [`CompletionCode::UnspecifiedError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompletionCode {
    /// Transaction completed.
    Success = 0x00,
    /// Device could not process the request right now.
    NodeBusy = 0xC0,
    /// Command not recognised.
    InvalidCommand = 0xC1,
    /// No response before the transport timeout.
    Timeout = 0xC3,
    /// Device ran out of buffer space.
    OutOfSpace = 0xC4,
    /// Request was truncated on the wire.
    RequestDataTruncated = 0xC6,
    /// Request length does not match the command.
    RequestDataLengthInvalid = 0xC7,
    /// A request parameter is out of range.
    ParameterOutOfRange = 0xC9,
    /// Device cannot return the requested number of bytes.
    CannotReturnRequestedDataBytes = 0xCA,
    /// Requested data is not present.
    RequestedDataNotPresent = 0xCB,
    /// A request field is invalid.
    InvalidDataFieldInRequest = 0xCC,
    /// Device did not provide a response.
    ResponseNotProvided = 0xCE,
    /// Command is valid but refused in the current state.
    CmdFailedNotSupportedInPresentState = 0xD5,
    /// Device reported a hardware failure.
    DeviceFailure = 0xE0,
    /// Local or unclassified failure.
    #[default]
    UnspecifiedError = 0xFF,
}

impl CompletionCode {
    /// Decode a raw completion byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Success,
            0xC0 => Self::NodeBusy,
            0xC1 => Self::InvalidCommand,
            0xC3 => Self::Timeout,
            0xC4 => Self::OutOfSpace,
            0xC6 => Self::RequestDataTruncated,
            0xC7 => Self::RequestDataLengthInvalid,
            0xC9 => Self::ParameterOutOfRange,
            0xCA => Self::CannotReturnRequestedDataBytes,
            0xCB => Self::RequestedDataNotPresent,
            0xCC => Self::InvalidDataFieldInRequest,
            0xCE => Self::ResponseNotProvided,
            0xD5 => Self::CmdFailedNotSupportedInPresentState,
            0xE0 => Self::DeviceFailure,
            _ => Self::UnspecifiedError,
        }
    }

    /// Raw wire value.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True only for [`CompletionCode::Success`].
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<u8> for CompletionCode {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl fmt::Display for CompletionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({:#04x})", self.as_u8())
    }
}
