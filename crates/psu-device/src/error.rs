//! Error types for device operations.
//!
//! Every error maps onto the completion-code convention through
//! [`PsuError::completion_code`], so callers that only speak completion codes
//! lose nothing.

use psu_pmbus::{CompletionCode, PmBusCommand, PmBusError};
use std::time::Duration;
use thiserror::Error;

/// Direction of a failed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// A read command.
    Read,
    /// A write command.
    Write,
}

/// Errors raised by PSU operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PsuError {
    /// The bus reported a non-success completion code.
    #[error("PSU {psu_id} {command} {direction:?} failed: {code}")]
    Transaction {
        /// PSU slot id.
        psu_id: u8,
        /// Command issued.
        command: PmBusCommand,
        /// Read or write.
        direction: Direction,
        /// Code reported by the bus.
        code: CompletionCode,
    },

    /// The transaction succeeded but its payload did not decode.
    #[error("PSU {psu_id} {command} returned undecodable data: {source}")]
    Decode {
        /// PSU slot id.
        psu_id: u8,
        /// Command issued.
        command: PmBusCommand,
        /// Codec failure.
        #[source]
        source: PmBusError,
    },

    /// The operation needs a capability this PSU variant lacks.
    #[error("PSU {psu_id} does not support {operation}")]
    NotSupported {
        /// PSU slot id.
        psu_id: u8,
        /// Operation name.
        operation: &'static str,
    },

    /// A power-off was requested inside the backoff window.
    #[error("PSU {psu_id} power-off rejected, backoff has {remaining:?} left")]
    PowerOffBackoff {
        /// PSU slot id.
        psu_id: u8,
        /// Time until the next power-off is accepted.
        remaining: Duration,
    },

    /// The alert line read failed.
    #[error("PSU alert line read failed: {0}")]
    AlertLine(CompletionCode),

    /// Registry construction found a PSU out of slot order.
    #[error("PSU registry slot {expected} holds PSU {found}")]
    RegistryOrder {
        /// Slot id expected at this position.
        expected: u8,
        /// Id of the PSU found there.
        found: u8,
    },

    /// A PSU id outside the registry was requested.
    #[error("Unknown PSU id {0}")]
    UnknownPsu(u8),
}

/// Result alias for device operations.
pub type PsuResult<T> = std::result::Result<T, PsuError>;

impl PsuError {
    /// Create a transaction error.
    #[must_use]
    pub fn transaction(
        psu_id: u8,
        command: PmBusCommand,
        direction: Direction,
        code: CompletionCode,
    ) -> Self {
        Self::Transaction {
            psu_id,
            command,
            direction,
            code,
        }
    }

    /// Create a decode error.
    #[must_use]
    pub fn decode(psu_id: u8, command: PmBusCommand, source: PmBusError) -> Self {
        Self::Decode {
            psu_id,
            command,
            source,
        }
    }

    /// Create a not-supported error.
    #[must_use]
    pub fn not_supported(psu_id: u8, operation: &'static str) -> Self {
        Self::NotSupported { psu_id, operation }
    }

    /// Completion code this error reports to code-only callers.
    ///
    /// Reads and local failures collapse to `UnspecifiedError`. Writes keep
    /// the device's code. Policy rejections use
    /// `CmdFailedNotSupportedInPresentState`.
    #[must_use]
    pub fn completion_code(&self) -> CompletionCode {
        match self {
            Self::Transaction {
                direction: Direction::Write,
                code,
                ..
            } => *code,
            Self::NotSupported { .. } | Self::PowerOffBackoff { .. } => {
                CompletionCode::CmdFailedNotSupportedInPresentState
            }
            Self::Transaction { .. }
            | Self::Decode { .. }
            | Self::AlertLine(_)
            | Self::RegistryOrder { .. }
            | Self::UnknownPsu(_) => CompletionCode::UnspecifiedError,
        }
    }

    /// True for the power-off backoff rejection.
    #[must_use]
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::PowerOffBackoff { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_failures_are_unspecified() {
        let err = PsuError::transaction(
            1,
            PmBusCommand::StatusWord,
            Direction::Read,
            CompletionCode::Timeout,
        );
        assert_eq!(err.completion_code(), CompletionCode::UnspecifiedError);
    }

    #[test]
    fn test_write_failures_keep_device_code() {
        let err = PsuError::transaction(
            2,
            PmBusCommand::Operation,
            Direction::Write,
            CompletionCode::NodeBusy,
        );
        assert_eq!(err.completion_code(), CompletionCode::NodeBusy);
    }

    #[test]
    fn test_policy_rejections() {
        let backoff = PsuError::PowerOffBackoff {
            psu_id: 1,
            remaining: Duration::from_secs(3),
        };
        assert!(backoff.is_policy_rejection());
        assert_eq!(
            backoff.completion_code(),
            CompletionCode::CmdFailedNotSupportedInPresentState
        );
        assert_eq!(
            PsuError::not_supported(1, "battery_health").completion_code(),
            CompletionCode::CmdFailedNotSupportedInPresentState
        );
    }

    #[test]
    fn test_display_names_psu_and_command() {
        let err = PsuError::decode(3, PmBusCommand::MfrModel, PmBusError::InvalidAscii);
        let msg = err.to_string();
        assert!(msg.contains("PSU 3"));
        assert!(msg.contains("MfrModel"));
    }
}
