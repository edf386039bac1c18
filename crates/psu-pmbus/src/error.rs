//! Error types for codec operations.

use thiserror::Error;

/// Errors raised while decoding PmBus payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PmBusError {
    /// The opcode is not part of the command table.
    #[error("Unsupported PmBus command: {0:#04x}")]
    UnsupportedCommand(u8),

    /// The response carried fewer bytes than the command requires.
    #[error("Short response for {command}: expected {expected} bytes, got {actual}")]
    ShortResponse {
        /// Command that was read.
        command: &'static str,
        /// Bytes the command requires.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },

    /// A checksum did not sum to zero over its covered range.
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed locally.
        expected: u8,
        /// Checksum carried by the frame.
        actual: u8,
    },

    /// A block read did not decode as printable ASCII.
    #[error("Block data is not ASCII")]
    InvalidAscii,
}

/// Result alias for codec operations.
pub type PmBusResult<T> = Result<T, PmBusError>;

impl PmBusError {
    /// Create a short response error.
    #[must_use]
    pub fn short_response(command: &'static str, expected: usize, actual: usize) -> Self {
        Self::ShortResponse {
            command,
            expected,
            actual,
        }
    }
}
