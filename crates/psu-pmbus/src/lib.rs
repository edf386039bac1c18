//! PmBus protocol codecs for rack power supplies.
//!
//! This crate is intentionally I/O-free. It provides the command table the
//! rest of the workspace speaks, the completion-code convention every bus
//! transaction reports, and pure functions for the payload formats:
//!
//! - [`commands`]: opcode and expected response length for every command
//! - [`completion`]: the one-byte transaction result discriminator
//! - [`linear`]: PMBus LINEAR11 decoding (5-bit exponent, 11-bit mantissa)
//! - [`checksum`]: two's-complement checksums and SMBus PEC
//! - [`block`]: block-read length prefix handling and ASCII decoding
//! - [`status`]: STATUS_WORD, battery and firmware-update status decoding
//!
//! Nothing here allocates shared state, so every function can be tested and
//! fuzzed without hardware.

#![deny(static_mut_refs)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod block;
pub mod checksum;
pub mod commands;
pub mod completion;
pub mod error;
pub mod linear;
pub mod prelude;
pub mod status;

pub use block::{decode_ascii_block, strip_length_prefix};
pub use checksum::{pec, twos_complement_checksum, verify_twos_complement};
pub use commands::{PmBusCommand, expected_response_length};
pub use completion::CompletionCode;
pub use error::{PmBusError, PmBusResult};
pub use linear::{decode_linear, decode_linear_f64, encode_linear};
pub use status::{
    BatteryFaults, BatteryHealth, FirmwareDeviceStatus, OPERATION_OFF, OPERATION_ON, PowerState,
    StatusWord,
};
