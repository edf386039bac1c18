//! Convenience re-exports for common codec types.

pub use crate::block::{decode_ascii_block, strip_length_prefix};
pub use crate::checksum::{pec, twos_complement_checksum, verify_twos_complement};
pub use crate::commands::{PmBusCommand, expected_response_length};
pub use crate::completion::CompletionCode;
pub use crate::error::{PmBusError, PmBusResult};
pub use crate::linear::{decode_linear, decode_linear_f64, encode_linear};
pub use crate::status::{BatteryFaults, BatteryHealth, FirmwareDeviceStatus, PowerState, StatusWord};
