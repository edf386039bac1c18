//! Device-mandated delays.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delays the bootloader needs between commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTimings {
    /// After the password: the PSU drops its output and starts the bootloader.
    pub bootloader_settle: Duration,
    /// After the model id: program memory erase.
    pub flash_erase: Duration,
    /// After every bootloader write.
    pub inter_command: Duration,
    /// After every `block_lines` data lines: internal flash page program.
    pub block_program: Duration,
    /// Data lines per flash block.
    pub block_lines: usize,
    /// Between `SetReadAddress` and `ReadImageData`.
    pub read_address_settle: Duration,
}

impl Default for UpdateTimings {
    fn default() -> Self {
        Self {
            bootloader_settle: Duration::from_secs(3),
            flash_erase: Duration::from_secs(2),
            inter_command: Duration::from_millis(20),
            block_program: Duration::from_millis(100),
            block_lines: 16,
            read_address_settle: Duration::from_millis(5),
        }
    }
}

impl UpdateTimings {
    /// No delays at all, for simulated devices.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            bootloader_settle: Duration::ZERO,
            flash_erase: Duration::ZERO,
            inter_command: Duration::ZERO,
            block_program: Duration::ZERO,
            block_lines: 16,
            read_address_settle: Duration::ZERO,
        }
    }
}

/// Sleep for `delay` unless it is zero.
pub(crate) fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
