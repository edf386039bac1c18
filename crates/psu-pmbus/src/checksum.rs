//! Frame checksums.
//!
//! Two flavours are in use on the PSU bus:
//!
//! - a two's-complement byte sum, stamped on manufacturer-specific payloads
//!   and on firmware image records
//! - the SMBus Packet Error Check (CRC-8, polynomial `x^8 + x^2 + x + 1`)

/// Two's-complement checksum: sum every byte modulo 256, then negate.
///
/// Appending the result to `payload` makes the whole frame sum to zero.
#[must_use]
pub fn twos_complement_checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

/// Returns true if `frame` (checksum byte included) sums to zero modulo 256.
#[must_use]
pub fn verify_twos_complement(frame: &[u8]) -> bool {
    frame.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) == 0
}

/// SMBus Packet Error Check over `bytes` (address byte first).
#[must_use]
pub fn pec(bytes: &[u8]) -> u8 {
    smbus_pec::pec(bytes)
}
