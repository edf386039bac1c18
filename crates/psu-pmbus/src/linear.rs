//! PMBus LINEAR11 data format.
//!
//! ```text
//!  byte1 (high)              byte0 (low)
//! ┌───────────┬───────┐     ┌───────────────┐
//! │ N[4:0]    │ Y[10:8]│     │ Y[7:0]        │
//! └───────────┴───────┘     └───────────────┘
//! value = Y × 2^N   (N and Y both two's complement)
//! ```

/// Decode a LINEAR11 word to a floating point value.
///
/// `bytes[0]` is the low byte, `bytes[1]` the high byte.
#[must_use]
pub fn decode_linear_f64(bytes: [u8; 2]) -> f64 {
    let (mantissa, exponent) = split(bytes);
    f64::from(mantissa) * 2f64.powi(exponent)
}

/// Decode a LINEAR11 word to the nearest integer, rounding half away from zero.
#[must_use]
pub fn decode_linear(bytes: [u8; 2]) -> i32 {
    let (mantissa, exponent) = split(bytes);
    if exponent >= 0 {
        // |Y| < 2^10 and N <= 15, so the product always fits.
        mantissa << exponent
    } else {
        #[allow(clippy::cast_possible_truncation, reason = "|Y × 2^N| < 2^10 for N < 0")]
        let rounded = decode_linear_f64(bytes).round() as i32;
        rounded
    }
}

/// Encode a mantissa/exponent pair as a LINEAR11 word (low byte first).
///
/// Values outside the 11-bit mantissa and 5-bit exponent ranges are truncated
/// to their low bits, exactly as the device would.
#[must_use]
pub fn encode_linear(mantissa: i16, exponent: i8) -> [u8; 2] {
    let n = u16::try_from(i16::from(exponent) & 0x1F).unwrap_or_default();
    let y = u16::try_from(mantissa & 0x07FF).unwrap_or_default();
    ((n << 11) | y).to_le_bytes()
}

/// Split a LINEAR11 word into its sign-extended mantissa and exponent.
fn split(bytes: [u8; 2]) -> (i32, i32) {
    let raw = i16::from_le_bytes(bytes);
    // Arithmetic shifts sign-extend both fields.
    let exponent = i32::from(raw >> 11);
    let mantissa = i32::from(raw.wrapping_shl(5) >> 5);
    (mantissa, exponent)
}
