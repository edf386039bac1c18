//! Block-read helpers.

use crate::error::{PmBusError, PmBusResult};

/// Drop the leading count byte of a block read.
///
/// An empty response yields an empty slice.
#[must_use]
pub fn strip_length_prefix(bytes: &[u8]) -> &[u8] {
    bytes.get(1..).unwrap_or_default()
}

/// Decode a block read as ASCII text.
///
/// The count byte is stripped and trailing NUL padding and whitespace are
/// trimmed. Devices pad short strings with NULs inside a fixed-size block.
///
/// # Errors
///
/// Returns [`PmBusError::InvalidAscii`] if a byte outside the ASCII range
/// remains after stripping.
pub fn decode_ascii_block(bytes: &[u8]) -> PmBusResult<String> {
    let body = strip_length_prefix(bytes);
    if !body.is_ascii() {
        return Err(PmBusError::InvalidAscii);
    }
    let text: String = body.iter().map(|b| char::from(*b)).collect();
    Ok(text
        .trim_end_matches(|c: char| c == '\0' || c.is_ascii_whitespace())
        .to_string())
}
