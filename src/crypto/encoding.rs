//! Canonical hex encoding used for every hash, key and signature that
//! crosses a component boundary.

use crate::error::LedgerError;

/// Lowercase hex, two characters per byte. Empty input gives an empty string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a hex string produced by [`bytes_to_hex`].
///
/// Odd-length input or a non-hex character is a caller error, reported as
/// [`LedgerError::InvalidInput`].
pub fn hex_to_bytes(value: &str) -> Result<Vec<u8>, LedgerError> {
    hex::decode(value).map_err(|e| LedgerError::InvalidInput(format!("Invalid hex '{}': {}", value, e)))
}
