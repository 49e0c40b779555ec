//! Address parsing and validation for EIP-55 checksummed EVM addresses

use crate::error::{Error, Result};
use alloy::primitives::Address;

/// Parse and validate a checksummed address
///
/// The input must be `0x` followed by 40 hex digits whose casing matches the
/// EIP-55 checksum. Lowercase or uppercase input is accepted only when that
/// casing is the checksum itself (e.g. addresses with few letters).
pub fn parse_address(address: &str) -> Result<Address> {
    let trimmed = address.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| Error::Address(format!("Address {trimmed:?} is missing the 0x prefix")))?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Address(format!(
            "Address {trimmed:?} is not 20 bytes of hex"
        )));
    }

    Address::parse_checksummed(trimmed, None)
        .map_err(|e| Error::Address(format!("Address {trimmed} failed checksum validation: {e}")))
}

/// Parse a recipient address; the zero address is never a valid recipient
pub fn parse_recipient(address: &str) -> Result<Address> {
    let parsed = parse_address(address)?;
    if parsed.is_zero() {
        return Err(Error::Address("Recipient is the zero address".to_string()));
    }
    Ok(parsed)
}

/// Validate an address without returning it
pub fn is_valid_address(address: &str) -> bool {
    parse_address(address).is_ok()
}

/// Render an address in its checksummed form
pub fn to_checksum(address: &Address) -> String {
    address.to_checksum(None)
}
