//! Nonce counter arithmetic.
//!
//! Nonces are 8-byte big-endian counters. A nonce seeds the high half of the
//! 16-byte AES-CTR counter block for exactly one encrypted file; reuse breaks
//! confidentiality, so all arithmetic here is strictly monotonic.

use driftvault_common::{Error, Result};

/// Nonce length in bytes (64-bit big-endian counter).
pub const NONCE_SIZE: usize = 8;

/// Decode a big-endian nonce to its integer value.
pub fn to_u64(nonce: &[u8; NONCE_SIZE]) -> u64 {
    u64::from_be_bytes(*nonce)
}

/// Encode an integer value as a big-endian nonce.
pub fn from_u64(value: u64) -> [u8; NONCE_SIZE] {
    value.to_be_bytes()
}

/// Return `nonce + 1`, validating against the exclusive upper bound.
///
/// # Errors
/// - `RangeExceeded` if the incremented value would pass `max_nonce`
pub fn increase(nonce: &[u8; NONCE_SIZE], max_nonce: &[u8; NONCE_SIZE]) -> Result<[u8; NONCE_SIZE]> {
    let value = to_u64(nonce);
    let max = to_u64(max_nonce);
    let next = value
        .checked_add(1)
        .ok_or_else(|| Error::RangeExceeded("Nonce counter overflow".to_string()))?;
    if next > max {
        return Err(Error::RangeExceeded(
            "Nonce range exhausted, re-authorization required".to_string(),
        ));
    }
    Ok(from_u64(next))
}
