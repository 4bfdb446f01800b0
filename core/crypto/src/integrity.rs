//! Per-chunk integrity tags.
//!
//! Each ciphertext chunk is followed by an HMAC-SHA256 tag computed over the
//! chunk's starting counter block concatenated with the chunk's ciphertext.
//! Binding the counter into the tag pins every chunk to its position, so
//! chunks cannot be reordered or replayed from another offset or file.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use driftvault_common::{Error, Result};

use crate::keys::HashKey;
use crate::provider::{BLOCK_SIZE, COUNTER_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Integrity tag size in bytes (HMAC-SHA256).
pub const TAG_SIZE: usize = 32;

/// Default integrity chunk size (256 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 256 * 1024;

/// Maximum integrity chunk size (8 MiB).
pub const MAX_CHUNK_SIZE: u32 = 8 * 1024 * 1024;

/// Compute the tag for a ciphertext chunk at the given counter.
///
/// # Errors
/// - `Crypto` if the HMAC key is rejected (cannot happen for 32-byte keys)
pub fn compute_tag(
    key: &HashKey,
    counter: &[u8; COUNTER_SIZE],
    ciphertext: &[u8],
) -> Result<[u8; TAG_SIZE]> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Crypto(format!("HMAC init failed: {}", e)))?;
    mac.update(counter);
    mac.update(ciphertext);
    let out = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&out);
    Ok(tag)
}

/// Verify a chunk tag in constant time.
///
/// Returns `Ok(true)` on match, `Ok(false)` on mismatch.
pub fn verify_tag(
    key: &HashKey,
    counter: &[u8; COUNTER_SIZE],
    ciphertext: &[u8],
    expected: &[u8],
) -> Result<bool> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Crypto(format!("HMAC init failed: {}", e)))?;
    mac.update(counter);
    mac.update(ciphertext);
    Ok(mac.verify_slice(expected).is_ok())
}

/// Chunked-integrity configuration for a stream or bulk operation.
///
/// A chunk size of zero disables chunking entirely; the container then holds
/// plain CTR ciphertext with no tags.
pub struct Integrity {
    key: Option<HashKey>,
    chunk_size: u32,
}

impl Integrity {
    /// Create an integrity configuration.
    ///
    /// # Preconditions
    /// - `chunk_size` is zero, or a multiple of the AES block size no larger
    ///   than `MAX_CHUNK_SIZE`
    /// - a key is present whenever `chunk_size > 0` and verification is
    ///   wanted; a chunked container can still be read without a key (tags
    ///   are skipped, not verified)
    ///
    /// # Errors
    /// - `InvalidInput` for an out-of-range or misaligned chunk size
    pub fn new(chunk_size: u32, key: Option<HashKey>) -> Result<Self> {
        if chunk_size > 0
            && (chunk_size % BLOCK_SIZE as u32 != 0 || chunk_size > MAX_CHUNK_SIZE)
        {
            return Err(Error::InvalidInput(format!(
                "Invalid chunk size {}: must be a multiple of {} and at most {}",
                chunk_size, BLOCK_SIZE, MAX_CHUNK_SIZE
            )));
        }
        Ok(Self { key, chunk_size })
    }

    /// Disabled integrity (no chunking, no tags).
    pub fn disabled() -> Self {
        Self {
            key: None,
            chunk_size: 0,
        }
    }

    /// Whether chunk tags are present in the container layout.
    pub fn chunked(&self) -> bool {
        self.chunk_size > 0
    }

    /// Whether tags are actually verified/generated (chunked and keyed).
    pub fn enabled(&self) -> bool {
        self.chunked() && self.key.is_some()
    }

    /// The integrity chunk size, zero when disabled.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Bytes occupied by one tag in the container, zero when not chunked.
    pub fn tag_size(&self) -> usize {
        if self.chunked() {
            TAG_SIZE
        } else {
            0
        }
    }

    /// The hash key, if configured.
    pub fn key(&self) -> Option<&HashKey> {
        self.key.as_ref()
    }

    /// Compute the tag for a chunk.
    ///
    /// # Errors
    /// - `Crypto` if integrity is not keyed
    pub fn compute(&self, counter: &[u8; COUNTER_SIZE], ciphertext: &[u8]) -> Result<[u8; TAG_SIZE]> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::Crypto("Integrity key is missing".to_string()))?;
        compute_tag(key, counter, ciphertext)
    }

    /// Verify a chunk tag, failing with `Integrity` on mismatch.
    ///
    /// # Errors
    /// - `Integrity` if the tag does not match (tampered or corrupted data)
    pub fn verify(
        &self,
        counter: &[u8; COUNTER_SIZE],
        ciphertext: &[u8],
        expected: &[u8],
    ) -> Result<()> {
        let key = match self.key.as_ref() {
            Some(key) => key,
            // chunked container read without a key: skip verification
            None => return Ok(()),
        };
        if verify_tag(key, counter, ciphertext, expected)? {
            Ok(())
        } else {
            Err(Error::Integrity("Data corrupt or tampered".to_string()))
        }
    }
}
