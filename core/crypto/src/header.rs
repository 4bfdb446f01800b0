//! Encrypted container header.
//!
//! Every encrypted file starts with a fixed 16-byte header:
//!
//! ```text
//! [version:1][nonce:8][chunk_size:4 BE][reserved:3]
//! ```
//!
//! The header is immutable once written. A chunk size of zero means the
//! container carries no integrity chunking. Reserved bytes must be zero and
//! are rejected otherwise, keeping the format extensible without ambiguity.

use driftvault_common::{Error, Result};

use crate::nonce::NONCE_SIZE;
use crate::store::RandomAccessStore;

/// Container format version.
pub const FORMAT_VERSION: u8 = 1;

/// Serialized header length in bytes.
pub const HEADER_SIZE: usize = 16;

const RESERVED: usize = 3;

/// Parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version.
    pub version: u8,
    /// CTR starting counter for this file.
    pub nonce: [u8; NONCE_SIZE],
    /// Integrity chunk size, zero when chunking is disabled.
    pub chunk_size: u32,
}

impl FileHeader {
    /// Create a header for a new container.
    pub fn new(nonce: [u8; NONCE_SIZE], chunk_size: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            nonce,
            chunk_size,
        }
    }

    /// Serialize to the fixed wire layout.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.version;
        buf[1..1 + NONCE_SIZE].copy_from_slice(&self.nonce);
        buf[1 + NONCE_SIZE..1 + NONCE_SIZE + 4].copy_from_slice(&self.chunk_size.to_be_bytes());
        // remaining RESERVED bytes stay zero
        buf
    }

    /// Parse a header from its wire layout.
    ///
    /// # Errors
    /// - `InvalidInput` on short input, unknown version, or non-zero
    ///   reserved bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidInput(format!(
                "Header too short: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let version = bytes[0];
        if version != FORMAT_VERSION {
            return Err(Error::InvalidInput(format!(
                "Unsupported container version: {}",
                version
            )));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[1..1 + NONCE_SIZE]);
        let chunk_size = u32::from_be_bytes(
            bytes[1 + NONCE_SIZE..1 + NONCE_SIZE + 4]
                .try_into()
                .map_err(|_| Error::InvalidInput("Malformed header".to_string()))?,
        );
        if bytes[HEADER_SIZE - RESERVED..HEADER_SIZE].iter().any(|&b| b != 0) {
            return Err(Error::InvalidInput(
                "Reserved header bytes must be zero".to_string(),
            ));
        }
        Ok(Self {
            version,
            nonce,
            chunk_size,
        })
    }

    /// Write the header at the start of a store.
    pub fn write_to(&self, store: &mut dyn RandomAccessStore) -> Result<()> {
        store.write_at(0, &self.to_bytes())
    }

    /// Read and parse the header from the start of a store.
    ///
    /// # Errors
    /// - `InvalidInput` if the store is shorter than a header or malformed
    pub fn read_from(store: &mut dyn RandomAccessStore) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        let n = store.read_at(0, &mut buf)?;
        if n < HEADER_SIZE {
            return Err(Error::InvalidInput(
                "Container too short to hold a header".to_string(),
            ));
        }
        Self::from_bytes(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_header_round_trip() {
        let header = FileHeader::new([1, 2, 3, 4, 5, 6, 7, 8], 256 * 1024);
        let parsed = FileHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_wire_layout() {
        let header = FileHeader::new([0xAA; 8], 0x0102_0304);
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], FORMAT_VERSION);
        assert_eq!(&bytes[1..9], &[0xAA; 8]);
        assert_eq!(&bytes[9..13], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[13..16], &[0, 0, 0]);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = FileHeader::new([0u8; 8], 0).to_bytes();
        bytes[0] = 99;
        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_nonzero_reserved_rejected() {
        let mut bytes = FileHeader::new([0u8; 8], 0).to_bytes();
        bytes[HEADER_SIZE - 1] = 1;
        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_store_round_trip() {
        let mut store = MemoryStore::new();
        let header = FileHeader::new([7u8; 8], 4096);
        header.write_to(&mut store).unwrap();
        let parsed = FileHeader::read_from(&mut store).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_short_store_rejected() {
        let mut store = MemoryStore::from_vec(vec![FORMAT_VERSION, 0, 0]);
        assert!(FileHeader::read_from(&mut store).is_err());
    }
}
