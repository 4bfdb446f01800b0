//! Cryptographic core for DriftVault.
//!
//! This crate provides:
//! - AES-256-CTR block cipher providers with interchangeable backends
//! - Per-chunk HMAC-SHA256 integrity tags bound to chunk position
//! - The encrypted random-access stream (seekable reads and writes over an
//!   opaque byte store)
//! - Parallel bulk encryption/decryption over in-memory buffers
//! - Key types with automatic zeroization and nonce counter arithmetic
//!
//! # Security Guarantees
//! - Key material is zeroized on drop and never logged
//! - Integrity tags are verified in constant time before plaintext from a
//!   chunk is ever delivered
//! - Nonce uniqueness is the responsibility of the sequencer collaborator;
//!   this crate only consumes nonces it is handed

pub mod bulk;
pub mod header;
pub mod integrity;
pub mod keys;
pub mod nonce;
pub mod provider;
pub mod store;
pub mod stream;

pub use bulk::{Decryptor, EncryptionFormat, Encryptor};
pub use header::{FileHeader, FORMAT_VERSION, HEADER_SIZE};
pub use integrity::{Integrity, DEFAULT_CHUNK_SIZE, TAG_SIZE};
pub use keys::{CipherKey, HashKey, KEY_LENGTH};
pub use nonce::NONCE_SIZE;
pub use provider::{create_provider, BlockCipherProvider, ProviderKind, BLOCK_SIZE, COUNTER_SIZE};
pub use store::{MemoryStore, RandomAccessStore};
pub use stream::{EncryptedStream, StreamMode};
