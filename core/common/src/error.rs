//! Common error types for DriftVault.

use thiserror::Error;

/// Top-level error type for DriftVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The nonce range for a drive is exhausted. The caller must obtain a
    /// fresh authorized range before any further encryption.
    #[error("Nonce range exceeded: {0}")]
    RangeExceeded(String),

    /// A nonce sequence already exists for the drive.
    #[error("Sequence already exists: {0}")]
    SequenceExists(String),

    /// A sequence operation was attempted in the wrong state (protocol
    /// misuse, surfaced immediately).
    #[error("Invalid sequence state: {0}")]
    SequenceInvalidState(String),

    /// The sequence has been revoked and can never allocate again.
    #[error("Sequence revoked: {0}")]
    SequenceRevoked(String),

    /// Data failed integrity verification: tampered or corrupted.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Bad key or counter supplied to the cipher (precondition violation).
    #[error("Invalid cipher input: {0}")]
    InvalidCipherInput(String),

    /// I/O error propagated from the storage collaborator. Never retried
    /// by the core; retry policy belongs to the caller.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
