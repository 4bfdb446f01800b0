//! Nonce sequencing for DriftVault drives.
//!
//! Every encrypted file consumes a unique 8-byte nonce. A sequencer owns an
//! authorized, monotonically advancing nonce range per drive and persists it
//! durably before any nonce is handed out, so a crash can at worst burn
//! nonces, never reuse one.
//!
//! # Security Guarantees
//! - An allocated nonce is never returned twice, across process restarts
//!   included
//! - A revoked sequence never allocates again
//! - Exhaustion is a hard stop (`RangeExceeded`), not a wrap-around

pub mod sequence;
pub mod sequencer;
pub mod serializer;

pub use sequence::{NonceSequence, Status};
pub use sequencer::{FileSequencer, NonceSequencer};
pub use serializer::{SequenceSerializer, XmlSequenceSerializer};
