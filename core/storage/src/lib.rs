//! Local filesystem storage for DriftVault.
//!
//! Implements the random-access store seam over regular files and a small
//! entry abstraction for navigating vault directories. Remote backends plug
//! in by implementing the same traits.

pub mod entry;
pub mod local;

pub use entry::{LocalEntry, StorageEntry};
pub use local::LocalStore;
