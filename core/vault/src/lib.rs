//! Drive layer: encrypted vaults over pluggable storage.
//!
//! A drive ties together the cipher core, the nonce sequencer, and a storage
//! root. It owns the key material while unlocked (zeroized on lock or drop)
//! and allocates one nonce per created file, renewing its authorized range
//! through an explicit callback when the range runs out.

pub mod config;
pub mod drive;
pub mod transfer;

pub use config::DriveMeta;
pub use drive::{AuthorizationHandler, Drive, FileMode};
pub use transfer::{export_file, import_file};
