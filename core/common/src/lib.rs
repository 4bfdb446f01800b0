//! Common types shared across DriftVault crates.

pub mod cancel;
pub mod error;
pub mod types;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use types::{AuthId, DriveId};
