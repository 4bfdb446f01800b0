//! Drive metadata persistence.

use serde::{Deserialize, Serialize};

use driftvault_common::{AuthId, DriveId, Error, Result};
use driftvault_crypto::provider::ProviderKind;
use driftvault_storage::StorageEntry;

/// Metadata format version.
pub const META_VERSION: u32 = 1;

/// Name of the metadata file inside a drive root.
pub const META_FILE: &str = "vault.json";

/// Persisted, non-secret drive settings. Lives as pretty-printed JSON in the
/// drive root; key material never goes anywhere near this file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveMeta {
    pub version: u32,
    pub drive_id: DriveId,
    pub auth_id: AuthId,
    /// Cipher backend used for this drive's streams.
    #[serde(default)]
    pub provider: ProviderKind,
    /// Integrity chunk size for new files, zero disables tags.
    pub chunk_size: u32,
}

impl DriveMeta {
    pub fn new(drive_id: DriveId, auth_id: AuthId, provider: ProviderKind, chunk_size: u32) -> Self {
        Self {
            version: META_VERSION,
            drive_id,
            auth_id,
            provider,
            chunk_size,
        }
    }

    /// Load metadata from a drive root.
    ///
    /// # Errors
    /// - `NotFound` when the metadata file is missing (not a drive)
    /// - `Serialization` on malformed or version-incompatible contents
    pub fn load(root: &dyn StorageEntry) -> Result<Self> {
        let entry = root.child(META_FILE)?;
        if !entry.exists() {
            return Err(Error::NotFound(format!(
                "No {} found, not a vault root",
                META_FILE
            )));
        }
        let mut store = entry.open_read()?;
        let len = store.len()?;
        let mut buf = vec![0u8; len as usize];
        let n = store.read_at(0, &mut buf)?;
        buf.truncate(n);
        let meta: DriveMeta = serde_json::from_slice(&buf)
            .map_err(|e| Error::Serialization(format!("Invalid drive metadata: {}", e)))?;
        if meta.version != META_VERSION {
            return Err(Error::Serialization(format!(
                "Unsupported drive metadata version: {}",
                meta.version
            )));
        }
        Ok(meta)
    }

    /// Write metadata into a drive root.
    pub fn save(&self, root: &dyn StorageEntry) -> Result<()> {
        let contents = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Serialization(format!("Cannot encode drive metadata: {}", e)))?;
        let entry = root.child(META_FILE)?;
        let mut store = entry.create()?;
        store.write_at(0, &contents)?;
        store.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftvault_storage::LocalEntry;
    use tempfile::TempDir;

    fn sample() -> DriveMeta {
        DriveMeta::new(
            DriveId::new("drive-x").unwrap(),
            AuthId::new("auth-x").unwrap(),
            ProviderKind::Accelerated,
            256 * 1024,
        )
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let root = LocalEntry::new(dir.path());
        let meta = sample();
        meta.save(&root).unwrap();
        assert_eq!(DriveMeta::load(&root).unwrap(), meta);
    }

    #[test]
    fn test_missing_meta_is_not_found() {
        let dir = TempDir::new().unwrap();
        let root = LocalEntry::new(dir.path());
        assert!(matches!(DriveMeta::load(&root), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_garbage_meta_rejected() {
        let dir = TempDir::new().unwrap();
        let root = LocalEntry::new(dir.path());
        let entry = root.child(META_FILE).unwrap();
        let mut store = entry.create().unwrap();
        store.write_at(0, b"not json").unwrap();
        drop(store);
        assert!(matches!(
            DriveMeta::load(&root),
            Err(Error::Serialization(_))
        ));
    }
}
