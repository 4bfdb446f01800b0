//! Drive object: key custody, file creation, nonce allocation.

use std::sync::Arc;

use uuid::Uuid;

use driftvault_common::{AuthId, DriveId, Error, Result};
use driftvault_crypto::keys::{CipherKey, HashKey};
use driftvault_crypto::nonce::{self, NONCE_SIZE};
use driftvault_crypto::provider::ProviderKind;
use driftvault_crypto::store::RandomAccessStore;
use driftvault_crypto::stream::EncryptedStream;
use driftvault_sequence::NonceSequencer;
use driftvault_storage::StorageEntry;

use crate::config::DriveMeta;

/// Directory holding encrypted file containers inside a drive root.
pub const FILES_DIR: &str = "files";

/// Callback that obtains a freshly authorized nonce range for a drive.
///
/// Invoked at most once per allocation when the current range is exhausted;
/// returns the new `(start, max)` pair. Without a handler, exhaustion
/// surfaces as `RangeExceeded`.
pub type AuthorizationHandler =
    Box<dyn Fn(&DriveId, &AuthId) -> Result<([u8; NONCE_SIZE], [u8; NONCE_SIZE])> + Send + Sync>;

/// Open mode for vault files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
}

struct DriveKeys {
    cipher: CipherKey,
    hash: Option<HashKey>,
}

/// An unlocked (or locked) vault over a storage root.
///
/// Holds the cipher and hash keys while unlocked; `lock` drops them, and the
/// key types zeroize their material on drop. The drive never logs or
/// persists key bytes.
pub struct Drive {
    root: Box<dyn StorageEntry>,
    meta: DriveMeta,
    keys: Option<DriveKeys>,
    sequencer: Arc<dyn NonceSequencer>,
    authorization: Option<AuthorizationHandler>,
}

impl std::fmt::Debug for Drive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drive")
            .field("drive_id", &self.meta.drive_id)
            .field("locked", &self.keys.is_none())
            .finish_non_exhaustive()
    }
}

impl Drive {
    /// Create a new drive under `root` and register its nonce sequence.
    ///
    /// The initial authorized range spans the full nonce space; deployments
    /// that split ranges across devices shrink it via the sequencer.
    ///
    /// # Errors
    /// - `InvalidInput` if `root` already holds a drive, or a chunked
    ///   configuration comes without a hash key
    pub fn create(
        root: Box<dyn StorageEntry>,
        cipher_key: CipherKey,
        hash_key: Option<HashKey>,
        sequencer: Arc<dyn NonceSequencer>,
        provider: ProviderKind,
        chunk_size: u32,
    ) -> Result<Self> {
        if root.child(crate::config::META_FILE)?.exists() {
            return Err(Error::InvalidInput(
                "Storage root already holds a vault".to_string(),
            ));
        }
        if chunk_size > 0 && hash_key.is_none() {
            return Err(Error::InvalidInput(
                "Chunked drives require an integrity key".to_string(),
            ));
        }

        let drive_id = DriveId::new(Uuid::new_v4().to_string())?;
        let auth_id = AuthId::new(Uuid::new_v4().to_string())?;

        root.create_dir()?;
        root.child(FILES_DIR)?.create_dir()?;
        let meta = DriveMeta::new(drive_id.clone(), auth_id.clone(), provider, chunk_size);
        meta.save(root.as_ref())?;

        sequencer.create_sequence(&drive_id, &auth_id)?;
        sequencer.initialize_sequence(
            &drive_id,
            &auth_id,
            nonce::from_u64(1),
            nonce::from_u64(u64::MAX),
        )?;
        tracing::info!(drive = %drive_id, "vault created");

        Ok(Self {
            root,
            meta,
            keys: Some(DriveKeys {
                cipher: cipher_key,
                hash: hash_key,
            }),
            sequencer,
            authorization: None,
        })
    }

    /// Open an existing drive.
    ///
    /// The key material is taken on trust here; a wrong key surfaces as
    /// `Integrity` on the first chunked read.
    pub fn open(
        root: Box<dyn StorageEntry>,
        cipher_key: CipherKey,
        hash_key: Option<HashKey>,
        sequencer: Arc<dyn NonceSequencer>,
    ) -> Result<Self> {
        let meta = DriveMeta::load(root.as_ref())?;
        if meta.chunk_size > 0 && hash_key.is_none() {
            return Err(Error::InvalidInput(
                "This vault uses integrity tags and requires the hash key".to_string(),
            ));
        }
        Ok(Self {
            root,
            meta,
            keys: Some(DriveKeys {
                cipher: cipher_key,
                hash: hash_key,
            }),
            sequencer,
            authorization: None,
        })
    }

    /// Install the range-renewal callback.
    pub fn with_authorization(mut self, handler: AuthorizationHandler) -> Self {
        self.authorization = Some(handler);
        self
    }

    pub fn drive_id(&self) -> &DriveId {
        &self.meta.drive_id
    }

    pub fn meta(&self) -> &DriveMeta {
        &self.meta
    }

    /// Whether the key material has been dropped.
    pub fn is_locked(&self) -> bool {
        self.keys.is_none()
    }

    /// Drop the key material. Further file operations fail until the drive
    /// is reopened with keys.
    pub fn lock(&mut self) {
        self.keys = None;
        tracing::info!(drive = %self.meta.drive_id, "vault locked");
    }

    fn keys(&self) -> Result<&DriveKeys> {
        self.keys
            .as_ref()
            .ok_or_else(|| Error::NotPermitted("Vault is locked".to_string()))
    }

    fn files_dir(&self) -> Result<Box<dyn StorageEntry>> {
        self.root.child(FILES_DIR)
    }

    /// Allocate a nonce, renewing the authorized range through the callback
    /// at most once when the sequencer reports exhaustion.
    fn allocate_nonce(&self) -> Result<[u8; NONCE_SIZE]> {
        let drive_id = &self.meta.drive_id;
        match self.sequencer.next_nonce(drive_id) {
            Ok(nonce) => Ok(nonce),
            Err(Error::RangeExceeded(reason)) => {
                let handler = match self.authorization.as_ref() {
                    Some(handler) => handler,
                    None => return Err(Error::RangeExceeded(reason)),
                };
                tracing::warn!(drive = %drive_id, "nonce range exhausted, requesting renewal");
                let (start, max) = handler(drive_id, &self.meta.auth_id)?;
                self.sequencer
                    .initialize_sequence(drive_id, &self.meta.auth_id, start, max)?;
                self.sequencer.next_nonce(drive_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Create an encrypted file, consuming one nonce.
    ///
    /// # Errors
    /// - `NotPermitted` on a locked drive
    /// - `RangeExceeded` when the nonce range is exhausted and no handler
    ///   (or a failing one) is installed
    pub fn create_file(
        &self,
        name: &str,
    ) -> Result<EncryptedStream<Box<dyn RandomAccessStore>>> {
        let keys = self.keys()?;
        let nonce = self.allocate_nonce()?;
        let entry = self.files_dir()?.child(name)?;
        let store = entry.create()?;
        tracing::debug!(drive = %self.meta.drive_id, file = name, "file created");
        EncryptedStream::create(
            store,
            keys.cipher.clone(),
            keys.hash.clone(),
            nonce,
            self.meta.chunk_size,
            self.meta.provider,
        )
    }

    /// Open an existing encrypted file.
    ///
    /// # Errors
    /// - `NotFound` if no such file exists
    /// - `NotPermitted` on a locked drive
    pub fn open_file(
        &self,
        name: &str,
        mode: FileMode,
    ) -> Result<EncryptedStream<Box<dyn RandomAccessStore>>> {
        let keys = self.keys()?;
        let entry = self.files_dir()?.child(name)?;
        if !entry.exists() {
            return Err(Error::NotFound(format!("No file named {:?} in vault", name)));
        }
        match mode {
            FileMode::Read => EncryptedStream::open_read(
                entry.open_read()?,
                keys.cipher.clone(),
                keys.hash.clone(),
                self.meta.provider,
            ),
            FileMode::Write => EncryptedStream::open_write(
                entry.open_write()?,
                keys.cipher.clone(),
                keys.hash.clone(),
                self.meta.provider,
            ),
        }
    }

    /// Whether the vault holds a file with this name.
    pub fn has_file(&self, name: &str) -> Result<bool> {
        Ok(self.files_dir()?.child(name)?.exists())
    }

    /// Names of all files in the vault, sorted.
    pub fn list_files(&self) -> Result<Vec<String>> {
        Ok(self
            .files_dir()?
            .list()?
            .iter()
            .map(|e| e.name())
            .collect())
    }

    /// Remove a file container. The consumed nonce stays burned.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let entry = self.files_dir()?.child(name)?;
        if !entry.exists() {
            return Err(Error::NotFound(format!("No file named {:?} in vault", name)));
        }
        entry.delete()
    }

    /// Permanently revoke this drive's nonce sequence. Existing files stay
    /// readable; no new files can ever be created.
    pub fn revoke(&self) -> Result<()> {
        self.sequencer.revoke_sequence(&self.meta.drive_id)?;
        tracing::warn!(drive = %self.meta.drive_id, "vault sequence revoked");
        Ok(())
    }

    /// Current sequence state, if the sequencer knows this drive.
    pub fn sequence_status(&self) -> Result<Option<driftvault_sequence::NonceSequence>> {
        self.sequencer.get_sequence(&self.meta.drive_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftvault_sequence::FileSequencer;
    use driftvault_storage::LocalEntry;
    use std::io::SeekFrom;
    use tempfile::TempDir;

    fn keys() -> (CipherKey, HashKey) {
        (
            CipherKey::from_bytes([0x66u8; 32]),
            HashKey::from_bytes([0x77u8; 32]),
        )
    }

    fn new_drive(dir: &TempDir) -> Drive {
        let (cipher, hash) = keys();
        let sequencer =
            Arc::new(FileSequencer::open(dir.path().join("sequences.xml")).unwrap());
        Drive::create(
            Box::new(LocalEntry::new(dir.path().join("vault"))),
            cipher,
            Some(hash),
            sequencer,
            ProviderKind::Accelerated,
            64,
        )
        .unwrap()
    }

    #[test]
    fn test_create_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let drive = new_drive(&dir);

        let data: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
        let mut stream = drive.create_file("doc.bin").unwrap();
        stream.write(&data).unwrap();
        stream.flush().unwrap();
        drop(stream);

        let mut stream = drive.open_file("doc.bin", FileMode::Read).unwrap();
        let mut out = vec![0u8; data.len()];
        assert_eq!(stream.read(&mut out).unwrap(), data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn test_each_file_gets_a_fresh_nonce() {
        let dir = TempDir::new().unwrap();
        let drive = new_drive(&dir);

        let a = drive.create_file("a").unwrap();
        let b = drive.create_file("b").unwrap();
        assert_ne!(a.nonce(), b.nonce());
    }

    #[test]
    fn test_locked_drive_rejects_file_operations() {
        let dir = TempDir::new().unwrap();
        let mut drive = new_drive(&dir);
        drive.create_file("a").unwrap();

        drive.lock();
        assert!(drive.is_locked());
        assert!(matches!(
            drive.create_file("b"),
            Err(Error::NotPermitted(_))
        ));
        assert!(matches!(
            drive.open_file("a", FileMode::Read),
            Err(Error::NotPermitted(_))
        ));
    }

    #[test]
    fn test_reopen_existing_drive() {
        let dir = TempDir::new().unwrap();
        let (cipher, hash) = keys();
        {
            let drive = new_drive(&dir);
            let mut stream = drive.create_file("kept.bin").unwrap();
            stream.write(b"persistent contents").unwrap();
            stream.flush().unwrap();
        }

        let sequencer =
            Arc::new(FileSequencer::open(dir.path().join("sequences.xml")).unwrap());
        let drive = Drive::open(
            Box::new(LocalEntry::new(dir.path().join("vault"))),
            cipher,
            Some(hash),
            sequencer,
        )
        .unwrap();

        let mut stream = drive.open_file("kept.bin", FileMode::Read).unwrap();
        let mut out = vec![0u8; 19];
        stream.read(&mut out).unwrap();
        assert_eq!(&out, b"persistent contents");
    }

    #[test]
    fn test_partial_update_of_existing_file() {
        let dir = TempDir::new().unwrap();
        let drive = new_drive(&dir);

        let mut stream = drive.create_file("doc").unwrap();
        stream.write(&[0xAA; 128]).unwrap();
        stream.flush().unwrap();
        drop(stream);

        let mut stream = drive.open_file("doc", FileMode::Write).unwrap();
        stream.seek(SeekFrom::Start(60)).unwrap();
        stream.write(&[0xBB; 10]).unwrap();
        stream.flush().unwrap();
        drop(stream);

        let mut stream = drive.open_file("doc", FileMode::Read).unwrap();
        let mut out = vec![0u8; 128];
        stream.read(&mut out).unwrap();
        let mut expected = [0xAAu8; 128];
        expected[60..70].fill(0xBB);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_authorization_handler_renews_exhausted_range() {
        let dir = TempDir::new().unwrap();
        let (cipher, hash) = keys();
        let sequencer =
            Arc::new(FileSequencer::open(dir.path().join("sequences.xml")).unwrap());
        let drive = Drive::create(
            Box::new(LocalEntry::new(dir.path().join("vault"))),
            cipher,
            Some(hash),
            sequencer.clone(),
            ProviderKind::Accelerated,
            64,
        )
        .unwrap();
        // shrink to two remaining nonces
        sequencer
            .set_max_nonce(drive.drive_id(), driftvault_crypto::nonce::from_u64(3))
            .unwrap();

        let drive = drive.with_authorization(Box::new(|_, _| {
            Ok((
                driftvault_crypto::nonce::from_u64(3),
                driftvault_crypto::nonce::from_u64(100),
            ))
        }));

        drive.create_file("a").unwrap();
        drive.create_file("b").unwrap();
        // range exhausted here; the handler renews and the call succeeds
        drive.create_file("c").unwrap();
    }

    #[test]
    fn test_exhaustion_without_handler_surfaces() {
        let dir = TempDir::new().unwrap();
        let (cipher, hash) = keys();
        let sequencer =
            Arc::new(FileSequencer::open(dir.path().join("sequences.xml")).unwrap());
        let drive = Drive::create(
            Box::new(LocalEntry::new(dir.path().join("vault"))),
            cipher,
            Some(hash),
            sequencer.clone(),
            ProviderKind::Accelerated,
            64,
        )
        .unwrap();
        sequencer
            .set_max_nonce(drive.drive_id(), driftvault_crypto::nonce::from_u64(2))
            .unwrap();

        drive.create_file("a").unwrap();
        assert!(matches!(
            drive.create_file("b"),
            Err(Error::RangeExceeded(_))
        ));
    }

    #[test]
    fn test_revoked_drive_cannot_create_files() {
        let dir = TempDir::new().unwrap();
        let drive = new_drive(&dir);

        drive.create_file("before").unwrap();
        drive.revoke().unwrap();
        assert!(matches!(
            drive.create_file("after"),
            Err(Error::SequenceRevoked(_))
        ));
        // existing files stay readable
        assert!(drive.open_file("before", FileMode::Read).is_ok());
    }

    #[test]
    fn test_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let drive = new_drive(&dir);

        drive.create_file("b").unwrap();
        drive.create_file("a").unwrap();
        assert_eq!(drive.list_files().unwrap(), vec!["a", "b"]);

        drive.delete_file("a").unwrap();
        assert!(!drive.has_file("a").unwrap());
        assert!(matches!(
            drive.delete_file("a"),
            Err(Error::NotFound(_))
        ));
    }
}
