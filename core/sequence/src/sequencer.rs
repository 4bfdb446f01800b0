//! Durable nonce sequencer.
//!
//! The file sequencer keeps all sequences in memory under a mutex and writes
//! the whole map back through an atomic temp-file rename on every mutation.
//! The persisted state always runs ahead of what callers have seen: a nonce
//! is only returned after the advanced cursor has reached stable storage, so
//! a crash between persist and return burns a nonce instead of reusing it.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use driftvault_common::{AuthId, DriveId, Error, Result};
use driftvault_crypto::nonce::NONCE_SIZE;

use crate::sequence::NonceSequence;
use crate::serializer::{SequenceSerializer, XmlSequenceSerializer};

/// Allocates unique nonces per drive.
pub trait NonceSequencer: Send + Sync {
    /// Register a drive. The sequence starts in the `New` state.
    ///
    /// # Errors
    /// - `SequenceExists` if the drive is already registered
    fn create_sequence(&self, drive_id: &DriveId, auth_id: &AuthId) -> Result<()>;

    /// Authorize a nonce range for a drive, activating its sequence.
    fn initialize_sequence(
        &self,
        drive_id: &DriveId,
        auth_id: &AuthId,
        start_nonce: [u8; NONCE_SIZE],
        max_nonce: [u8; NONCE_SIZE],
    ) -> Result<()>;

    /// Lower the upper bound of a drive's active range (surrendering the
    /// tail, never growing it).
    fn set_max_nonce(&self, drive_id: &DriveId, max_nonce: [u8; NONCE_SIZE]) -> Result<()>;

    /// Allocate the next nonce for a drive.
    ///
    /// # Postconditions
    /// - The advanced cursor is durable before the nonce is returned
    ///
    /// # Errors
    /// - `RangeExceeded` once the authorized range is exhausted
    fn next_nonce(&self, drive_id: &DriveId) -> Result<[u8; NONCE_SIZE]>;

    /// Permanently revoke a drive's sequence.
    fn revoke_sequence(&self, drive_id: &DriveId) -> Result<()>;

    /// Look up the current sequence state for a drive.
    fn get_sequence(&self, drive_id: &DriveId) -> Result<Option<NonceSequence>>;
}

/// File-backed sequencer using an atomic write-rename persistence cycle.
pub struct FileSequencer<S: SequenceSerializer = XmlSequenceSerializer> {
    path: PathBuf,
    serializer: S,
    sequences: Mutex<HashMap<String, NonceSequence>>,
}

impl FileSequencer<XmlSequenceSerializer> {
    /// Open or create a sequencer file with the default XML format.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_serializer(path, XmlSequenceSerializer)
    }
}

impl<S: SequenceSerializer> FileSequencer<S> {
    /// Open or create a sequencer file with a custom format.
    pub fn with_serializer(path: impl Into<PathBuf>, serializer: S) -> Result<Self> {
        let path = path.into();
        let sequences = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serializer.deserialize(&contents)?
        } else {
            HashMap::new()
        };
        let sequencer = Self {
            path,
            serializer,
            sequences: Mutex::new(sequences),
        };
        sequencer.persist(&*sequencer.lock()?)?;
        Ok(sequencer)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, NonceSequence>>> {
        self.sequences
            .lock()
            .map_err(|_| Error::Storage("Sequencer state lock poisoned".to_string()))
    }

    /// Write the full map to a sibling temp file, fsync, and rename over the
    /// live file.
    fn persist(&self, sequences: &HashMap<String, NonceSequence>) -> Result<()> {
        let contents = self.serializer.serialize(sequences)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }

    /// Run `op` against one sequence, persisting before the result escapes.
    /// The in-memory entry is rolled back if persistence fails.
    fn mutate<T>(
        &self,
        drive_id: &DriveId,
        op: impl FnOnce(&mut NonceSequence) -> Result<T>,
    ) -> Result<T> {
        let mut sequences = self.lock()?;
        let entry = sequences
            .get_mut(drive_id.as_str())
            .ok_or_else(|| Error::NotFound(format!("No sequence for drive {}", drive_id)))?;
        let snapshot = entry.clone();
        let result = match op(entry) {
            Ok(result) => result,
            Err(e) => {
                *entry = snapshot;
                return Err(e);
            }
        };
        if let Err(e) = self.persist(&sequences) {
            if let Some(entry) = sequences.get_mut(drive_id.as_str()) {
                *entry = snapshot;
            }
            return Err(e);
        }
        Ok(result)
    }
}

impl<S: SequenceSerializer> NonceSequencer for FileSequencer<S> {
    fn create_sequence(&self, drive_id: &DriveId, auth_id: &AuthId) -> Result<()> {
        let mut sequences = self.lock()?;
        if sequences.contains_key(drive_id.as_str()) {
            return Err(Error::SequenceExists(drive_id.to_string()));
        }
        sequences.insert(
            drive_id.to_string(),
            NonceSequence::new(drive_id.clone(), auth_id.clone()),
        );
        if let Err(e) = self.persist(&sequences) {
            sequences.remove(drive_id.as_str());
            return Err(e);
        }
        tracing::info!(drive = %drive_id, "sequence registered");
        Ok(())
    }

    fn initialize_sequence(
        &self,
        drive_id: &DriveId,
        auth_id: &AuthId,
        start_nonce: [u8; NONCE_SIZE],
        max_nonce: [u8; NONCE_SIZE],
    ) -> Result<()> {
        self.mutate(drive_id, |seq| {
            seq.authorize(auth_id.clone(), start_nonce, max_nonce)
        })?;
        tracing::info!(drive = %drive_id, "nonce range authorized");
        Ok(())
    }

    fn set_max_nonce(&self, drive_id: &DriveId, max_nonce: [u8; NONCE_SIZE]) -> Result<()> {
        self.mutate(drive_id, |seq| seq.set_max_nonce(max_nonce))
    }

    fn next_nonce(&self, drive_id: &DriveId) -> Result<[u8; NONCE_SIZE]> {
        let nonce = self.mutate(drive_id, |seq| seq.allocate())?;
        tracing::debug!(drive = %drive_id, "nonce allocated");
        Ok(nonce)
    }

    fn revoke_sequence(&self, drive_id: &DriveId) -> Result<()> {
        self.mutate(drive_id, |seq| seq.revoke())?;
        tracing::info!(drive = %drive_id, "sequence revoked");
        Ok(())
    }

    fn get_sequence(&self, drive_id: &DriveId) -> Result<Option<NonceSequence>> {
        let sequences = self.lock()?;
        Ok(sequences.get(drive_id.as_str()).cloned())
    }
}
