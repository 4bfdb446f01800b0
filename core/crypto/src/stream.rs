//! Encrypted random-access stream.
//!
//! Translates logical byte offsets into chunk-aligned AES-CTR operations
//! over an opaque byte store, coordinating the cipher provider and the
//! integrity layer. Supports partial and unaligned reads and writes;
//! unaligned writes are read-modify-write so untouched bytes within the
//! chunk are preserved and the chunk tag is recomputed.
//!
//! Container layout: a fixed header (see [`crate::header`]) followed by
//! `[ciphertext_chunk][tag]` records. Without integrity chunking the payload
//! is plain CTR ciphertext and the effective unit is one AES block.
//!
//! A stream instance owns its position cursor exclusively; it is not safe
//! for concurrent use from multiple threads without external
//! synchronization.

use std::io::SeekFrom;

use driftvault_common::{Error, Result};

use crate::header::{FileHeader, HEADER_SIZE};
use crate::integrity::Integrity;
use crate::keys::{CipherKey, HashKey};
use crate::nonce::NONCE_SIZE;
use crate::provider::{counter_block, create_provider, BlockCipherProvider, ProviderKind, BLOCK_SIZE};
use crate::store::RandomAccessStore;

/// Stream open mode. Writes are rejected on a read-only stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Decrypting reads only.
    Read,
    /// Encrypting writes; reads remain available for read-modify-write.
    Write,
}

/// Seekable encrypting/decrypting stream over a random-access store.
pub struct EncryptedStream<S: RandomAccessStore> {
    store: S,
    provider: Box<dyn BlockCipherProvider>,
    key: CipherKey,
    integrity: Integrity,
    header: FileHeader,
    mode: StreamMode,
    position: u64,
}

impl<S: RandomAccessStore> EncryptedStream<S> {
    /// Create a new encrypted container, truncating any previous content.
    ///
    /// The nonce must come from the drive's nonce sequencer and is consumed
    /// exactly once, at creation; it is written into the immutable header.
    ///
    /// # Preconditions
    /// - `chunk_size` is zero (no integrity) or a valid chunk size with a
    ///   hash key present
    ///
    /// # Errors
    /// - `InvalidInput` if chunking is requested without a hash key
    pub fn create(
        mut store: S,
        key: CipherKey,
        hash_key: Option<HashKey>,
        nonce: [u8; NONCE_SIZE],
        chunk_size: u32,
        provider: ProviderKind,
    ) -> Result<Self> {
        if chunk_size > 0 && hash_key.is_none() {
            return Err(Error::InvalidInput(
                "Chunked containers require an integrity key".to_string(),
            ));
        }
        let integrity = Integrity::new(chunk_size, hash_key)?;
        let header = FileHeader::new(nonce, chunk_size);
        store.set_len(0)?;
        header.write_to(&mut store)?;
        Ok(Self {
            store,
            provider: create_provider(provider),
            key,
            integrity,
            header,
            mode: StreamMode::Write,
            position: 0,
        })
    }

    /// Open an existing container for decrypting reads.
    ///
    /// When `hash_key` is `None` on a chunked container, tags are skipped
    /// without verification.
    ///
    /// # Errors
    /// - `InvalidInput` if the header is missing or malformed
    pub fn open_read(
        mut store: S,
        key: CipherKey,
        hash_key: Option<HashKey>,
        provider: ProviderKind,
    ) -> Result<Self> {
        let header = FileHeader::read_from(&mut store)?;
        let integrity = Integrity::new(header.chunk_size, hash_key)?;
        Ok(Self {
            store,
            provider: create_provider(provider),
            key,
            integrity,
            header,
            mode: StreamMode::Read,
            position: 0,
        })
    }

    /// Open an existing container for updates.
    ///
    /// # Errors
    /// - `InvalidInput` if the header is malformed, or the container is
    ///   chunked and no hash key was supplied
    pub fn open_write(
        mut store: S,
        key: CipherKey,
        hash_key: Option<HashKey>,
        provider: ProviderKind,
    ) -> Result<Self> {
        let header = FileHeader::read_from(&mut store)?;
        if header.chunk_size > 0 && hash_key.is_none() {
            return Err(Error::InvalidInput(
                "Updating a chunked container requires the integrity key".to_string(),
            ));
        }
        let integrity = Integrity::new(header.chunk_size, hash_key)?;
        Ok(Self {
            store,
            provider: create_provider(provider),
            key,
            integrity,
            header,
            mode: StreamMode::Write,
            position: 0,
        })
    }

    /// The file nonce from the header.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.header.nonce
    }

    /// The integrity chunk size, zero when disabled.
    pub fn chunk_size(&self) -> u32 {
        self.header.chunk_size
    }

    /// Whether reads verify per-chunk tags.
    pub fn has_integrity(&self) -> bool {
        self.integrity.enabled()
    }

    /// Current logical position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Logical (plaintext) length of the stream.
    ///
    /// # Errors
    /// - `InvalidInput` for a chunked container whose trailing record is
    ///   too short to hold a tag (truncated ciphertext)
    pub fn len(&self) -> Result<u64> {
        let physical = self.store.len()?;
        let payload = physical.saturating_sub(HEADER_SIZE as u64);
        if !self.integrity.chunked() {
            return Ok(payload);
        }
        let record = self.record_size() as u64;
        let tag = self.integrity.tag_size() as u64;
        let full = payload / record;
        let rem = payload % record;
        if rem > 0 && rem <= tag {
            return Err(Error::InvalidInput(
                "Truncated container: partial record too short".to_string(),
            ));
        }
        let last = if rem == 0 { 0 } else { rem - tag };
        Ok(full * self.unit() as u64 + last)
    }

    /// Whether the stream holds no plaintext.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Move the logical position without touching storage.
    ///
    /// Seeking past end of stream is allowed; the gap is zero-filled by the
    /// next write.
    ///
    /// # Errors
    /// - `InvalidInput` when seeking before the start of the stream
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.len()?;
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(len) + i128::from(delta),
        };
        if target < 0 {
            return Err(Error::InvalidInput(
                "Cannot seek before start of stream".to_string(),
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }

    /// Decrypt into `buf` from the current position.
    ///
    /// Full chunks are decrypted and verified before any of their bytes are
    /// copied out; a chunk that fails verification contributes nothing to
    /// the caller's buffer and fails the read with `Integrity`.
    ///
    /// # Postconditions
    /// - Returns bytes actually read; short only at end of stream
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = self.len()?;
        if buf.is_empty() || self.position >= len {
            return Ok(0);
        }
        let want = usize::min(buf.len(), (len - self.position) as usize);
        let unit = self.unit() as u64;
        let mut done = 0;
        let mut pos = self.position;
        while done < want {
            let idx = pos / unit;
            let offset = (pos % unit) as usize;
            let chunk = self.read_chunk(idx)?;
            if chunk.len() <= offset {
                break;
            }
            let n = usize::min(want - done, chunk.len() - offset);
            buf[done..done + n].copy_from_slice(&chunk[offset..offset + n]);
            done += n;
            pos += n as u64;
        }
        self.position = pos;
        Ok(done)
    }

    /// Encrypt `buf` at the current position.
    ///
    /// Chunk-aligned full-chunk spans are encrypted directly; partial spans
    /// read, decrypt, and re-verify the existing chunk first so bytes the
    /// caller did not touch survive unchanged, then re-encrypt the whole
    /// chunk and recompute its tag. Writing past end of stream zero-fills
    /// the gap.
    ///
    /// # Errors
    /// - `NotPermitted` on a read-only stream
    /// - `Integrity` if an existing chunk fails verification during
    ///   read-modify-write
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.mode != StreamMode::Write {
            return Err(Error::NotPermitted(
                "Stream is open for reading only".to_string(),
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let len = self.len()?;
        if self.position > len {
            self.zero_fill(len, self.position)?;
        }
        self.write_span(self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    /// Truncate or zero-extend the stream to `new_len` plaintext bytes.
    ///
    /// Shrinking rewrites the trailing partial chunk's tag so the container
    /// stays verifiable; growing writes zeros through the normal write path.
    ///
    /// # Errors
    /// - `NotPermitted` on a read-only stream
    pub fn set_len(&mut self, new_len: u64) -> Result<()> {
        if self.mode != StreamMode::Write {
            return Err(Error::NotPermitted(
                "Stream is open for reading only".to_string(),
            ));
        }
        let current = self.len()?;
        if new_len > current {
            self.zero_fill(current, new_len)?;
        } else if new_len < current {
            let unit = self.unit() as u64;
            let record = self.record_size() as u64;
            let tag = self.integrity.tag_size() as u64;
            let full = new_len / unit;
            let rem = (new_len % unit) as usize;
            let physical_end = if rem == 0 {
                HEADER_SIZE as u64 + full * record
            } else {
                let mut chunk = self.read_chunk(full)?;
                chunk.truncate(rem);
                self.write_chunk(full, &chunk)?;
                HEADER_SIZE as u64 + full * record + rem as u64 + tag
            };
            self.store.set_len(physical_end)?;
        }
        if self.position > new_len {
            self.position = new_len;
        }
        Ok(())
    }

    /// Flush the underlying store.
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    /// Flush and release the stream, returning the underlying store.
    pub fn into_store(mut self) -> Result<S> {
        self.store.flush()?;
        Ok(self.store)
    }

    /// Alignment unit: the integrity chunk when chunked, one AES block
    /// otherwise.
    fn unit(&self) -> usize {
        if self.integrity.chunked() {
            self.integrity.chunk_size() as usize
        } else {
            BLOCK_SIZE
        }
    }

    fn record_size(&self) -> usize {
        self.unit() + self.integrity.tag_size()
    }

    fn chunk_physical_offset(&self, idx: u64) -> u64 {
        HEADER_SIZE as u64 + idx * self.record_size() as u64
    }

    fn chunk_counter(&self, idx: u64) -> [u8; 16] {
        let blocks_per_unit = (self.unit() / BLOCK_SIZE) as u64;
        counter_block(&self.header.nonce, idx * blocks_per_unit)
    }

    /// Read, verify, and decrypt one chunk. Returns the chunk plaintext,
    /// which is shorter than the unit only for the trailing chunk and empty
    /// past end of stream.
    fn read_chunk(&mut self, idx: u64) -> Result<Vec<u8>> {
        let len = self.len()?;
        let unit = self.unit() as u64;
        let start = idx * unit;
        if start >= len {
            return Ok(Vec::new());
        }
        let ct_len = usize::min(self.unit(), (len - start) as usize);
        let physical = self.chunk_physical_offset(idx);

        let mut ciphertext = vec![0u8; ct_len];
        let n = self.store.read_at(physical, &mut ciphertext)?;
        if n != ct_len {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("Short read in chunk {}", idx),
            )));
        }
        let counter = self.chunk_counter(idx);
        if self.integrity.chunked() {
            let mut tag = vec![0u8; self.integrity.tag_size()];
            let n = self.store.read_at(physical + ct_len as u64, &mut tag)?;
            if n != tag.len() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("Missing tag for chunk {}", idx),
                )));
            }
            self.integrity.verify(&counter, &ciphertext, &tag)?;
        }

        let mut plaintext = vec![0u8; ct_len];
        self.provider
            .transform(self.key.as_bytes(), &counter, &ciphertext, &mut plaintext)?;
        Ok(plaintext)
    }

    /// Encrypt and write one chunk record (ciphertext, then tag).
    fn write_chunk(&mut self, idx: u64, plaintext: &[u8]) -> Result<()> {
        debug_assert!(plaintext.len() <= self.unit());
        let counter = self.chunk_counter(idx);
        let mut ciphertext = vec![0u8; plaintext.len()];
        self.provider
            .transform(self.key.as_bytes(), &counter, plaintext, &mut ciphertext)?;

        let physical = self.chunk_physical_offset(idx);
        self.store.write_at(physical, &ciphertext)?;
        if self.integrity.chunked() {
            let tag = self.integrity.compute(&counter, &ciphertext)?;
            self.store.write_at(physical + ciphertext.len() as u64, &tag)?;
        }
        Ok(())
    }

    fn write_span(&mut self, mut pos: u64, data: &[u8]) -> Result<()> {
        let unit = self.unit();
        let mut done = 0;
        while done < data.len() {
            let idx = pos / unit as u64;
            let offset = (pos % unit as u64) as usize;
            let n = usize::min(data.len() - done, unit - offset);
            if offset == 0 && n == unit {
                self.write_chunk(idx, &data[done..done + n])?;
            } else {
                let mut chunk = self.read_chunk(idx)?;
                if chunk.len() < offset + n {
                    chunk.resize(offset + n, 0);
                }
                chunk[offset..offset + n].copy_from_slice(&data[done..done + n]);
                self.write_chunk(idx, &chunk)?;
            }
            done += n;
            pos += n as u64;
        }
        Ok(())
    }

    fn zero_fill(&mut self, from: u64, to: u64) -> Result<()> {
        let unit = self.unit();
        let zeros = vec![0u8; unit];
        let mut pos = from;
        while pos < to {
            let offset = (pos % unit as u64) as usize;
            let n = usize::min(unit - offset, (to - pos) as usize);
            self.write_span(pos, &zeros[..n])?;
            pos += n as u64;
        }
        Ok(())
    }
}
