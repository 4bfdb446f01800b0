//! Parallel bulk encryption and decryption over in-memory buffers.
//!
//! Work is partitioned on chunk boundaries (AES block boundaries when
//! integrity chunking is off) and every worker derives its counters from
//! absolute offsets, so the output is byte-identical no matter how many
//! threads run. Cancellation is cooperative: workers poll the token between
//! chunks and the whole operation fails with `Cancelled`.

use rayon::prelude::*;

use driftvault_common::{CancelToken, Error, Result};

use crate::header::{FileHeader, HEADER_SIZE};
use crate::integrity::{compute_tag, verify_tag, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, TAG_SIZE};
use crate::keys::{CipherKey, HashKey};
use crate::nonce::NONCE_SIZE;
use crate::provider::{counter_block, create_provider, ProviderKind, BLOCK_SIZE};

/// Output framing for bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionFormat {
    /// Bare CTR ciphertext: no header, no tags. The caller must carry the
    /// nonce out of band and supply it again for decryption.
    Raw,
    /// Self-describing container: standard header followed by chunk records,
    /// with tags when a hash key is supplied.
    #[default]
    Container,
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::Crypto(format!("Failed to build worker pool: {}", e)))
}

/// Chunks per worker part: even split across threads, rounded up so no part
/// is empty.
fn part_len(total: usize, threads: usize) -> usize {
    usize::max(1, total.div_ceil(threads))
}

fn check_cancel(cancel: Option<&CancelToken>) -> Result<()> {
    match cancel {
        Some(token) => token.check(),
        None => Ok(()),
    }
}

/// Parallel CTR transform of a bare buffer. Parts are block-aligned and each
/// part's counter starts at its absolute block index.
fn transform_parallel(
    pool: &rayon::ThreadPool,
    provider: ProviderKind,
    key: &CipherKey,
    nonce: &[u8; NONCE_SIZE],
    src: &[u8],
    dest: &mut [u8],
    threads: usize,
    cancel: Option<&CancelToken>,
) -> Result<()> {
    let blocks = src.len().div_ceil(BLOCK_SIZE);
    let part_blocks = part_len(blocks.max(1), threads);
    let part_bytes = part_blocks * BLOCK_SIZE;

    pool.install(|| {
        dest.par_chunks_mut(part_bytes)
            .zip(src.par_chunks(part_bytes))
            .enumerate()
            .try_for_each(|(part, (out, data))| {
                check_cancel(cancel)?;
                let backend = create_provider(provider);
                let block_index = (part * part_blocks) as u64;
                backend.transform(
                    key.as_bytes(),
                    &counter_block(nonce, block_index),
                    data,
                    out,
                )?;
                Ok(())
            })
    })
}

/// Multi-threaded bulk encryptor.
#[derive(Debug, Clone)]
pub struct Encryptor {
    threads: usize,
    provider: ProviderKind,
}

impl Encryptor {
    /// Create an encryptor running on `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            provider: ProviderKind::default(),
        }
    }

    /// Select the cipher backend.
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Encrypt `data` under `key` with the given file nonce.
    ///
    /// With a hash key, the output is a chunked container carrying one tag
    /// per chunk (`chunk_size` of zero selects the default). Without one,
    /// the container has no tags; `Raw` format never carries tags and
    /// rejects a hash key.
    ///
    /// # Postconditions
    /// - Output bytes are identical for any worker count
    ///
    /// # Errors
    /// - `InvalidInput` for a hash key combined with `Raw` format
    /// - `Cancelled` if the token fires before completion
    pub fn encrypt(
        &self,
        data: &[u8],
        key: &CipherKey,
        hash_key: Option<&HashKey>,
        nonce: &[u8; NONCE_SIZE],
        chunk_size: u32,
        format: EncryptionFormat,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<u8>> {
        check_cancel(cancel)?;
        tracing::debug!(
            len = data.len(),
            threads = self.threads,
            ?format,
            integrity = hash_key.is_some(),
            "bulk encrypt"
        );
        let pool = build_pool(self.threads)?;

        match format {
            EncryptionFormat::Raw => {
                if hash_key.is_some() {
                    return Err(Error::InvalidInput(
                        "Raw format cannot carry integrity tags".to_string(),
                    ));
                }
                let mut out = vec![0u8; data.len()];
                transform_parallel(
                    &pool,
                    self.provider,
                    key,
                    nonce,
                    data,
                    &mut out,
                    self.threads,
                    cancel,
                )?;
                Ok(out)
            }
            EncryptionFormat::Container => match hash_key {
                None => {
                    let header = FileHeader::new(*nonce, 0);
                    let mut out = vec![0u8; HEADER_SIZE + data.len()];
                    out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
                    transform_parallel(
                        &pool,
                        self.provider,
                        key,
                        nonce,
                        data,
                        &mut out[HEADER_SIZE..],
                        self.threads,
                        cancel,
                    )?;
                    Ok(out)
                }
                Some(hash_key) => {
                    let chunk_size = if chunk_size == 0 {
                        DEFAULT_CHUNK_SIZE
                    } else {
                        chunk_size
                    };
                    self.encrypt_chunked(&pool, data, key, hash_key, nonce, chunk_size, cancel)
                }
            },
        }
    }

    fn encrypt_chunked(
        &self,
        pool: &rayon::ThreadPool,
        data: &[u8],
        key: &CipherKey,
        hash_key: &HashKey,
        nonce: &[u8; NONCE_SIZE],
        chunk_size: u32,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<u8>> {
        let unit = chunk_size as usize;
        if unit % BLOCK_SIZE != 0 {
            return Err(Error::InvalidInput(format!(
                "Chunk size {} is not block-aligned",
                chunk_size
            )));
        }
        let record = unit + TAG_SIZE;
        let n_chunks = data.len().div_ceil(unit);
        let blocks_per_chunk = (unit / BLOCK_SIZE) as u64;

        let header = FileHeader::new(*nonce, chunk_size);
        let mut out = vec![0u8; HEADER_SIZE + data.len() + n_chunks * TAG_SIZE];
        out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        if data.is_empty() {
            return Ok(out);
        }

        let part = part_len(n_chunks, self.threads);
        let provider = self.provider;
        pool.install(|| {
            out[HEADER_SIZE..]
                .par_chunks_mut(part * record)
                .zip(data.par_chunks(part * unit))
                .enumerate()
                .try_for_each(|(pi, (out_part, in_part))| {
                    let backend = create_provider(provider);
                    let base_chunk = (pi * part) as u64;
                    for (ci, plain) in in_part.chunks(unit).enumerate() {
                        check_cancel(cancel)?;
                        let counter = counter_block(
                            nonce,
                            (base_chunk + ci as u64) * blocks_per_chunk,
                        );
                        let start = ci * record;
                        let (ct, rest) = out_part[start..].split_at_mut(plain.len());
                        backend.transform(key.as_bytes(), &counter, plain, ct)?;
                        let tag = compute_tag(hash_key, &counter, ct)?;
                        rest[..TAG_SIZE].copy_from_slice(&tag);
                    }
                    Ok::<(), Error>(())
                })
        })?;
        Ok(out)
    }
}

/// Multi-threaded bulk decryptor.
#[derive(Debug, Clone)]
pub struct Decryptor {
    threads: usize,
    provider: ProviderKind,
}

impl Decryptor {
    /// Create a decryptor running on `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            provider: ProviderKind::default(),
        }
    }

    /// Select the cipher backend.
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Decrypt a buffer produced by [`Encryptor::encrypt`].
    ///
    /// For `Raw` format the nonce must be supplied; for `Container` it is
    /// read from the header and `nonce` must be `None`. Every chunk tag is
    /// verified before its plaintext is returned; a single bad chunk fails
    /// the whole operation with `Integrity`.
    ///
    /// # Errors
    /// - `InvalidInput` for a missing/extra nonce, or a chunked container
    ///   without a hash key
    /// - `Integrity` if any chunk fails verification
    /// - `Cancelled` if the token fires before completion
    pub fn decrypt(
        &self,
        data: &[u8],
        key: &CipherKey,
        hash_key: Option<&HashKey>,
        nonce: Option<&[u8; NONCE_SIZE]>,
        format: EncryptionFormat,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<u8>> {
        check_cancel(cancel)?;
        tracing::debug!(len = data.len(), threads = self.threads, ?format, "bulk decrypt");
        let pool = build_pool(self.threads)?;

        match format {
            EncryptionFormat::Raw => {
                let nonce = nonce.ok_or_else(|| {
                    Error::InvalidInput("Raw format requires an explicit nonce".to_string())
                })?;
                let mut out = vec![0u8; data.len()];
                transform_parallel(
                    &pool,
                    self.provider,
                    key,
                    nonce,
                    data,
                    &mut out,
                    self.threads,
                    cancel,
                )?;
                Ok(out)
            }
            EncryptionFormat::Container => {
                if nonce.is_some() {
                    return Err(Error::InvalidInput(
                        "Container format carries its own nonce".to_string(),
                    ));
                }
                let header = FileHeader::from_bytes(data)?;
                let payload = &data[HEADER_SIZE..];
                if header.chunk_size == 0 {
                    let mut out = vec![0u8; payload.len()];
                    transform_parallel(
                        &pool,
                        self.provider,
                        key,
                        &header.nonce,
                        payload,
                        &mut out,
                        self.threads,
                        cancel,
                    )?;
                    return Ok(out);
                }
                let hash_key = hash_key.ok_or_else(|| {
                    Error::InvalidInput(
                        "Chunked container requires the integrity key".to_string(),
                    )
                })?;
                self.decrypt_chunked(&pool, payload, key, hash_key, &header, cancel)
            }
        }
    }

    fn decrypt_chunked(
        &self,
        pool: &rayon::ThreadPool,
        payload: &[u8],
        key: &CipherKey,
        hash_key: &HashKey,
        header: &FileHeader,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<u8>> {
        // untrusted header: reject chunk sizes the stream path would never
        // have written before deriving any counter from them
        let unit = header.chunk_size as usize;
        if unit % BLOCK_SIZE != 0 || header.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidInput(format!(
                "Invalid container chunk size: {}",
                header.chunk_size
            )));
        }
        let record = unit + TAG_SIZE;
        let blocks_per_chunk = (unit / BLOCK_SIZE) as u64;

        let full = payload.len() / record;
        let rem = payload.len() % record;
        if rem > 0 && rem <= TAG_SIZE {
            return Err(Error::InvalidInput(
                "Truncated container: partial record too short".to_string(),
            ));
        }
        let plain_len = full * unit + rem.saturating_sub(TAG_SIZE);
        let mut out = vec![0u8; plain_len];
        if plain_len == 0 {
            return Ok(out);
        }

        let n_chunks = payload.len().div_ceil(record);
        let part = part_len(n_chunks, self.threads);
        let nonce = header.nonce;
        let provider = self.provider;
        pool.install(|| {
            out.par_chunks_mut(part * unit)
                .zip(payload.par_chunks(part * record))
                .enumerate()
                .try_for_each(|(pi, (out_part, in_part))| {
                    let backend = create_provider(provider);
                    let base_chunk = (pi * part) as u64;
                    for (ci, rec) in in_part.chunks(record).enumerate() {
                        check_cancel(cancel)?;
                        if rec.len() <= TAG_SIZE {
                            return Err(Error::InvalidInput(
                                "Truncated container record".to_string(),
                            ));
                        }
                        let (ct, tag) = rec.split_at(rec.len() - TAG_SIZE);
                        let counter = counter_block(
                            &nonce,
                            (base_chunk + ci as u64) * blocks_per_chunk,
                        );
                        if !verify_tag(hash_key, &counter, ct, tag)? {
                            return Err(Error::Integrity(
                                "Data corrupt or tampered".to_string(),
                            ));
                        }
                        let start = ci * unit;
                        backend.transform(
                            key.as_bytes(),
                            &counter,
                            ct,
                            &mut out_part[start..start + ct.len()],
                        )?;
                    }
                    Ok(())
                })
        })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CHUNK: u32 = 64;

    fn cipher_key() -> CipherKey {
        CipherKey::from_bytes([0x44u8; 32])
    }

    fn hash_key() -> HashKey {
        HashKey::from_bytes([0x55u8; 32])
    }

    fn nonce() -> [u8; NONCE_SIZE] {
        [8, 7, 6, 5, 4, 3, 2, 1]
    }

    fn sample_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    #[test]
    fn test_container_round_trip_with_integrity() {
        let data = sample_data(1000);
        let key = cipher_key();
        let hash = hash_key();

        let encrypted = Encryptor::new(2)
            .encrypt(&data, &key, Some(&hash), &nonce(), CHUNK, EncryptionFormat::Container, None)
            .unwrap();
        let decrypted = Decryptor::new(2)
            .decrypt(&encrypted, &key, Some(&hash), None, EncryptionFormat::Container, None)
            .unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_raw_round_trip() {
        let data = sample_data(333);
        let key = cipher_key();

        let encrypted = Encryptor::new(4)
            .encrypt(&data, &key, None, &nonce(), 0, EncryptionFormat::Raw, None)
            .unwrap();
        assert_eq!(encrypted.len(), data.len());
        let decrypted = Decryptor::new(4)
            .decrypt(&encrypted, &key, None, Some(&nonce()), EncryptionFormat::Raw, None)
            .unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_output_identical_across_thread_counts() {
        let data = sample_data(10_000);
        let key = cipher_key();
        let hash = hash_key();

        let reference = Encryptor::new(1)
            .encrypt(&data, &key, Some(&hash), &nonce(), CHUNK, EncryptionFormat::Container, None)
            .unwrap();
        for threads in [2, 4, 8] {
            let out = Encryptor::new(threads)
                .encrypt(&data, &key, Some(&hash), &nonce(), CHUNK, EncryptionFormat::Container, None)
                .unwrap();
            assert_eq!(out, reference, "thread count {} diverged", threads);
        }
    }

    #[test]
    fn test_bulk_matches_stream_output() {
        // A container written chunk by chunk through the stream and one
        // produced by the bulk path must be byte-identical.
        use crate::store::MemoryStore;
        use crate::stream::EncryptedStream;

        let data = sample_data(500);
        let mut stream = EncryptedStream::create(
            MemoryStore::new(),
            cipher_key(),
            Some(hash_key()),
            nonce(),
            CHUNK,
            ProviderKind::Accelerated,
        )
        .unwrap();
        stream.write(&data).unwrap();
        let via_stream = stream.into_store().unwrap().into_inner();

        let via_bulk = Encryptor::new(4)
            .encrypt(&data, &cipher_key(), Some(&hash_key()), &nonce(), CHUNK, EncryptionFormat::Container, None)
            .unwrap();
        assert_eq!(via_bulk, via_stream);
    }

    #[test]
    fn test_tampered_chunk_fails_decrypt() {
        let data = sample_data(200);
        let key = cipher_key();
        let hash = hash_key();

        let mut encrypted = Encryptor::new(1)
            .encrypt(&data, &key, Some(&hash), &nonce(), CHUNK, EncryptionFormat::Container, None)
            .unwrap();
        encrypted[HEADER_SIZE + 70] ^= 0xFF;

        let result = Decryptor::new(2).decrypt(
            &encrypted,
            &key,
            Some(&hash),
            None,
            EncryptionFormat::Container,
            None,
        );
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn test_raw_rejects_hash_key() {
        let result = Encryptor::new(1).encrypt(
            b"data",
            &cipher_key(),
            Some(&hash_key()),
            &nonce(),
            CHUNK,
            EncryptionFormat::Raw,
            None,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_chunked_decrypt_requires_hash_key() {
        let data = sample_data(100);
        let encrypted = Encryptor::new(1)
            .encrypt(&data, &cipher_key(), Some(&hash_key()), &nonce(), CHUNK, EncryptionFormat::Container, None)
            .unwrap();
        let result = Decryptor::new(1).decrypt(
            &encrypted,
            &cipher_key(),
            None,
            None,
            EncryptionFormat::Container,
            None,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_crafted_header_chunk_size_rejected() {
        // a container claiming an unaligned chunk size never came from the
        // encryptor and must be refused before any counter math runs
        let header = FileHeader::new(nonce(), 8);
        let mut data = header.to_bytes().to_vec();
        data.extend_from_slice(&[0u8; 120]);

        let result = Decryptor::new(2).decrypt(
            &data,
            &cipher_key(),
            Some(&hash_key()),
            None,
            EncryptionFormat::Container,
            None,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_empty_input() {
        let encrypted = Encryptor::new(4)
            .encrypt(&[], &cipher_key(), Some(&hash_key()), &nonce(), CHUNK, EncryptionFormat::Container, None)
            .unwrap();
        assert_eq!(encrypted.len(), HEADER_SIZE);
        let decrypted = Decryptor::new(4)
            .decrypt(&encrypted, &cipher_key(), Some(&hash_key()), None, EncryptionFormat::Container, None)
            .unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_cancelled_token_aborts() {
        let token = CancelToken::new();
        token.cancel();
        let result = Encryptor::new(2).encrypt(
            &sample_data(1000),
            &cipher_key(),
            None,
            &nonce(),
            0,
            EncryptionFormat::Raw,
            Some(&token),
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    proptest! {
        #[test]
        fn prop_container_round_trip(data in proptest::collection::vec(any::<u8>(), 0..2000), threads in 1usize..5) {
            let key = cipher_key();
            let hash = hash_key();
            let encrypted = Encryptor::new(threads)
                .encrypt(&data, &key, Some(&hash), &nonce(), CHUNK, EncryptionFormat::Container, None)
                .unwrap();
            let decrypted = Decryptor::new(threads)
                .decrypt(&encrypted, &key, Some(&hash), None, EncryptionFormat::Container, None)
                .unwrap();
            prop_assert_eq!(decrypted, data);
        }
    }
}
