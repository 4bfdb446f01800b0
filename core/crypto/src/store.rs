//! Random-access byte store seam.
//!
//! The encrypted stream treats its backing storage as an opaque byte store
//! addressed by offset. Local disk, HTTP range sources, and cloud document
//! providers are interchangeable implementations of this trait; the crate
//! ships an in-memory store used by tests and bulk operations.

use driftvault_common::Result;

/// Opaque random-access byte store.
///
/// Implementations own any buffering or positioning; all operations are
/// addressed by absolute offset. Errors are surfaced as `Error::Io` and are
/// never retried by the cipher core.
pub trait RandomAccessStore: Send {
    /// Read up to `buf.len()` bytes at `offset`. Returns the number of bytes
    /// read, which is short only at end of store.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data` at `offset`, extending the store if needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current store length in bytes.
    fn len(&self) -> Result<u64>;

    /// Whether the store is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate or zero-extend the store to `new_len` bytes.
    fn set_len(&mut self, new_len: u64) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn flush(&mut self) -> Result<()>;
}

impl<S: RandomAccessStore + ?Sized> RandomAccessStore for Box<S> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        (**self).write_at(offset, data)
    }

    fn len(&self) -> Result<u64> {
        (**self).len()
    }

    fn set_len(&mut self, new_len: u64) -> Result<()> {
        (**self).set_len(new_len)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// In-memory byte store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Vec<u8>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store over existing bytes.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Borrow the underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the store, returning the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl RandomAccessStore for MemoryStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = usize::min(buf.len(), self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let offset = offset as usize;
        let end = offset + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, new_len: u64) -> Result<()> {
        self.data.resize(new_len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut store = MemoryStore::new();
        store.write_at(0, b"hello").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(store.read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let mut store = MemoryStore::new();
        store.write_at(4, b"xy").unwrap();
        assert_eq!(store.as_slice(), &[0, 0, 0, 0, b'x', b'y']);
    }

    #[test]
    fn test_short_read_at_end() {
        let mut store = MemoryStore::from_vec(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(store.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[2, 3]);
        assert_eq!(store.read_at(10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_set_len() {
        let mut store = MemoryStore::from_vec(vec![1, 2, 3, 4]);
        store.set_len(2).unwrap();
        assert_eq!(store.as_slice(), &[1, 2]);
        store.set_len(4).unwrap();
        assert_eq!(store.as_slice(), &[1, 2, 0, 0]);
    }
}
