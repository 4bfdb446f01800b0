//! File-backed random-access store.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use driftvault_common::Result;
use driftvault_crypto::store::RandomAccessStore;

/// Random-access store over a regular file.
#[derive(Debug)]
pub struct LocalStore {
    file: File,
    writable: bool,
}

impl LocalStore {
    /// Open an existing file read-only.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            writable: false,
        })
    }

    /// Open a file for reading and writing, creating it if missing.
    pub fn open_write(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
            writable: true,
        })
    }

    /// Create or truncate a file for writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
            writable: true,
        })
    }
}

impl RandomAccessStore for LocalStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        // fill as much as possible; short only at end of file
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.read(&mut buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, new_len: u64) -> Result<()> {
        self.file.set_len(new_len)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");

        let mut store = LocalStore::create(&path).unwrap();
        store.write_at(0, b"hello world").unwrap();
        store.flush().unwrap();
        drop(store);

        let mut store = LocalStore::open_read(&path).unwrap();
        assert_eq!(store.len().unwrap(), 11);
        let mut buf = [0u8; 5];
        assert_eq!(store.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");

        let mut store = LocalStore::create(&path).unwrap();
        store.write_at(4, b"x").unwrap();
        let mut buf = [0xFFu8; 5];
        assert_eq!(store.read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, &[0, 0, 0, 0, b'x']);
    }

    #[test]
    fn test_short_read_at_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");

        let mut store = LocalStore::create(&path).unwrap();
        store.write_at(0, b"abc").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(store.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(store.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_set_len_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");

        let mut store = LocalStore::create(&path).unwrap();
        store.write_at(0, b"0123456789").unwrap();
        store.set_len(4).unwrap();
        assert_eq!(store.len().unwrap(), 4);
    }
}
