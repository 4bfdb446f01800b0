//! Storage entry abstraction.
//!
//! Entries model named nodes in a vault's backing storage. The vault layer
//! navigates and creates entries without knowing whether they live on local
//! disk or behind a remote backend.

use std::fs;
use std::path::{Path, PathBuf};

use driftvault_common::{Error, Result};
use driftvault_crypto::store::RandomAccessStore;

use crate::local::LocalStore;

/// A named node (file or directory) in vault storage.
pub trait StorageEntry: Send {
    /// Leaf name of the entry.
    fn name(&self) -> String;

    /// Whether the entry currently exists.
    fn exists(&self) -> bool;

    /// Whether the entry is a directory.
    fn is_dir(&self) -> bool;

    /// Byte length of a file entry.
    fn length(&self) -> Result<u64>;

    /// Resolve a direct child by name.
    ///
    /// # Errors
    /// - `InvalidInput` for names with path separators or traversal
    fn child(&self, name: &str) -> Result<Box<dyn StorageEntry>>;

    /// The containing entry, if any.
    fn parent(&self) -> Option<Box<dyn StorageEntry>>;

    /// Create this entry as a directory, including missing parents.
    fn create_dir(&self) -> Result<()>;

    /// List direct children of a directory entry.
    fn list(&self) -> Result<Vec<Box<dyn StorageEntry>>>;

    /// Delete the entry (recursively for directories).
    fn delete(&self) -> Result<()>;

    /// Open the entry's contents read-only.
    fn open_read(&self) -> Result<Box<dyn RandomAccessStore>>;

    /// Open the entry's contents for update, creating it if missing.
    fn open_write(&self) -> Result<Box<dyn RandomAccessStore>>;

    /// Create or truncate the entry's contents.
    fn create(&self) -> Result<Box<dyn RandomAccessStore>>;
}

/// Entry on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    path: PathBuf,
}

impl LocalEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn validate_child_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(Error::InvalidInput(format!(
            "Invalid entry name: {:?}",
            name
        )));
    }
    Ok(())
}

impl StorageEntry for LocalEntry {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn is_dir(&self) -> bool {
        self.path.is_dir()
    }

    fn length(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn child(&self, name: &str) -> Result<Box<dyn StorageEntry>> {
        validate_child_name(name)?;
        Ok(Box::new(LocalEntry::new(self.path.join(name))))
    }

    fn parent(&self) -> Option<Box<dyn StorageEntry>> {
        self.path
            .parent()
            .map(|p| Box::new(LocalEntry::new(p)) as Box<dyn StorageEntry>)
    }

    fn create_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.path)?;
        tracing::debug!(path = %self.path.display(), "directory created");
        Ok(())
    }

    fn list(&self) -> Result<Vec<Box<dyn StorageEntry>>> {
        let mut entries: Vec<Box<dyn StorageEntry>> = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            entries.push(Box::new(LocalEntry::new(entry?.path())));
        }
        entries.sort_by_key(|e| e.name());
        Ok(entries)
    }

    fn delete(&self) -> Result<()> {
        if self.is_dir() {
            fs::remove_dir_all(&self.path)?;
        } else {
            fs::remove_file(&self.path)?;
        }
        tracing::debug!(path = %self.path.display(), "entry deleted");
        Ok(())
    }

    fn open_read(&self) -> Result<Box<dyn RandomAccessStore>> {
        Ok(Box::new(LocalStore::open_read(&self.path)?))
    }

    fn open_write(&self) -> Result<Box<dyn RandomAccessStore>> {
        Ok(Box::new(LocalStore::open_write(&self.path)?))
    }

    fn create(&self) -> Result<Box<dyn RandomAccessStore>> {
        Ok(Box::new(LocalStore::create(&self.path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_child_navigation_and_create() {
        let dir = TempDir::new().unwrap();
        let root = LocalEntry::new(dir.path());

        let sub = root.child("files").unwrap();
        assert!(!sub.exists());
        sub.create_dir().unwrap();
        assert!(sub.exists());
        assert!(sub.is_dir());

        let file = sub.child("data.bin").unwrap();
        let mut store = file.create().unwrap();
        store.write_at(0, b"abc").unwrap();
        store.flush().unwrap();
        drop(store);
        assert_eq!(file.length().unwrap(), 3);
        assert_eq!(file.name(), "data.bin");
    }

    #[test]
    fn test_parent_navigation() {
        let dir = TempDir::new().unwrap();
        let root = LocalEntry::new(dir.path());
        let child = root.child("sub").unwrap();
        let back = child.parent().unwrap();
        assert_eq!(back.name(), root.name());
    }

    #[test]
    fn test_traversal_names_rejected() {
        let dir = TempDir::new().unwrap();
        let root = LocalEntry::new(dir.path());
        assert!(root.child("..").is_err());
        assert!(root.child("a/b").is_err());
        assert!(root.child("").is_err());
    }

    #[test]
    fn test_list_is_sorted() {
        let dir = TempDir::new().unwrap();
        let root = LocalEntry::new(dir.path());
        for name in ["c.txt", "a.txt", "b.txt"] {
            root.child(name).unwrap().create().unwrap();
        }
        let names: Vec<String> = root.list().unwrap().iter().map(|e| e.name()).collect();
        assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let root = LocalEntry::new(dir.path());
        let file = root.child("gone.bin").unwrap();
        file.create().unwrap();
        assert!(file.exists());
        file.delete().unwrap();
        assert!(!file.exists());
    }
}
