//! Filesystem Store
//!
//! The mirror's only access path to the local disk. All writes are upserts; directory
//! creation is idempotent.

use crate::error::PathError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Filesystem operations consumed by the synchronization engine
pub trait FileStore: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_directory(&self, path: &Path) -> bool;

    /// Create or overwrite a file, creating missing parent directories
    fn create(&self, path: &Path, content: &str) -> Result<(), PathError>;

    /// Read a file's content
    fn read(&self, path: &Path) -> Result<String, PathError>;

    /// Remove a regular file
    fn delete(&self, path: &Path) -> Result<(), PathError>;

    /// Create a single directory; succeeds if it already exists
    fn mkdir(&self, path: &Path) -> Result<(), PathError>;

    /// Create a directory and all missing ancestors
    fn mkdirp(&self, path: &Path) -> Result<(), PathError>;

    /// Recursively remove a directory
    fn rmdir(&self, path: &Path) -> Result<(), PathError>;

    /// Pure parent-path computation
    fn dirname(&self, path: &Path) -> PathBuf {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    /// blake3 hash of a file's bytes, `None` when it is not a readable regular file
    fn content_hash(&self, path: &Path) -> Option<[u8; 32]>;
}

/// `FileStore` backed by `std::fs`
#[derive(Debug, Default, Clone)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

impl FileStore for LocalFileStore {
    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn is_file(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    fn is_directory(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn create(&self, path: &Path, content: &str) -> Result<(), PathError> {
        if self.is_directory(path) {
            return Err(PathError::NotAFile(path.to_path_buf()));
        }
        self.mkdirp(&self.dirname(path))?;
        fs::write(path, content).map_err(|e| PathError::io(path, e))
    }

    fn read(&self, path: &Path) -> Result<String, PathError> {
        if !self.exists(path) {
            return Err(PathError::DoesNotExist(path.to_path_buf()));
        }
        if !self.is_file(path) {
            return Err(PathError::NotAFile(path.to_path_buf()));
        }
        fs::read_to_string(path).map_err(|e| PathError::io(path, e))
    }

    fn delete(&self, path: &Path) -> Result<(), PathError> {
        if !self.exists(path) {
            return Err(PathError::DoesNotExist(path.to_path_buf()));
        }
        if !self.is_file(path) {
            return Err(PathError::NotAFile(path.to_path_buf()));
        }
        fs::remove_file(path).map_err(|e| PathError::io(path, e))
    }

    fn mkdir(&self, path: &Path) -> Result<(), PathError> {
        match fs::create_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && self.is_directory(path) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(PathError::NotADirectory(path.to_path_buf()))
            }
            Err(e) => Err(PathError::io(path, e)),
        }
    }

    fn mkdirp(&self, path: &Path) -> Result<(), PathError> {
        if self.is_directory(path) {
            return Ok(());
        }
        if self.exists(path) {
            return Err(PathError::NotADirectory(path.to_path_buf()));
        }
        fs::create_dir_all(path).map_err(|e| PathError::io(path, e))
    }

    fn rmdir(&self, path: &Path) -> Result<(), PathError> {
        if !self.exists(path) {
            return Err(PathError::DoesNotExist(path.to_path_buf()));
        }
        if !self.is_directory(path) {
            return Err(PathError::NotADirectory(path.to_path_buf()));
        }
        fs::remove_dir_all(path).map_err(|e| PathError::io(path, e))
    }

    fn content_hash(&self, path: &Path) -> Option<[u8; 32]> {
        if !self.is_file(path) {
            return None;
        }
        fs::read(path).ok().map(|bytes| *blake3::hash(&bytes).as_bytes())
    }
}
