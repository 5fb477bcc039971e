// rust/shard-loader/src/storage/traits.rs

//! Storage traits for shard files.
//!
//! Shard I/O goes through these object-safe traits so the batching engine can
//! run against the local filesystem or an in-memory backend in tests.

use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::error::Result;

/// A seekable read handle.
pub trait StorageReader: Read + Seek + Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;
}

/// A handle for writing to storage.
pub trait StorageWriter: Write + Send {
    /// Flushes and persists everything written so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// The storage backend trait.
///
/// Paths are resolved relative to the backend's root unless absolute.
pub trait StorageBackend: Send + Sync {
    /// Checks if an object exists at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined, for example when
    /// a parent directory is unreadable.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Opens an object for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Opens an object for writing, truncating any existing content.
    /// Parent directories are created as needed.
    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;
}
