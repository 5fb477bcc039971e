// rust/shard-loader/src/storage/memory.rs

//! In-memory storage for tests, with seek accounting.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::traits::{StorageBackend, StorageReader, StorageWriter};
use crate::error::{LoaderError, Result};

#[derive(Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    seeks: Arc<AtomicU64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        self.files.lock().unwrap().insert(path.into(), data);
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }

    /// Total seeks issued by all readers opened from this storage.
    pub fn seek_count(&self) -> u64 {
        self.seeks.load(Ordering::SeqCst)
    }
}

struct MemoryReader {
    data: Cursor<Vec<u8>>,
    seeks: Arc<AtomicU64>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for MemoryReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.seeks.fetch_add(1, Ordering::SeqCst);
        self.data.seek(pos)
    }
}

impl StorageReader for MemoryReader {
    fn size(&self) -> u64 {
        self.data.get_ref().len() as u64
    }
}

struct MemoryWriter {
    path: PathBuf,
    buf: Vec<u8>,
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageWriter for MemoryWriter {
    fn finish(self: Box<Self>) -> Result<()> {
        let MemoryWriter { path, buf, files } = *self;
        files.lock().unwrap().insert(path, buf);
        Ok(())
    }
}

impl StorageBackend for MemoryStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let data = self
            .file(path)
            .ok_or_else(|| LoaderError::storage(path, "not found"))?;

        Ok(Box::new(MemoryReader {
            data: Cursor::new(data),
            seeks: self.seeks.clone(),
        }))
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        Ok(Box::new(MemoryWriter {
            path: path.to_path_buf(),
            buf: Vec::new(),
            files: self.files.clone(),
        }))
    }
}
