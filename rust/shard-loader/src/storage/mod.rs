// rust/shard-loader/src/storage/mod.rs

//! Storage abstraction for shard files.
//!
//! The batching engine reads shards through [`StorageBackend`] and writes them
//! through [`StorageWriter`], so the same code runs against the local
//! filesystem and against in-memory stores in tests.
//!
//! # Example
//!
//! ```no_run
//! use shard_loader::config::StorageConfig;
//! use shard_loader::storage::{LocalStorage, StorageBackend};
//! use std::io::Read;
//! use std::path::Path;
//!
//! let storage = LocalStorage::new("/data/matrix", &StorageConfig::default());
//! let mut reader = storage.open_read(Path::new("data.bin.00000-of-00004")).unwrap();
//! let mut record = [0u8; 12];
//! reader.read_exact(&mut record).unwrap();
//! ```

mod local;
mod traits;

#[cfg(test)]
pub(crate) mod memory;

pub use local::LocalStorage;
pub use traits::{StorageBackend, StorageReader, StorageWriter};
