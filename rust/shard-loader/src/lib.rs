// rust/shard-loader/src/lib.rs

//! Shard Loader - Core Library
//!
//! Serves fixed-size batches of `(row, col, value)` triples from a sparse
//! matrix that is split across many binary shard files, with optional
//! cross-shard interleaving and bounded in-chunk shuffling.

pub mod config;
pub mod dataset;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{LoaderConfig, StorageConfig};
pub use dataset::{
    write_shards, AssemblerState, Batch, BatchAssembler, BatchSource, ChunkSizeTable, Record,
    ShardRecordSet, RECORD_SIZE,
};
pub use error::{LoaderError, Result};
pub use storage::{LocalStorage, StorageBackend, StorageReader, StorageWriter};
