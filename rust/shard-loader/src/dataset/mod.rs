// rust/shard-loader/src/dataset/mod.rs

//! Shard-aware batching over a row-partitioned sparse matrix.
//!
//! The matrix is stored as `num_shards` files of 12-byte `(row, col, value)`
//! records. The pieces, from the bottom up:
//!
//! - [`ShardRecordSet`] owns the open shard files, their record counts and
//!   per-shard read cursors.
//! - [`ChunkSizeTable`] describes how many records a merged chunk yields as
//!   shards run dry (merge mode only).
//! - [`ChunkCache`] materializes one chunk at a time, optionally shuffled.
//! - [`BatchAssembler`] maps batch indices to chunks and stitches batches
//!   together across chunk and shard boundaries.
//!
//! # Example
//!
//! ```ignore
//! use shard_loader::dataset::{write_shards, BatchAssembler, BatchSource, Record};
//!
//! // Upstream: spread the matrix over four shard files
//! write_shards(&storage, num_rows, 4, records)?;
//!
//! // Training loop: one epoch of interleaved, shuffled batches
//! let mut config = LoaderConfig::new(dir, 4);
//! config.shard_merge = true;
//! config.shuffle = true;
//! let mut assembler = BatchAssembler::open(&config)?;
//! for batch in assembler.epoch() {
//!     let (rows, cols, values) = batch?.into_parts();
//! }
//! ```

mod assembler;
mod chunk;
mod chunk_table;
mod record;
mod shards;
mod traits;
mod writer;

pub use assembler::{AssemblerState, BatchAssembler};
pub use chunk::{locate_sequential_chunk, Chunk, ChunkCache, ReadMode};
pub use chunk_table::{ChunkSizeTable, Plateau};
pub use record::{decode_records, shard_file_name, Record, RECORD_SIZE};
pub use shards::ShardRecordSet;
pub use traits::{Batch, BatchSource, Epoch};
pub use writer::{write_shards, ShardPartitioner, ShardWriter};
