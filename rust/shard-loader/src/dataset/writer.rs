// rust/shard-loader/src/dataset/writer.rs

//! Producing shard files.
//!
//! Rows are range-partitioned: with `block = ceil(num_rows / num_shards)`,
//! row `r` belongs to shard `r / block`. Every row therefore lives in exactly
//! one shard while columns are shared by all of them.

use std::io::Write;
use std::ops::Range;
use std::path::PathBuf;

use crate::error::{LoaderError, Result};
use crate::storage::{StorageBackend, StorageWriter};

use super::record::{shard_file_name, Record};

/// Appends records to one shard file.
pub struct ShardWriter {
    writer: Box<dyn StorageWriter>,
    path: PathBuf,
    records: u64,
}

impl ShardWriter {
    /// Creates (or truncates) shard `shard_id` of `num_shards` at the storage
    /// root.
    pub fn create(storage: &dyn StorageBackend, shard_id: u32, num_shards: u32) -> Result<Self> {
        if shard_id >= num_shards {
            return Err(LoaderError::shard_out_of_range(shard_id, num_shards));
        }

        let path = PathBuf::from(shard_file_name(shard_id, num_shards));
        let writer = storage.open_write(&path)?;
        Ok(Self {
            writer,
            path,
            records: 0,
        })
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.writer.write_all(&record.to_bytes()).map_err(|e| {
            LoaderError::storage_with_source(&self.path, "failed to write record", e)
        })?;
        self.records += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Flushes the shard and returns the number of records written.
    pub fn finish(self) -> Result<u64> {
        let records = self.records;
        self.writer.finish()?;
        tracing::debug!(path = %self.path.display(), records, "finished shard");
        Ok(records)
    }
}

/// Assigns row ids to shards by contiguous ranges.
#[derive(Debug, Clone, Copy)]
pub struct ShardPartitioner {
    num_rows: u64,
    num_shards: u32,
    block: u64,
}

impl ShardPartitioner {
    pub fn new(num_rows: u64, num_shards: u32) -> Result<Self> {
        if num_shards == 0 {
            return Err(LoaderError::config("num_shards must be greater than 0"));
        }
        let block = num_rows.div_ceil(num_shards as u64).max(1);
        Ok(Self {
            num_rows,
            num_shards,
            block,
        })
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// The shard owning `row`, or `None` if `row >= num_rows`.
    pub fn shard_for_row(&self, row: u32) -> Option<u32> {
        let row = row as u64;
        (row < self.num_rows).then(|| (row / self.block) as u32)
    }

    /// Rows owned by `shard_id`. Trailing shards may own none.
    pub fn row_range(&self, shard_id: u32) -> Range<u64> {
        let start = (shard_id as u64 * self.block).min(self.num_rows);
        let end = (start + self.block).min(self.num_rows);
        start..end
    }
}

/// Writes `records` into `num_shards` shard files, partitioning rows
/// `0..num_rows` by range. All shards are created, including empty ones.
///
/// Returns the record count of each shard.
///
/// # Errors
///
/// Returns a configuration error if a record's row is outside `0..num_rows`.
pub fn write_shards<I>(
    storage: &dyn StorageBackend,
    num_rows: u64,
    num_shards: u32,
    records: I,
) -> Result<Vec<u64>>
where
    I: IntoIterator<Item = Record>,
{
    let partitioner = ShardPartitioner::new(num_rows, num_shards)?;
    let mut writers = (0..num_shards)
        .map(|shard_id| ShardWriter::create(storage, shard_id, num_shards))
        .collect::<Result<Vec<_>>>()?;

    for record in records {
        let shard_id = partitioner.shard_for_row(record.row).ok_or_else(|| {
            LoaderError::config(format!(
                "row {} is outside the matrix of {num_rows} rows",
                record.row
            ))
        })?;
        writers[shard_id as usize].write_record(&record)?;
    }

    let counts = writers
        .into_iter()
        .map(ShardWriter::finish)
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(num_shards, total_records = counts.iter().sum::<u64>(), "wrote shards");
    Ok(counts)
}
