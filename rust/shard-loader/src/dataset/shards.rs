// rust/shard-loader/src/dataset/shards.rs

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{LoaderError, Result};
use crate::storage::{StorageBackend, StorageReader};

use super::record::{shard_file_name, RECORD_SIZE};

/// One open shard file.
struct ShardHandle {
    path: PathBuf,
    reader: Box<dyn StorageReader>,
    /// Number of records, fixed at open time.
    records: u64,
    /// Record index the reader is positioned at, or `None` when unknown.
    cursor: Option<u64>,
}

/// The open shard files of one matrix and their record counts.
///
/// Record counts are computed once when the set is opened; shards are not
/// expected to grow. Each shard keeps its own read cursor so sequential reads
/// do not seek. Handles are closed when the set is dropped.
pub struct ShardRecordSet {
    shards: Vec<ShardHandle>,
}

impl ShardRecordSet {
    /// Opens `data.bin.{i:05}-of-{num_shards:05}` for every `i` in
    /// `0..num_shards`, relative to the storage root.
    ///
    /// # Errors
    ///
    /// * `MissingShard` if a shard file does not exist.
    /// * `InvalidShard` if a shard's byte length is not a multiple of
    ///   `RECORD_SIZE`.
    /// * `Storage` if a shard cannot be opened.
    pub fn open(storage: &dyn StorageBackend, num_shards: u32) -> Result<Self> {
        if num_shards == 0 {
            return Err(LoaderError::config("num_shards must be greater than 0"));
        }

        let mut shards = Vec::with_capacity(num_shards as usize);
        for shard_id in 0..num_shards {
            let path = PathBuf::from(shard_file_name(shard_id, num_shards));
            if !storage.exists(&path)? {
                return Err(LoaderError::missing_shard(path));
            }

            let reader = storage.open_read(&path)?;
            let byte_len = reader.size();
            if byte_len % RECORD_SIZE as u64 != 0 {
                return Err(LoaderError::InvalidShard {
                    shard_id,
                    path,
                    byte_len,
                    record_size: RECORD_SIZE,
                });
            }

            let records = byte_len / RECORD_SIZE as u64;
            if records == 0 {
                tracing::warn!(shard_id, path = %path.display(), "shard is empty");
            }

            shards.push(ShardHandle {
                path,
                reader,
                records,
                cursor: Some(0),
            });
        }

        let set = Self { shards };
        tracing::info!(
            num_shards,
            total_records = set.total_records(),
            "opened shard record set"
        );
        Ok(set)
    }

    /// Number of shards in the set.
    pub fn num_shards(&self) -> u32 {
        self.shards.len() as u32
    }

    /// Number of records in `shard_id`.
    pub fn record_count(&self, shard_id: u32) -> Result<u64> {
        Ok(self.handle(shard_id)?.records)
    }

    /// Record counts of all shards, in shard order.
    pub fn record_counts(&self) -> Vec<u64> {
        self.shards.iter().map(|s| s.records).collect()
    }

    /// Sum of all shard record counts.
    pub fn total_records(&self) -> u64 {
        self.shards.iter().map(|s| s.records).sum()
    }

    /// Path of `shard_id` relative to the storage root.
    pub fn path(&self, shard_id: u32) -> Result<&Path> {
        Ok(&self.handle(shard_id)?.path)
    }

    /// Reads up to `max_records` whole records of `shard_id` starting at
    /// record `start_record`.
    ///
    /// Seeks only when the shard's cursor is not already at `start_record`.
    /// Returns an empty buffer at or past the end of the shard.
    ///
    /// # Errors
    ///
    /// Returns `ShortRead` if the shard yields fewer records than its size at
    /// open time promised, and `Storage` on I/O failure.
    pub fn read(&mut self, shard_id: u32, start_record: u64, max_records: u64) -> Result<Vec<u8>> {
        let total_shards = self.num_shards();
        let handle = self
            .shards
            .get_mut(shard_id as usize)
            .ok_or_else(|| LoaderError::shard_out_of_range(shard_id, total_shards))?;

        let wanted = max_records.min(handle.records.saturating_sub(start_record));
        if wanted == 0 {
            return Ok(Vec::new());
        }

        if handle.cursor != Some(start_record) {
            tracing::debug!(shard_id, from = ?handle.cursor, to = start_record, "seeking shard");
            handle
                .reader
                .seek(SeekFrom::Start(start_record * RECORD_SIZE as u64))
                .map_err(|e| {
                    handle.cursor = None;
                    LoaderError::storage_with_source(
                        &handle.path,
                        format!("failed to seek to record {start_record}"),
                        e,
                    )
                })?;
            handle.cursor = Some(start_record);
        }

        let byte_len = wanted * RECORD_SIZE as u64;
        let mut buf = Vec::with_capacity(byte_len as usize);
        let read = handle
            .reader
            .by_ref()
            .take(byte_len)
            .read_to_end(&mut buf)
            .map_err(|e| {
                handle.cursor = None;
                LoaderError::storage_with_source(
                    &handle.path,
                    format!("failed to read {wanted} records at record {start_record}"),
                    e,
                )
            })?;

        if (read as u64) < byte_len {
            handle.cursor = None;
            tracing::warn!(shard_id, start_record, wanted, read, "shard shrank since it was opened");
            return Err(LoaderError::ShortRead {
                shard_id,
                path: handle.path.clone(),
                start_record,
                expected: wanted,
                actual: (read / RECORD_SIZE) as u64,
            });
        }

        handle.cursor = Some(start_record + wanted);
        Ok(buf)
    }

    fn handle(&self, shard_id: u32) -> Result<&ShardHandle> {
        self.shards
            .get(shard_id as usize)
            .ok_or_else(|| LoaderError::shard_out_of_range(shard_id, self.num_shards()))
    }
}

impl Drop for ShardRecordSet {
    fn drop(&mut self) {
        tracing::debug!(num_shards = self.shards.len(), "closing shard files");
    }
}
