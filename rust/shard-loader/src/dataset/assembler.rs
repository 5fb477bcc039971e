// rust/shard-loader/src/dataset/assembler.rs

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::storage::{LocalStorage, StorageBackend};

use super::chunk::{ChunkCache, ReadMode};
use super::chunk_table::ChunkSizeTable;
use super::shards::ShardRecordSet;
use super::traits::{Batch, BatchSource};

/// Where the assembler stood after the last `get_batch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// The last batch was served without leaving its first chunk, or no
    /// batch has been requested yet.
    Ready,
    /// The last batch spanned more than one chunk.
    Draining,
    /// The last call ran out of data.
    Exhausted,
}

/// Maps global record offsets to chunks.
#[derive(Debug, Clone)]
enum IndexLayout {
    Sequential { record_counts: Vec<u64> },
    Merged(ChunkSizeTable),
}

/// Serves fixed-size batches from a set of shard files.
///
/// Batch `i` covers records `[i * batch_size, (i + 1) * batch_size)` of the
/// stream, where the stream is either the shards one after another
/// (sequential mode) or their chunk-by-chunk interleaving (merge mode).
/// Resolution of an index depends only on the shard sizes, so indices can be
/// requested in any order and asking for index 0 again starts a new epoch.
///
/// Not thread-safe: use one assembler per worker.
///
/// # Example
///
/// ```no_run
/// use shard_loader::{BatchAssembler, BatchSource, LoaderConfig};
///
/// let mut config = LoaderConfig::new("/data/matrix", 64);
/// config.batch_size = 4096;
/// config.shard_merge = true;
/// config.shuffle = true;
///
/// let mut assembler = BatchAssembler::open(&config)?;
/// for batch in assembler.epoch() {
///     let batch = batch?;
///     // feed batch.rows / batch.cols / batch.values to the model
/// }
/// # Ok::<(), shard_loader::LoaderError>(())
/// ```
pub struct BatchAssembler {
    config: LoaderConfig,
    layout: IndexLayout,
    cache: ChunkCache,
    total: u64,
    state: AssemblerState,
}

impl BatchAssembler {
    /// Opens the shards under `config.data_dir` on the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings or a missing or
    /// malformed shard, and an invariant violation if the merged chunk table
    /// is inconsistent.
    pub fn open(config: &LoaderConfig) -> Result<Self> {
        let storage = LocalStorage::new(&config.data_dir, &config.storage);
        Self::with_storage(&storage, config).map_err(|e| match e {
            LoaderError::MissingShard { path } => LoaderError::MissingShard {
                path: config.data_dir.join(path),
            },
            other => other,
        })
    }

    /// Opens the shards from an arbitrary storage backend. Shard files are
    /// looked up relative to the backend's root; `config.data_dir` is not
    /// consulted.
    pub fn with_storage(storage: &dyn StorageBackend, config: &LoaderConfig) -> Result<Self> {
        config.validate()?;

        let shards = ShardRecordSet::open(storage, config.num_shards)?;
        let record_counts = shards.record_counts();
        let total = shards.total_records();
        let chunk_size = config.chunk_size as u64;

        let (layout, mode) = if config.shard_merge {
            let table = ChunkSizeTable::build(&record_counts, chunk_size)?;
            tracing::debug!(plateaus = ?table.plateaus(), "built merged chunk table");
            (IndexLayout::Merged(table), ReadMode::Merged)
        } else {
            (IndexLayout::Sequential { record_counts }, ReadMode::Sequential)
        };

        let mut cache = ChunkCache::new(shards, chunk_size, mode);
        if config.shuffle {
            cache = cache.with_shuffle(config.seed.unwrap_or_else(rand::random));
        }

        let assembler = Self {
            config: config.clone(),
            layout,
            cache,
            total,
            state: AssemblerState::Ready,
        };

        tracing::info!(
            num_shards = config.num_shards,
            total_records = total,
            batches = assembler.length(),
            batch_size = config.batch_size,
            chunk_size = config.chunk_size,
            mode = ?mode,
            shuffle = config.shuffle,
            "batch assembler ready"
        );
        Ok(assembler)
    }

    /// Number of batches in one epoch.
    pub fn length(&self) -> u64 {
        let batch_size = self.config.batch_size as u64;
        if self.config.allow_partial {
            self.total.div_ceil(batch_size)
        } else {
            self.total / batch_size
        }
    }

    /// Total records across all shards.
    pub fn total_size(&self) -> u64 {
        self.total
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn num_shards(&self) -> u32 {
        self.cache.shards().num_shards()
    }

    pub fn record_counts(&self) -> Vec<u64> {
        self.cache.shards().record_counts()
    }

    /// The merged chunk table; `None` in sequential mode.
    pub fn chunk_table(&self) -> Option<&ChunkSizeTable> {
        match &self.layout {
            IndexLayout::Merged(table) => Some(table),
            IndexLayout::Sequential { .. } => None,
        }
    }

    /// Changes the shuffle seed for subsequent chunk loads. Call between
    /// epochs to vary the order; no effect when shuffling is off.
    pub fn set_shuffle_seed(&mut self, seed: u64) {
        self.cache.reseed(seed);
    }

    /// Maps a global record offset to `(chunk_id, offset_within_chunk)`.
    pub fn resolve(&self, offset: u64) -> Option<(u64, u64)> {
        let chunk_size = self.config.chunk_size as u64;
        match &self.layout {
            IndexLayout::Merged(table) => table.resolve(offset),
            IndexLayout::Sequential { record_counts } => {
                let mut remaining = offset;
                let mut first_chunk = 0u64;
                for &records in record_counts {
                    if remaining < records {
                        return Some((
                            first_chunk + remaining / chunk_size,
                            remaining % chunk_size,
                        ));
                    }
                    remaining -= records;
                    first_chunk += records.div_ceil(chunk_size);
                }
                None
            }
        }
    }

    /// Assembles batch `index`.
    ///
    /// # Errors
    ///
    /// * `DataExhausted` if `index >= length()`, or if the data runs out
    ///   before the batch is full while partial batches are disallowed.
    /// * `InvariantViolation` if the shard contents disagree with the sizes
    ///   recorded at open time.
    /// * `Storage` on I/O failure.
    pub fn get_batch(&mut self, index: u64) -> Result<Batch> {
        let length = self.length();
        if index >= length {
            self.state = AssemblerState::Exhausted;
            return Err(LoaderError::data_exhausted(
                index,
                format!("epoch has {length} batches"),
            ));
        }

        let batch_size = self.config.batch_size;
        let offset = index * batch_size as u64;
        let (mut chunk_id, within) = self.resolve(offset).ok_or_else(|| {
            LoaderError::invariant(format!(
                "record offset {offset} does not resolve although {} records are recorded",
                self.total
            ))
        })?;

        if !self.load_chunk(index, chunk_id)? {
            self.state = AssemblerState::Exhausted;
            return Err(LoaderError::data_exhausted(
                index,
                format!("chunk {chunk_id} returned no records"),
            ));
        }

        let mut position = within as usize;
        let mut batch = Batch::with_capacity(index, batch_size);
        self.state = AssemblerState::Ready;

        while batch.len() < batch_size {
            let chunk = self.cache.current().ok_or_else(|| {
                LoaderError::invariant(format!("chunk {chunk_id} vanished from the cache"))
            })?;

            if position > chunk.len() {
                return Err(LoaderError::invariant(format!(
                    "offset {position} is beyond the {} records of chunk {chunk_id}",
                    chunk.len()
                )));
            }

            let available = chunk.len() - position;
            if available > 0 {
                let take = available.min(batch_size - batch.len());
                let range = position..position + take;
                batch.rows.extend_from_slice(&chunk.rows()[range.clone()]);
                batch.cols.extend_from_slice(&chunk.cols()[range.clone()]);
                batch.values.extend_from_slice(&chunk.values()[range]);
                position += take;
                continue;
            }

            chunk_id += 1;
            self.state = AssemblerState::Draining;
            if !self.load_chunk(index, chunk_id)? {
                self.state = AssemblerState::Exhausted;
                if self.config.allow_partial {
                    break;
                }
                return Err(LoaderError::data_exhausted(
                    index,
                    format!(
                        "data ended after {} of {batch_size} records",
                        batch.len()
                    ),
                ));
            }
            position = 0;
        }

        Ok(batch)
    }

    /// Loads `chunk_id` on behalf of batch `index`. A shard that no longer
    /// holds the records counted at open time exhausts the batch, whatever
    /// the partial-batch policy.
    fn load_chunk(&mut self, index: u64, chunk_id: u64) -> Result<bool> {
        match self.cache.load(chunk_id) {
            Err(e @ LoaderError::ShortRead { .. }) => {
                self.state = AssemblerState::Exhausted;
                Err(e.at_batch(index))
            }
            other => other,
        }
    }

    /// Closes all shard files.
    pub fn close(self) {
        tracing::debug!(num_shards = self.num_shards(), "closing batch assembler");
    }
}

impl BatchSource for BatchAssembler {
    fn length(&self) -> u64 {
        BatchAssembler::length(self)
    }

    fn get_batch(&mut self, index: u64) -> Result<Batch> {
        BatchAssembler::get_batch(self, index)
    }

    fn close(self) {
        BatchAssembler::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::record::{shard_file_name, Record};
    use crate::storage::memory::MemoryStorage;
    use std::collections::HashSet;

    /// Shard `s` holds rows `s * 1000 ..` with `sizes[s]` records.
    fn storage_with(sizes: &[u32]) -> MemoryStorage {
        let storage = MemoryStorage::new();
        let n = sizes.len() as u32;
        for (shard, &size) in sizes.iter().enumerate() {
            let base = shard as u32 * 1000;
            let bytes = (base..base + size)
                .flat_map(|row| Record::new(row, row % 7, row as f32).to_bytes())
                .collect();
            storage.add_file(shard_file_name(shard as u32, n), bytes);
        }
        storage
    }

    fn config(n: u32, batch_size: usize, chunk_size: usize) -> LoaderConfig {
        let mut config = LoaderConfig::new("unused", n);
        config.batch_size = batch_size;
        config.chunk_size = chunk_size;
        config
    }

    fn all_rows(assembler: &mut BatchAssembler) -> Vec<u32> {
        assembler
            .epoch()
            .flat_map(|b| b.unwrap().rows)
            .collect()
    }

    #[test]
    fn test_length() {
        let storage = storage_with(&[10, 9]);

        let assembler = BatchAssembler::with_storage(&storage, &config(2, 4, 8)).unwrap();
        assert_eq!(assembler.total_size(), 19);
        assert_eq!(assembler.length(), 5);

        let mut strict = config(2, 4, 8);
        strict.allow_partial = false;
        let assembler = BatchAssembler::with_storage(&storage, &strict).unwrap();
        assert_eq!(assembler.length(), 4);
    }

    #[test]
    fn test_sequential_order() {
        let storage = storage_with(&[5, 3]);
        let mut assembler = BatchAssembler::with_storage(&storage, &config(2, 3, 2)).unwrap();

        assert_eq!(assembler.get_batch(0).unwrap().rows, vec![0, 1, 2]);
        assert_eq!(assembler.get_batch(1).unwrap().rows, vec![3, 4, 1000]);
        assert_eq!(assembler.get_batch(2).unwrap().rows, vec![1001, 1002]);
        assert_eq!(assembler.state(), AssemblerState::Exhausted);
    }

    #[test]
    fn test_merged_order() {
        let storage = storage_with(&[5, 3]);
        let mut c = config(2, 3, 2);
        c.shard_merge = true;
        let mut assembler = BatchAssembler::with_storage(&storage, &c).unwrap();

        // chunk 0: 0 1 1000 1001, chunk 1: 2 3 1002, chunk 2: 4
        assert_eq!(
            all_rows(&mut assembler),
            vec![0, 1, 1000, 1001, 2, 3, 1002, 4]
        );
    }

    #[test]
    fn test_batch_spanning_chunks_sets_draining() {
        let storage = storage_with(&[10]);
        let mut assembler = BatchAssembler::with_storage(&storage, &config(1, 4, 3)).unwrap();

        assert_eq!(assembler.get_batch(0).unwrap().rows, vec![0, 1, 2, 3]);
        assert_eq!(assembler.state(), AssemblerState::Draining);

        assert_eq!(assembler.get_batch(1).unwrap().rows, vec![4, 5, 6, 7]);
        assert_eq!(assembler.get_batch(2).unwrap().rows, vec![8, 9]);
        assert_eq!(assembler.state(), AssemblerState::Exhausted);
    }

    #[test]
    fn test_batch_within_chunk_is_ready() {
        let storage = storage_with(&[16]);
        let mut assembler = BatchAssembler::with_storage(&storage, &config(1, 4, 16)).unwrap();

        assembler.get_batch(1).unwrap();
        assert_eq!(assembler.state(), AssemblerState::Ready);
    }

    #[test]
    fn test_random_access_is_idempotent() {
        let storage = storage_with(&[7, 11, 4]);
        let mut c = config(3, 5, 4);
        c.shard_merge = true;
        let mut assembler = BatchAssembler::with_storage(&storage, &c).unwrap();

        let forward: Vec<Batch> = (0..assembler.length())
            .map(|i| assembler.get_batch(i).unwrap())
            .collect();

        for i in (0..assembler.length()).rev() {
            assert_eq!(assembler.get_batch(i).unwrap(), forward[i as usize]);
        }
        assert_eq!(assembler.get_batch(2).unwrap(), forward[2]);
        assert_eq!(assembler.get_batch(2).unwrap(), forward[2]);
    }

    #[test]
    fn test_restart_epoch_by_index_zero() {
        let storage = storage_with(&[6, 6]);
        let mut assembler = BatchAssembler::with_storage(&storage, &config(2, 4, 4)).unwrap();

        let first = all_rows(&mut assembler);
        let second = all_rows(&mut assembler);
        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
    }

    #[test]
    fn test_index_past_length() {
        let storage = storage_with(&[6]);
        let mut assembler = BatchAssembler::with_storage(&storage, &config(1, 4, 4)).unwrap();

        let err = assembler.get_batch(2).unwrap_err();
        assert!(matches!(err, LoaderError::DataExhausted { batch_index: 2, .. }));
        assert_eq!(assembler.state(), AssemblerState::Exhausted);
    }

    #[test]
    fn test_strict_mode_drops_tail() {
        let storage = storage_with(&[6]);
        let mut strict = config(1, 4, 4);
        strict.allow_partial = false;
        let mut assembler = BatchAssembler::with_storage(&storage, &strict).unwrap();

        assert_eq!(assembler.length(), 1);
        assert_eq!(assembler.get_batch(0).unwrap().len(), 4);
        assert!(matches!(
            assembler.get_batch(1),
            Err(LoaderError::DataExhausted { .. })
        ));
    }

    #[test]
    fn test_empty_shards_are_skipped() {
        let storage = storage_with(&[0, 3, 0, 2]);
        for merge in [false, true] {
            let mut c = config(4, 2, 2);
            c.shard_merge = merge;
            let mut assembler = BatchAssembler::with_storage(&storage, &c).unwrap();

            let mut rows = all_rows(&mut assembler);
            rows.sort_unstable();
            assert_eq!(rows, vec![1000, 1001, 1002, 3000, 3001]);
        }
    }

    #[test]
    fn test_all_shards_empty() {
        let storage = storage_with(&[0, 0]);
        let mut assembler = BatchAssembler::with_storage(&storage, &config(2, 4, 4)).unwrap();

        assert_eq!(assembler.length(), 0);
        assert_eq!(assembler.epoch().count(), 0);
    }

    #[test]
    fn test_shuffle_preserves_records() {
        let storage = storage_with(&[50, 30]);
        let mut c = config(2, 8, 16);
        c.shuffle = true;
        c.shard_merge = true;
        c.seed = Some(3);
        let mut assembler = BatchAssembler::with_storage(&storage, &c).unwrap();

        let rows = all_rows(&mut assembler);
        let unique: HashSet<u32> = rows.iter().copied().collect();
        assert_eq!(rows.len(), 80);
        assert_eq!(unique.len(), 80);
    }

    #[test]
    fn test_shuffle_seed_is_reproducible() {
        let storage = storage_with(&[40]);
        let mut c = config(1, 8, 20);
        c.shuffle = true;
        c.seed = Some(11);

        let mut a = BatchAssembler::with_storage(&storage, &c).unwrap();
        let mut b = BatchAssembler::with_storage(&storage, &c).unwrap();
        assert_eq!(all_rows(&mut a), all_rows(&mut b));

        b.set_shuffle_seed(12);
        assert_ne!(all_rows(&mut a), all_rows(&mut b));
    }

    #[test]
    fn test_chunk_table_only_in_merge_mode() {
        let storage = storage_with(&[5, 3]);
        let assembler = BatchAssembler::with_storage(&storage, &config(2, 2, 2)).unwrap();
        assert!(assembler.chunk_table().is_none());

        let mut c = config(2, 2, 2);
        c.shard_merge = true;
        let assembler = BatchAssembler::with_storage(&storage, &c).unwrap();
        assert_eq!(assembler.chunk_table().unwrap().total(), 8);
        assert_eq!(assembler.record_counts(), vec![5, 3]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let storage = storage_with(&[5]);
        let err = BatchAssembler::with_storage(&storage, &config(1, 0, 4))
            .err()
            .unwrap();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_sequential_resolve() {
        let storage = storage_with(&[5, 0, 6]);
        let assembler = BatchAssembler::with_storage(&storage, &config(3, 1, 4)).unwrap();

        assert_eq!(assembler.resolve(0), Some((0, 0)));
        assert_eq!(assembler.resolve(4), Some((1, 0)));
        // Shard 0 owns chunks 0..2, shard 2 starts at chunk 2
        assert_eq!(assembler.resolve(5), Some((2, 0)));
        assert_eq!(assembler.resolve(10), Some((3, 1)));
        assert_eq!(assembler.resolve(11), None);
    }

    #[test]
    fn test_usable_as_trait_object() {
        let storage = storage_with(&[9]);
        let assembler = BatchAssembler::with_storage(&storage, &config(1, 4, 4)).unwrap();

        let mut source: Box<dyn BatchSource> = Box::new(assembler);
        assert_eq!(source.length(), 3);
        assert_eq!(source.get_batch(2).unwrap().len(), 1);
    }
}
