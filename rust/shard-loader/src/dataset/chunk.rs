// rust/shard-loader/src/dataset/chunk.rs

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::Result;

use super::record::{Record, RECORD_SIZE};
use super::shards::ShardRecordSet;

/// Multiplier used to spread chunk ids across the shuffle seed space.
const CHUNK_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// How chunk ids map onto shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Each chunk is a window of one shard; shards are consumed in order.
    Sequential,
    /// Each chunk holds the same window of every shard, concatenated in shard
    /// order.
    Merged,
}

/// A materialized window of records in columnar form.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    chunk_id: u64,
    rows: Vec<u32>,
    cols: Vec<u32>,
    values: Vec<f32>,
}

impl Chunk {
    fn with_capacity(chunk_id: u64, capacity: usize) -> Self {
        Self {
            chunk_id,
            rows: Vec::with_capacity(capacity),
            cols: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    fn extend_from_bytes(&mut self, bytes: &[u8]) {
        for record in bytes.chunks_exact(RECORD_SIZE).filter_map(Record::from_bytes) {
            self.rows.push(record.row);
            self.cols.push(record.col);
            self.values.push(record.value);
        }
    }

    /// Applies one permutation to all three columns.
    fn permute(&mut self, rng: &mut StdRng) {
        let mut perm: Vec<usize> = (0..self.len()).collect();
        perm.shuffle(rng);

        self.rows = perm.iter().map(|&i| self.rows[i]).collect();
        self.cols = perm.iter().map(|&i| self.cols[i]).collect();
        self.values = perm.iter().map(|&i| self.values[i]).collect();
    }

    pub fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[u32] {
        &self.rows
    }

    pub fn cols(&self) -> &[u32] {
        &self.cols
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn record(&self, i: usize) -> Option<Record> {
        Some(Record::new(*self.rows.get(i)?, self.cols[i], self.values[i]))
    }
}

/// Finds the shard and starting record of `chunk_id` in sequential mode.
///
/// Shard `i` owns `ceil(records_i / chunk_size)` consecutive chunk ids; empty
/// shards own none. Returns `None` past the last chunk.
pub fn locate_sequential_chunk(
    record_counts: &[u64],
    chunk_size: u64,
    chunk_id: u64,
) -> Option<(u32, u64)> {
    let mut remaining = chunk_id;
    for (shard_id, &records) in record_counts.iter().enumerate() {
        let chunks = records.div_ceil(chunk_size);
        if remaining < chunks {
            return Some((shard_id as u32, remaining * chunk_size));
        }
        remaining -= chunks;
    }
    None
}

/// Single-slot cache holding the most recently loaded chunk.
///
/// The cache owns the shard record set it reads from. Loading a different
/// chunk id replaces the cached chunk.
pub struct ChunkCache {
    shards: ShardRecordSet,
    chunk_size: u64,
    mode: ReadMode,
    /// Base seed for per-chunk permutations; `None` disables shuffling.
    shuffle_seed: Option<u64>,
    current: Option<Chunk>,
}

impl ChunkCache {
    pub fn new(shards: ShardRecordSet, chunk_size: u64, mode: ReadMode) -> Self {
        Self {
            shards,
            chunk_size,
            mode,
            shuffle_seed: None,
            current: None,
        }
    }

    /// Enables shuffling within each chunk.
    ///
    /// The permutation of a chunk depends only on `seed` and the chunk id, so
    /// reloading a chunk reproduces the same order.
    #[must_use]
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Replaces the shuffle seed, e.g. once per epoch, and drops the cached
    /// chunk so the next load uses the new permutation. No effect when
    /// shuffling is disabled.
    pub fn reseed(&mut self, seed: u64) {
        if self.shuffle_seed.is_some() {
            self.shuffle_seed = Some(seed);
            self.current = None;
        }
    }

    pub fn shards(&self) -> &ShardRecordSet {
        &self.shards
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle_seed.is_some()
    }

    /// The cached chunk, if any.
    pub fn current(&self) -> Option<&Chunk> {
        self.current.as_ref()
    }

    /// Makes `chunk_id` the cached chunk.
    ///
    /// Returns `Ok(false)` when the chunk holds no records, which marks the
    /// end of the stream; the previously cached chunk is kept in that case.
    pub fn load(&mut self, chunk_id: u64) -> Result<bool> {
        if self.current.as_ref().is_some_and(|c| c.chunk_id == chunk_id) {
            return Ok(true);
        }

        let chunk = match self.mode {
            ReadMode::Sequential => self.read_sequential(chunk_id)?,
            ReadMode::Merged => self.read_merged(chunk_id)?,
        };

        let Some(mut chunk) = chunk else {
            tracing::debug!(chunk_id, "chunk is past the end of the data");
            return Ok(false);
        };

        if let Some(seed) = self.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed ^ chunk_id.wrapping_mul(CHUNK_SEED_MIX));
            chunk.permute(&mut rng);
        }

        tracing::debug!(chunk_id, records = chunk.len(), mode = ?self.mode, "loaded chunk");
        self.current = Some(chunk);
        Ok(true)
    }

    fn read_sequential(&mut self, chunk_id: u64) -> Result<Option<Chunk>> {
        let counts = self.shards.record_counts();
        let Some((shard_id, start)) = locate_sequential_chunk(&counts, self.chunk_size, chunk_id)
        else {
            return Ok(None);
        };

        let bytes = self.shards.read(shard_id, start, self.chunk_size)?;
        if bytes.is_empty() {
            return Ok(None);
        }

        let mut chunk = Chunk::with_capacity(chunk_id, bytes.len() / RECORD_SIZE);
        chunk.extend_from_bytes(&bytes);
        Ok(Some(chunk))
    }

    fn read_merged(&mut self, chunk_id: u64) -> Result<Option<Chunk>> {
        let start = chunk_id.saturating_mul(self.chunk_size);
        let mut chunk = Chunk::with_capacity(chunk_id, 0);

        for shard_id in 0..self.shards.num_shards() {
            if start >= self.shards.record_count(shard_id)? {
                continue;
            }
            let bytes = self.shards.read(shard_id, start, self.chunk_size)?;
            chunk.extend_from_bytes(&bytes);
        }

        if chunk.is_empty() {
            return Ok(None);
        }
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::record::shard_file_name;
    use crate::storage::memory::MemoryStorage;

    /// Shard `s` holds rows `s * 100 .. s * 100 + sizes[s]`.
    fn storage_with(sizes: &[u32]) -> MemoryStorage {
        let storage = MemoryStorage::new();
        let n = sizes.len() as u32;
        for (shard, &size) in sizes.iter().enumerate() {
            let base = shard as u32 * 100;
            let bytes = (base..base + size)
                .flat_map(|row| Record::new(row, row + 1, row as f32 * 0.5).to_bytes())
                .collect();
            storage.add_file(shard_file_name(shard as u32, n), bytes);
        }
        storage
    }

    fn cache(storage: &MemoryStorage, n: u32, chunk_size: u64, mode: ReadMode) -> ChunkCache {
        ChunkCache::new(ShardRecordSet::open(storage, n).unwrap(), chunk_size, mode)
    }

    #[test]
    fn test_locate_sequential_chunk() {
        let counts = [10, 0, 4, 5];
        assert_eq!(locate_sequential_chunk(&counts, 4, 0), Some((0, 0)));
        assert_eq!(locate_sequential_chunk(&counts, 4, 2), Some((0, 8)));
        // Empty shard 1 owns no chunks
        assert_eq!(locate_sequential_chunk(&counts, 4, 3), Some((2, 0)));
        assert_eq!(locate_sequential_chunk(&counts, 4, 4), Some((3, 0)));
        assert_eq!(locate_sequential_chunk(&counts, 4, 5), Some((3, 4)));
        assert_eq!(locate_sequential_chunk(&counts, 4, 6), None);
    }

    #[test]
    fn test_sequential_first_chunk_is_shard_zero() {
        let storage = storage_with(&[6, 6]);
        let mut cache = cache(&storage, 2, 4, ReadMode::Sequential);

        assert!(cache.load(0).unwrap());
        let chunk = cache.current().unwrap();
        assert_eq!(chunk.rows(), &[0, 1, 2, 3]);

        assert!(cache.load(1).unwrap());
        assert_eq!(cache.current().unwrap().rows(), &[4, 5]);

        assert!(cache.load(2).unwrap());
        assert_eq!(cache.current().unwrap().rows(), &[100, 101, 102, 103]);
    }

    #[test]
    fn test_merged_chunk_interleaves_shards() {
        let storage = storage_with(&[6, 2, 5]);
        let mut cache = cache(&storage, 3, 4, ReadMode::Merged);

        assert!(cache.load(0).unwrap());
        let chunk = cache.current().unwrap();
        assert_eq!(
            chunk.rows(),
            &[0, 1, 2, 3, 100, 101, 200, 201, 202, 203]
        );

        assert!(cache.load(1).unwrap());
        assert_eq!(cache.current().unwrap().rows(), &[4, 5, 204]);

        assert!(!cache.load(2).unwrap());
    }

    #[test]
    fn test_columns_stay_aligned() {
        let storage = storage_with(&[5]);
        let mut cache = cache(&storage, 1, 8, ReadMode::Sequential);

        cache.load(0).unwrap();
        let chunk = cache.current().unwrap();
        for i in 0..chunk.len() {
            let record = chunk.record(i).unwrap();
            assert_eq!(record.col, record.row + 1);
            assert_eq!(record.value, record.row as f32 * 0.5);
        }
        assert_eq!(chunk.record(chunk.len()), None);
    }

    #[test]
    fn test_end_of_stream_keeps_cached_chunk() {
        let storage = storage_with(&[3]);
        let mut cache = cache(&storage, 1, 4, ReadMode::Sequential);

        assert!(cache.load(0).unwrap());
        assert!(!cache.load(1).unwrap());
        assert_eq!(cache.current().unwrap().chunk_id(), 0);
    }

    #[test]
    fn test_cached_chunk_is_not_reread() {
        let storage = storage_with(&[8, 8]);
        let mut cache = cache(&storage, 2, 4, ReadMode::Merged);

        cache.load(1).unwrap();
        let seeks = storage.seek_count();
        cache.load(1).unwrap();
        cache.load(1).unwrap();
        assert_eq!(storage.seek_count(), seeks);
    }

    #[test]
    fn test_reload_after_advancing_reseeks() {
        let storage = storage_with(&[8]);
        let mut cache = cache(&storage, 1, 4, ReadMode::Sequential);

        cache.load(0).unwrap();
        cache.load(1).unwrap();
        assert_eq!(storage.seek_count(), 0);

        cache.load(0).unwrap();
        assert_eq!(storage.seek_count(), 1);
        assert_eq!(cache.current().unwrap().rows(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let storage = storage_with(&[64]);
        let mut cache = cache(&storage, 1, 64, ReadMode::Sequential).with_shuffle(7);

        cache.load(0).unwrap();
        let chunk = cache.current().unwrap();
        let mut rows = chunk.rows().to_vec();
        assert_ne!(rows, (0..64).collect::<Vec<u32>>());

        for i in 0..chunk.len() {
            let record = chunk.record(i).unwrap();
            assert_eq!(record.col, record.row + 1);
        }

        rows.sort_unstable();
        assert_eq!(rows, (0..64).collect::<Vec<u32>>());
    }

    #[test]
    fn test_shuffle_is_reproducible() {
        let storage = storage_with(&[32, 32]);
        let mut cache = cache(&storage, 2, 16, ReadMode::Merged).with_shuffle(42);

        cache.load(0).unwrap();
        let first = cache.current().unwrap().rows().to_vec();
        cache.load(1).unwrap();
        cache.load(0).unwrap();
        assert_eq!(cache.current().unwrap().rows(), first.as_slice());

        cache.reseed(43);
        cache.load(0).unwrap();
        assert_ne!(cache.current().unwrap().rows(), first.as_slice());
    }
}
