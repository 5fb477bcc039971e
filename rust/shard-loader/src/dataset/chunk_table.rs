// rust/shard-loader/src/dataset/chunk_table.rs

//! Yield table for merged chunks.
//!
//! In merge mode chunk `c` reads records `[c * chunk_size, (c + 1) * chunk_size)`
//! from every shard. While all shards still have data a chunk yields
//! `chunk_size * num_shards` records; as shards run out the yield drops. The
//! table stores this as a run-length encoded list of plateaus:
//!
//! ```text
//! shards: [10, 4, 7]   chunk_size: 4
//!
//! chunk     0    1    2
//! shard 0   4    4    2
//! shard 1   4    -    -
//! shard 2   4    3    -
//! yield    12    7    2
//!
//! plateaus: (end 1, yield 12) (end 2, yield 7) (end 3, yield 2)
//! ```

use crate::error::{LoaderError, Result};

/// A run of chunk ids `[previous end, end)` that all yield `chunk_yield`
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plateau {
    /// Exclusive upper chunk id of this run.
    pub end: u64,
    /// Records yielded by each fully materialized chunk in the run.
    pub chunk_yield: u64,
}

/// Merged-chunk yields as a function of chunk id.
#[derive(Debug, Clone)]
pub struct ChunkSizeTable {
    chunk_size: u64,
    plateaus: Vec<Plateau>,
    total: u64,
}

impl ChunkSizeTable {
    /// Builds the table for shards holding `record_counts` records.
    ///
    /// # Errors
    ///
    /// * `Config` if `chunk_size` is zero.
    /// * `InvariantViolation` if the plateaus do not add up to the total
    ///   record count.
    pub fn build(record_counts: &[u64], chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(LoaderError::config("chunk_size must be greater than 0"));
        }

        let mut live: Vec<u64> = record_counts.to_vec();
        let mut plateaus = Vec::new();
        let mut last_end = 0u64;

        while let Some(&smallest) = live.iter().min() {
            // First chunk in which the smallest live shard runs dry.
            let common_idx = smallest / chunk_size;
            if common_idx > last_end {
                plateaus.push(Plateau {
                    end: common_idx,
                    chunk_yield: chunk_size * live.len() as u64,
                });
            }

            let start = common_idx * chunk_size;
            let ends_here = |size: u64| size >= start && size < start + chunk_size;

            let partial: u64 = live
                .iter()
                .filter(|&&size| ends_here(size))
                .map(|&size| size - start)
                .sum();
            live.retain(|&size| !ends_here(size));

            if partial > 0 {
                plateaus.push(Plateau {
                    end: common_idx + 1,
                    chunk_yield: chunk_size * live.len() as u64 + partial,
                });
                last_end = common_idx + 1;
            } else {
                last_end = common_idx;
            }
        }

        let expected: u64 = record_counts.iter().sum();
        Self::from_plateaus(plateaus, chunk_size, expected)
    }

    /// Wraps an explicit plateau list, checking that it yields exactly
    /// `expected_total` records.
    pub fn from_plateaus(plateaus: Vec<Plateau>, chunk_size: u64, expected_total: u64) -> Result<Self> {
        let mut total = 0u64;
        let mut prev = 0u64;
        for plateau in &plateaus {
            if plateau.end <= prev {
                return Err(LoaderError::invariant(format!(
                    "chunk table boundary {} does not follow {}",
                    plateau.end, prev
                )));
            }
            if plateau.chunk_yield == 0 {
                return Err(LoaderError::invariant(format!(
                    "chunk table plateau ending at {} yields no records",
                    plateau.end
                )));
            }
            total += plateau.chunk_yield * (plateau.end - prev);
            prev = plateau.end;
        }

        if total != expected_total {
            return Err(LoaderError::invariant(format!(
                "chunk table yields {total} records but shards hold {expected_total}"
            )));
        }

        Ok(Self {
            chunk_size,
            plateaus,
            total,
        })
    }

    pub fn plateaus(&self) -> &[Plateau] {
        &self.plateaus
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Total records across all chunks.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of chunks that yield any records.
    pub fn num_chunks(&self) -> u64 {
        self.plateaus.last().map_or(0, |p| p.end)
    }

    /// Records yielded by `chunk_id`, zero past the end.
    pub fn chunk_yield(&self, chunk_id: u64) -> u64 {
        self.plateaus
            .iter()
            .find(|p| chunk_id < p.end)
            .map_or(0, |p| p.chunk_yield)
    }

    /// Maps a global record offset to `(chunk_id, offset_within_chunk)`.
    ///
    /// Returns `None` if `offset` is at or past `total()`.
    pub fn resolve(&self, offset: u64) -> Option<(u64, u64)> {
        let mut remaining = offset;
        let mut prev = 0u64;
        for plateau in &self.plateaus {
            let span = (plateau.end - prev) * plateau.chunk_yield;
            if remaining < span {
                let chunk_id = prev + remaining / plateau.chunk_yield;
                return Some((chunk_id, remaining % plateau.chunk_yield));
            }
            remaining -= span;
            prev = plateau.end;
        }
        None
    }
}
