// rust/shard-loader/src/dataset/traits.rs

use crate::error::Result;

use super::record::Record;

/// One batch of sparse matrix entries in columnar form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Position of this batch within the epoch.
    pub index: u64,
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
    pub values: Vec<f32>,
}

impl Batch {
    pub fn with_capacity(index: u64, capacity: usize) -> Self {
        Self {
            index,
            rows: Vec::with_capacity(capacity),
            cols: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates the batch as records.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.values)
            .map(|((&row, &col), &value)| Record::new(row, col, value))
    }

    /// Splits the batch into its `(rows, cols, values)` columns.
    pub fn into_parts(self) -> (Vec<u32>, Vec<u32>, Vec<f32>) {
        (self.rows, self.cols, self.values)
    }
}

/// An indexable, length-bearing source of batches.
///
/// This is what a training loop consumes. Indices in `0..length()` are valid
/// and may be requested in any order; asking for index 0 again starts a new
/// epoch.
pub trait BatchSource {
    /// Number of batches in one epoch.
    fn length(&self) -> u64;

    /// Assembles batch `index`.
    fn get_batch(&mut self, index: u64) -> Result<Batch>;

    /// Releases the source's resources.
    fn close(self)
    where
        Self: Sized,
    {
    }

    /// Iterates one full epoch in index order.
    fn epoch(&mut self) -> Epoch<'_, Self>
    where
        Self: Sized,
    {
        Epoch::new(self)
    }
}

/// Iterator over batches `0..length()` of a [`BatchSource`].
///
/// Stops after the first error.
pub struct Epoch<'a, S: BatchSource> {
    source: &'a mut S,
    next_index: u64,
    length: u64,
}

impl<'a, S: BatchSource> Epoch<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        let length = source.length();
        Self {
            source,
            next_index: 0,
            length,
        }
    }
}

impl<S: BatchSource> Iterator for Epoch<'_, S> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.length {
            return None;
        }

        let result = self.source.get_batch(self.next_index);
        self.next_index = if result.is_ok() {
            self.next_index + 1
        } else {
            self.length
        };
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.length - self.next_index) as usize;
        (0, Some(remaining))
    }
}
