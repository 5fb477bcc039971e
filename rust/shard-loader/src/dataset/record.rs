// rust/shard-loader/src/dataset/record.rs

//! On-disk record layout.
//!
//! A shard is a bare concatenation of 12-byte records, no header or footer:
//!
//! ```text
//! +-----------+-----------+-------------+
//! | row (u32) | col (u32) | value (f32) |
//! +-----------+-----------+-------------+
//! ```
//!
//! All fields are little-endian.

/// Width of one encoded record in bytes.
pub const RECORD_SIZE: usize = 12;

/// One non-zero entry of the sparse matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub row: u32,
    pub col: u32,
    pub value: f32,
}

impl Record {
    pub fn new(row: u32, col: u32, value: f32) -> Self {
        Self { row, col, value }
    }

    /// Encodes this record into its 12-byte on-disk form.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.row.to_le_bytes());
        buf[4..8].copy_from_slice(&self.col.to_le_bytes());
        buf[8..12].copy_from_slice(&self.value.to_le_bytes());
        buf
    }

    /// Decodes the record at the start of `bytes`.
    ///
    /// Returns `None` if fewer than `RECORD_SIZE` bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; RECORD_SIZE] = bytes.get(..RECORD_SIZE)?.try_into().ok()?;
        Some(Self {
            row: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            col: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            value: f32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// Decodes every complete record in `bytes`. A trailing partial record is
/// ignored.
pub fn decode_records(bytes: &[u8]) -> Vec<Record> {
    bytes
        .chunks_exact(RECORD_SIZE)
        .filter_map(Record::from_bytes)
        .collect()
}

/// Canonical shard file name, e.g. `data.bin.00003-of-00064`.
pub fn shard_file_name(shard_id: u32, num_shards: u32) -> String {
    format!("data.bin.{shard_id:05}-of-{num_shards:05}")
}
