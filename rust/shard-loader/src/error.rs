// rust/shard-loader/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Shard file '{path}' is missing")]
    MissingShard {
        path: PathBuf,
    },

    #[error("Shard {shard_id} at '{path}' is {byte_len} bytes, not a multiple of the {record_size}-byte record width")]
    InvalidShard {
        shard_id: u32,
        path: PathBuf,
        byte_len: u64,
        record_size: usize,
    },

    #[error("Shard {shard_id} out of range (total shards: {total_shards})")]
    ShardOutOfRange {
        shard_id: u32,
        total_shards: u32,
    },

    #[error("Shard {shard_id} at '{path}' returned {actual} of {expected} records at record {start_record}")]
    ShortRead {
        shard_id: u32,
        path: PathBuf,
        start_record: u64,
        expected: u64,
        actual: u64,
    },

    #[error("Invariant violated: {message}")]
    InvariantViolation {
        message: String,
    },

    #[error("Data exhausted at batch {batch_index}: {message}")]
    DataExhausted {
        batch_index: u64,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, LoaderError>;

// Convenience constructors
impl LoaderError {

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn missing_shard(path: impl Into<PathBuf>) -> Self {
        Self::MissingShard { path: path.into() }
    }

    pub fn shard_out_of_range(shard_id: u32, total_shards: u32) -> Self {
        Self::ShardOutOfRange { shard_id, total_shards }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn data_exhausted(batch_index: u64, message: impl Into<String>) -> Self {
        Self::DataExhausted {
            batch_index,
            message: message.into(),
        }
    }

    /// True for errors raised while validating shard files or settings,
    /// before any batch is served.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::MissingShard { .. } | Self::InvalidShard { .. }
        )
    }

    /// Turns a short shard read into `DataExhausted` for the batch that
    /// needed the records. Other errors pass through.
    pub fn at_batch(self, batch_index: u64) -> Self {
        if matches!(self, Self::ShortRead { .. }) {
            Self::data_exhausted(batch_index, self.to_string())
        } else {
            self
        }
    }

    /// The underlying I/O error, if this is a storage failure.
    pub fn io_source(&self) -> Option<&std::io::Error> {
        match self {
            Self::Storage { source, .. } => source.as_ref(),
            _ => None,
        }
    }
}
