// rust/shard-loader/src/config.rs

//! Configuration for the shard loader.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{LoaderError, Result};

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default number of records read from a shard per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

// Top-level loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directory holding the `data.bin.NNNNN-of-NNNNN` shard files.
    pub data_dir: PathBuf,
    /// Number of shard files. Required; zero is rejected by `validate`.
    pub num_shards: u32,
    /// Records per batch.
    pub batch_size: usize,
    /// Records read from each shard per chunk. Should exceed `batch_size`
    /// for shuffling to mix records across batches.
    pub chunk_size: usize,
    /// Permute records within each loaded chunk.
    pub shuffle: bool,
    /// Interleave all shards in every chunk instead of reading them in order.
    pub shard_merge: bool,
    /// Whether the final batch of an epoch may be shorter than `batch_size`.
    pub allow_partial: bool,
    /// Seed for the chunk shuffle generator. `None` seeds from the OS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub storage: StorageConfig,
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Buffer size in bytes for buffered shard reads and writes.
    pub buffer_size: usize,
    // Whether to memory-map large shard files.
    pub use_mmap: bool,
    // File size threshold (bytes) at or above which to use mmap.
    pub mmap_threshold: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            num_shards: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            shuffle: false,
            shard_merge: false,
            allow_partial: true,
            seed: None,
            storage: StorageConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256 * 1024, // 256 KB
            use_mmap: false,
            mmap_threshold: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl FromStr for LoaderConfig {
    type Err = LoaderError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| LoaderError::config_with_source("failed to parse TOML config", e))
    }
}

impl LoaderConfig {
    /// Configuration for `num_shards` shards under `data_dir`, other fields
    /// at their defaults.
    pub fn new(data_dir: impl Into<PathBuf>, num_shards: u32) -> Self {
        Self {
            data_dir: data_dir.into(),
            num_shards,
            ..Default::default()
        }
    }

    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `SHL_`, e.g. `SHL_BATCH_SIZE` overrides
    // `batch_size` and `SHL_STORAGE_USE_MMAP` overrides `storage.use_mmap`.
    // Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SHL_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SHL_NUM_SHARDS") {
            if let Ok(v) = val.parse() {
                self.num_shards = v;
            }
        }
        if let Ok(val) = std::env::var("SHL_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("SHL_CHUNK_SIZE") {
            if let Ok(v) = val.parse() {
                self.chunk_size = v;
            }
        }
        if let Ok(val) = std::env::var("SHL_SHUFFLE") {
            if let Ok(v) = val.parse() {
                self.shuffle = v;
            }
        }
        if let Ok(val) = std::env::var("SHL_SHARD_MERGE") {
            if let Ok(v) = val.parse() {
                self.shard_merge = v;
            }
        }
        if let Ok(val) = std::env::var("SHL_ALLOW_PARTIAL") {
            if let Ok(v) = val.parse() {
                self.allow_partial = v;
            }
        }
        if let Ok(val) = std::env::var("SHL_SEED") {
            if let Ok(v) = val.parse() {
                self.seed = Some(v);
            }
        }

        // Storage overrides
        if let Ok(val) = std::env::var("SHL_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("SHL_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }
        if let Ok(val) = std::env::var("SHL_STORAGE_MMAP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.storage.mmap_threshold = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(LoaderError::config("num_shards must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(LoaderError::config("batch_size must be greater than 0"));
        }
        if self.chunk_size == 0 {
            return Err(LoaderError::config("chunk_size must be greater than 0"));
        }
        if self.storage.buffer_size == 0 {
            return Err(LoaderError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        if self.shuffle && self.chunk_size <= self.batch_size {
            tracing::warn!(
                chunk_size = self.chunk_size,
                batch_size = self.batch_size,
                "chunk_size does not exceed batch_size; shuffling will barely mix batches"
            );
        }

        Ok(())
    }
}
