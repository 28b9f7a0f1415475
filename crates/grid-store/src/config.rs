//! Configuration for the grid store.

use serde::{Deserialize, Serialize};

/// Default number of grid columns stored together in one row document.
pub const DEFAULT_SHARD_WIDTH: usize = 128;

/// Default xz preset used for new segments.
pub const DEFAULT_LZMA_PRESET: u32 = 6;

/// Configuration for the grid store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridStoreConfig {
    /// Shard width: number of x-columns per row document.
    pub n_x_per_row: usize,

    /// Number of grid rows written concurrently by `put_fields`.
    pub write_pool_size: usize,

    /// Documents per batch when migrating segment envelopes.
    pub migration_batch_size: usize,

    /// xz preset (0-9) for new LZMA segments.
    pub lzma_preset: u32,

    /// How several grids supplied for the same write key are combined.
    pub reduction: SnapshotReduction,
}

impl Default for GridStoreConfig {
    fn default() -> Self {
        Self {
            n_x_per_row: DEFAULT_SHARD_WIDTH,
            write_pool_size: default_pool_size(),
            migration_batch_size: 1000,
            lzma_preset: DEFAULT_LZMA_PRESET,
            reduction: SnapshotReduction::KeepLast,
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl GridStoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GRID_STORE_SHARD_WIDTH") {
            if let Ok(width) = val.parse() {
                config.n_x_per_row = width;
            }
        }

        if let Ok(val) = std::env::var("GRID_STORE_WRITE_POOL_SIZE") {
            if let Ok(size) = val.parse() {
                config.write_pool_size = size;
            }
        }

        if let Ok(val) = std::env::var("GRID_STORE_MIGRATION_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.migration_batch_size = size;
            }
        }

        if let Ok(val) = std::env::var("GRID_STORE_LZMA_PRESET") {
            if let Ok(preset) = val.parse() {
                config.lzma_preset = preset;
            }
        }

        if let Ok(val) = std::env::var("GRID_STORE_REDUCTION") {
            config.reduction = SnapshotReduction::from_str(&val);
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_x_per_row == 0 {
            return Err("n_x_per_row must be > 0".to_string());
        }

        if self.write_pool_size == 0 {
            return Err("write_pool_size must be > 0".to_string());
        }

        if self.migration_batch_size == 0 {
            return Err("migration_batch_size must be > 0".to_string());
        }

        if self.lzma_preset > 9 {
            return Err("lzma_preset must be 0-9".to_string());
        }

        Ok(())
    }

    /// Builder-style override of the worker pool size.
    pub fn with_write_pool_size(mut self, size: usize) -> Self {
        self.write_pool_size = size;
        self
    }

    /// Builder-style override of the shard width.
    pub fn with_shard_width(mut self, width: usize) -> Self {
        self.n_x_per_row = width;
        self
    }
}

/// Policy for combining several grids supplied under one
/// `(field_id, valid_time, run_time)` key, e.g. ensemble members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReduction {
    /// Only the last grid in the list is stored; earlier members are dropped.
    #[default]
    KeepLast,
    /// The element-wise mean of all grids is stored.
    Mean,
}

impl SnapshotReduction {
    /// Parse from string (case-insensitive). Unknown values fall back to `KeepLast`.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "mean" | "average" => Self::Mean,
            _ => Self::KeepLast,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLast => "keep_last",
            Self::Mean => "mean",
        }
    }
}

impl std::fmt::Display for SnapshotReduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
