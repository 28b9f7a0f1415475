//! Shard addressing.
//!
//! Each grid row is cut into fixed-width column ranges starting at
//! `0, W, 2W, ...`. The last shard of a grid whose width is not a multiple of
//! `W` is narrower; segments are never padded.

use crate::error::{GridStoreError, Result};

/// Where a column lives: the shard's first column and the index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardLocation {
    pub shard_key: usize,
    pub offset: usize,
}

/// Resolve the shard that owns x-coordinate `x`.
///
/// Sub-cell precision is dropped: the offset is truncated to the column at or
/// below `x`. A coordinate exactly on a boundary belongs to the shard that
/// starts there.
pub fn locate(x: f64, shard_width: usize) -> Result<ShardLocation> {
    if !x.is_finite() || x < 0.0 {
        return Err(GridStoreError::invalid_location(format!(
            "x must be a finite, non-negative column coordinate (got {})",
            x
        )));
    }
    if shard_width == 0 {
        return Err(GridStoreError::Config("shard width must be > 0".to_string()));
    }

    let w = shard_width as f64;
    let shard_key = ((x / w).floor() * w) as usize;
    let offset = (x - shard_key as f64).trunc() as usize;

    Ok(ShardLocation { shard_key, offset })
}

/// Number of columns held by the shard starting at `shard_key`.
pub fn shard_width(n_x: usize, shard_key: usize, shard_width: usize) -> usize {
    shard_width.min(n_x.saturating_sub(shard_key))
}

/// First column of every shard of a grid `n_x` columns wide.
pub fn shard_keys(n_x: usize, shard_width: usize) -> impl Iterator<Item = usize> {
    (0..n_x).step_by(shard_width.max(1))
}

/// Interpret a row coordinate. Rows are matched exactly, so anything that is
/// not a non-negative whole number cannot address a stored row.
pub fn row_index(y: f64) -> Option<usize> {
    if y.is_finite() && y >= 0.0 && y.fract() == 0.0 {
        Some(y as usize)
    } else {
        None
    }
}
