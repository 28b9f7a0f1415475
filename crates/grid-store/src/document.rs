//! Row documents: the unit of storage.
//!
//! One document holds, for a single `(projection, valid_time, run_time, y,
//! x_shard)`, one compressed segment per field that had data for that shard.
//! Documents are built whole in memory and inserted once; they are never
//! assembled incrementally in the store.

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::{DateTime, Utc};

use crate::config::{GridStoreConfig, SnapshotReduction};
use crate::envelope::{self, EnvelopeFormat, Segment};
use crate::error::{GridStoreError, Result};
use crate::shard;
use crate::types::{FieldId, Grid, Projection, WriteSet};

/// Prefix of the attribute name a field's segment is stored under.
pub const FIELD_ATTR_PREFIX: &str = "f";

/// Attribute name for a field, e.g. `f42`.
pub fn field_attr(field_id: FieldId) -> String {
    format!("{}{}", FIELD_ATTR_PREFIX, field_id.0)
}

/// Inverse of [`field_attr`]; `None` for attributes that are not fields.
pub fn parse_field_attr(attr: &str) -> Option<FieldId> {
    attr.strip_prefix(FIELD_ATTR_PREFIX)?
        .parse()
        .ok()
        .map(FieldId)
}

/// Identity of a row document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub proj_id: i32,
    pub valid_time: DateTime<Utc>,
    pub run_time: DateTime<Utc>,
    pub y: usize,
    /// First column of the shard; a multiple of the shard width.
    pub x_shard: usize,
}

/// A persisted row document.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDocument {
    pub key: RowKey,
    /// Segments by attribute name (`f<field_id>`).
    pub segments: BTreeMap<String, Segment>,
}

impl RowDocument {
    pub fn new(key: RowKey) -> Self {
        Self {
            key,
            segments: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, field_id: FieldId, segment: Segment) {
        self.segments.insert(field_attr(field_id), segment);
    }

    pub fn segment(&self, field_id: FieldId) -> Option<&Segment> {
        self.segments.get(&field_attr(field_id))
    }

    /// Fields with a segment in this document.
    pub fn fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.segments.keys().filter_map(|attr| parse_field_attr(attr))
    }

    /// Whether any segment still uses the pre-envelope form.
    pub fn has_legacy_segments(&self) -> bool {
        self.segments.values().any(Segment::is_legacy)
    }
}

/// Build every document for row `y` of a write.
///
/// One document is produced per distinct `(valid_time, run_time, x_shard)`;
/// each write key with at least one grid contributes one segment to each of
/// its shards. Grids must already match the projection.
pub fn build_row_documents(
    projection: &Projection,
    write_set: &WriteSet,
    y: usize,
    config: &GridStoreConfig,
) -> Result<Vec<RowDocument>> {
    if y >= projection.n_y {
        return Err(GridStoreError::shape_mismatch(
            format!("row < {}", projection.n_y),
            format!("row {}", y),
        ));
    }

    let width = config.n_x_per_row;
    let mut docs: BTreeMap<(DateTime<Utc>, DateTime<Utc>, usize), RowDocument> = BTreeMap::new();

    for (key, grids) in write_set.iter() {
        if grids.is_empty() {
            continue;
        }
        if let Some(bad) = grids.iter().find(|g| !g.matches(projection)) {
            return Err(GridStoreError::shape_mismatch(
                format!("{}x{}", projection.n_y, projection.n_x),
                format!("{}x{} for field {}", bad.n_y(), bad.n_x(), key.field_id),
            ));
        }

        for x_shard in shard::shard_keys(projection.n_x, width) {
            let cols = x_shard..x_shard + shard::shard_width(projection.n_x, x_shard, width);
            let values = reduce_members(grids, y, cols, config.reduction);
            let segment = envelope::encode_with(&EnvelopeFormat::Lzma, config.lzma_preset, &values)?;

            docs.entry((key.valid_time, key.run_time, x_shard))
                .or_insert_with(|| {
                    RowDocument::new(RowKey {
                        proj_id: projection.id,
                        valid_time: key.valid_time,
                        run_time: key.run_time,
                        y,
                        x_shard,
                    })
                })
                .insert(key.field_id, segment);
        }
    }

    Ok(docs.into_values().collect())
}

/// Collapse the grids of one write key into a single row slice.
fn reduce_members(
    grids: &[Grid],
    y: usize,
    cols: Range<usize>,
    reduction: SnapshotReduction,
) -> Vec<f32> {
    match reduction {
        SnapshotReduction::KeepLast => match grids.last() {
            Some(grid) => grid.row(y)[cols].to_vec(),
            None => Vec::new(),
        },
        SnapshotReduction::Mean => {
            let n = grids.len() as f64;
            cols.map(|x| {
                let sum: f64 = grids.iter().map(|g| g.row(y)[x] as f64).sum();
                (sum / n) as f32
            })
            .collect()
        }
    }
}
