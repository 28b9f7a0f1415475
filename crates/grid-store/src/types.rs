//! Core types shared by the write and read paths.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GridStoreError, Result};

/// A grid's coordinate system, as far as the store cares: an id and its
/// dimensions. Owned by the relational catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub id: i32,
    /// Number of columns.
    pub n_x: usize,
    /// Number of rows.
    pub n_y: usize,
}

impl Projection {
    pub fn new(id: i32, n_x: usize, n_y: usize) -> Self {
        Self { id, n_x, n_y }
    }
}

/// Opaque identifier of one scientific variable from one data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub i32);

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A field a reader asks for, with the metric it measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceField {
    pub id: FieldId,
    pub metric_id: i32,
}

impl SourceField {
    pub fn new(id: i32, metric_id: i32) -> Self {
        Self {
            id: FieldId(id),
            metric_id,
        }
    }
}

/// A full 2-D array of one field, shape `(n_y, n_x)`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    n_x: usize,
    n_y: usize,
    values: Vec<f32>,
}

impl Grid {
    /// Create a grid, checking that `values` holds exactly `n_x * n_y` cells.
    pub fn new(n_x: usize, n_y: usize, values: Vec<f32>) -> Result<Self> {
        if values.len() != n_x * n_y {
            return Err(GridStoreError::shape_mismatch(
                format!("{} values for a {}x{} grid", n_x * n_y, n_y, n_x),
                format!("{} values", values.len()),
            ));
        }
        Ok(Self { n_x, n_y, values })
    }

    /// Create a grid with every cell set to `value`.
    pub fn filled(n_x: usize, n_y: usize, value: f32) -> Self {
        Self {
            n_x,
            n_y,
            values: vec![value; n_x * n_y],
        }
    }

    pub fn n_x(&self) -> usize {
        self.n_x
    }

    pub fn n_y(&self) -> usize {
        self.n_y
    }

    /// Columns of row `y`.
    pub fn row(&self, y: usize) -> &[f32] {
        let start = y * self.n_x;
        &self.values[start..start + self.n_x]
    }

    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.n_x || y >= self.n_y {
            return None;
        }
        Some(self.values[y * self.n_x + x])
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        if x < self.n_x && y < self.n_y {
            self.values[y * self.n_x + x] = value;
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Whether this grid matches the projection's declared dimensions.
    pub fn matches(&self, projection: &Projection) -> bool {
        self.n_x == projection.n_x && self.n_y == projection.n_y
    }
}

/// Identifies one grid in a write: which field, for which model run and
/// which forecast time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriteKey {
    pub field_id: FieldId,
    pub valid_time: DateTime<Utc>,
    pub run_time: DateTime<Utc>,
}

impl WriteKey {
    pub fn new(field_id: FieldId, valid_time: DateTime<Utc>, run_time: DateTime<Utc>) -> Self {
        Self {
            field_id,
            valid_time,
            run_time,
        }
    }
}

/// Grids to persist, grouped by write key. Each key holds an ordered list
/// (ensemble members, repeated messages); how the list collapses into one
/// stored segment is decided by [`crate::SnapshotReduction`].
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    entries: BTreeMap<WriteKey, Vec<Grid>>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a grid under `(field_id, valid_time, run_time)`.
    pub fn push(
        &mut self,
        field_id: FieldId,
        valid_time: DateTime<Utc>,
        run_time: DateTime<Utc>,
        grid: Grid,
    ) {
        self.entries
            .entry(WriteKey::new(field_id, valid_time, run_time))
            .or_default()
            .push(grid);
    }

    /// Builder-style [`WriteSet::push`].
    pub fn with(
        mut self,
        field_id: FieldId,
        valid_time: DateTime<Utc>,
        run_time: DateTime<Utc>,
        grid: Grid,
    ) -> Self {
        self.push(field_id, valid_time, run_time, grid);
        self
    }

    /// Replace the whole grid list for a key.
    pub fn insert(&mut self, key: WriteKey, grids: Vec<Grid>) {
        self.entries.insert(key, grids);
    }

    pub fn get(&self, key: &WriteKey) -> Option<&[Grid]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Number of write keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WriteKey, &Vec<Grid>)> {
        self.entries.iter()
    }
}

impl IntoIterator for WriteSet {
    type Item = (WriteKey, Vec<Grid>);
    type IntoIter = std::collections::btree_map::IntoIter<WriteKey, Vec<Grid>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(WriteKey, Vec<Grid>)> for WriteSet {
    fn from_iter<T: IntoIterator<Item = (WriteKey, Vec<Grid>)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Values and metadata for one field at one point and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Point values. Stored lookups yield exactly one.
    pub values: Vec<f32>,
    pub metric_id: i32,
    pub source_field_id: FieldId,
    pub valid_time: DateTime<Utc>,
    pub run_time: DateTime<Utc>,
    /// Computed from other fields rather than read from storage.
    #[serde(default)]
    pub derived: bool,
    /// Filled in by a model or interpolation rather than observed.
    #[serde(default)]
    pub synthesized: bool,
}

impl DataPoint {
    pub fn min(&self) -> Option<f32> {
        self.values.iter().copied().reduce(f32::min)
    }

    pub fn max(&self) -> Option<f32> {
        self.values.iter().copied().reduce(f32::max)
    }

    pub fn mean(&self) -> Option<f32> {
        if self.values.is_empty() {
            return None;
        }
        let sum: f64 = self.values.iter().map(|&v| v as f64).sum();
        Some((sum / self.values.len() as f64) as f32)
    }

    pub fn median(&self) -> Option<f32> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    /// Fraction of values strictly within one standard deviation of the mean.
    pub fn mean_confidence(&self) -> Option<f32> {
        let centre = self.mean()?;
        Some(self.fraction_within_stddev(centre))
    }

    /// Fraction of values strictly within one standard deviation of the median.
    pub fn median_confidence(&self) -> Option<f32> {
        let centre = self.median()?;
        Some(self.fraction_within_stddev(centre))
    }

    /// Population standard deviation (ddof = 0).
    fn stddev(&self) -> f64 {
        let n = self.values.len() as f64;
        let mean = self.values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = self
            .values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        var.sqrt()
    }

    fn fraction_within_stddev(&self, centre: f32) -> f32 {
        let std = self.stddev();
        let within = self
            .values
            .iter()
            .filter(|&&v| ((v - centre) as f64).abs() < std)
            .count();
        within as f32 / self.values.len() as f32
    }
}
