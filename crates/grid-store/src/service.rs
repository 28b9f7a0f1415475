//! `GridStore`: configuration plus a backend, exposing the store's public
//! operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::catalog::ProjectionCatalog;
use crate::config::GridStoreConfig;
use crate::error::{GridStoreError, Result};
use crate::maintenance::{self, MigrationReport};
use crate::reader;
use crate::store::DocumentStore;
use crate::types::{DataPoint, Projection, SourceField, WriteSet};
use crate::writer::{self, WriteReport};

/// Sharded row-document store for 2-D grids.
pub struct GridStore<S: DocumentStore> {
    store: Arc<S>,
    config: GridStoreConfig,
}

impl<S: DocumentStore> Clone for GridStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: DocumentStore> GridStore<S> {
    /// Validate `config`, make sure the backend's index exists, and wrap it.
    pub async fn open(store: Arc<S>, config: GridStoreConfig) -> Result<Self> {
        config.validate().map_err(GridStoreError::Config)?;
        store.ensure_indexes().await?;

        info!(
            shard_width = config.n_x_per_row,
            write_pool_size = config.write_pool_size,
            reduction = %config.reduction,
            "Opened grid store"
        );
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &GridStoreConfig {
        &self.config
    }

    /// The underlying backend.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist every row of the grids in `write_set` as row documents.
    ///
    /// Grids whose shape differs from `projection` are excluded and listed
    /// in the report. If inserting some rows fails the remaining rows are
    /// still written and [`GridStoreError::PartialWrite`] names the failures.
    pub async fn put_fields(
        &self,
        projection: &Projection,
        write_set: WriteSet,
    ) -> Result<WriteReport> {
        writer::put_fields(self.store.as_ref(), &self.config, projection, write_set).await
    }

    /// One value per stored (time, field) at `loc = (x, y)` with valid time
    /// in `[start, end)`.
    pub async fn get_fields(
        &self,
        proj_id: i32,
        loc: (f64, f64),
        valid_source_fields: &[SourceField],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataPoint>> {
        reader::get_fields(
            self.store.as_ref(),
            self.config.n_x_per_row,
            proj_id,
            loc,
            valid_source_fields,
            start,
            end,
        )
        .await
    }

    /// Delete documents with valid time before `oldest_time` for every
    /// projection in `catalog`.
    pub async fn clean<C: ProjectionCatalog + ?Sized>(
        &self,
        catalog: &C,
        oldest_time: DateTime<Utc>,
    ) -> Result<u64> {
        maintenance::clean(self.store.as_ref(), catalog, oldest_time).await
    }

    /// Rewrite legacy segments into the LZMA envelope in batches of
    /// `batch_size` documents.
    pub async fn migrate_to_lzma(&self, batch_size: usize) -> Result<MigrationReport> {
        maintenance::migrate_to_lzma(self.store.as_ref(), batch_size, self.config.lzma_preset)
            .await
    }

    /// Compaction hook; currently does nothing.
    pub async fn merge(&self) -> Result<()> {
        maintenance::merge().await
    }
}
