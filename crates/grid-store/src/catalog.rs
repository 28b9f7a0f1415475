//! Read-only view of the projection catalog.
//!
//! The relational catalog owns projections; the store only needs their ids
//! (for retention) and dimensions (for writes).

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use crate::error::{GridStoreError, Result};
use crate::types::Projection;

/// Source of known projections.
#[async_trait]
pub trait ProjectionCatalog: Send + Sync {
    async fn projections(&self) -> Result<Vec<Projection>>;
}

#[async_trait]
impl ProjectionCatalog for Vec<Projection> {
    async fn projections(&self) -> Result<Vec<Projection>> {
        Ok(self.clone())
    }
}

/// Catalog reading the `projection` table of the relational database.
pub struct PgProjectionCatalog {
    pool: PgPool,
}

impl PgProjectionCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectionCatalog for PgProjectionCatalog {
    async fn projections(&self) -> Result<Vec<Projection>> {
        let rows = sqlx::query_as::<_, ProjectionRow>(
            "SELECT id, n_x, n_y FROM projection ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GridStoreError::Catalog(format!("Projection query failed: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(FromRow)]
struct ProjectionRow {
    id: i32,
    n_x: i32,
    n_y: i32,
}

impl From<ProjectionRow> for Projection {
    fn from(row: ProjectionRow) -> Self {
        Projection::new(row.id, row.n_x.max(0) as usize, row.n_y.max(0) as usize)
    }
}
