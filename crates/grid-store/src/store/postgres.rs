//! PostgreSQL document store.
//!
//! Documents live in `row_documents`; their segments in `row_segments`, one
//! row per field attribute. A segment row with a NULL `format` is a legacy
//! bare byte string, any other value is the envelope tag.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use super::{DocumentId, DocumentQuery, DocumentStore, SegmentUpdate, StoredDocument};
use crate::document::{RowDocument, RowKey};
use crate::envelope::Segment;
use crate::error::{GridStoreError, Result};

/// Document store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Connect to the database at `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| GridStoreError::storage(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Use an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_segments(
        &self,
        doc_ids: &[DocumentId],
        attrs: Option<&[String]>,
    ) -> Result<BTreeMap<DocumentId, BTreeMap<String, Segment>>> {
        if doc_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let rows = match attrs {
            Some(attrs) => {
                sqlx::query_as::<_, SegmentRow>(
                    "SELECT doc_id, attr, format, data FROM row_segments \
                     WHERE doc_id = ANY($1) AND attr = ANY($2)",
                )
                .bind(doc_ids)
                .bind(attrs)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, SegmentRow>(
                    "SELECT doc_id, attr, format, data FROM row_segments WHERE doc_id = ANY($1)",
                )
                .bind(doc_ids)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| GridStoreError::storage(format!("Segment query failed: {}", e)))?;

        let mut by_doc: BTreeMap<DocumentId, BTreeMap<String, Segment>> = BTreeMap::new();
        for row in rows {
            by_doc
                .entry(row.doc_id)
                .or_default()
                .insert(row.attr, Segment::from_parts(row.format.as_deref(), row.data));
        }
        Ok(by_doc)
    }

    async fn assemble(
        &self,
        rows: Vec<DocumentRow>,
        attrs: Option<&[String]>,
    ) -> Result<Vec<StoredDocument>> {
        let ids: Vec<DocumentId> = rows.iter().map(|r| r.id).collect();
        let mut segments = self.load_segments(&ids, attrs).await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredDocument {
                id: row.id,
                document: RowDocument {
                    key: row.key(),
                    segments: segments.remove(&row.id).unwrap_or_default(),
                },
            })
            .collect())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn ensure_indexes(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| GridStoreError::storage(format!("Schema setup failed: {}", e)))?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn insert_many(&self, documents: Vec<RowDocument>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for doc in &documents {
            let (Some(y), Some(x_shard)) = (to_column(doc.key.y), to_column(doc.key.x_shard)) else {
                return Err(GridStoreError::storage(format!(
                    "row {} / shard {} does not fit the INTEGER key columns",
                    doc.key.y, doc.key.x_shard
                )));
            };

            let id: DocumentId = sqlx::query_scalar(
                "INSERT INTO row_documents (proj_id, valid_time, run_time, y, x_shard) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(doc.key.proj_id)
            .bind(doc.key.valid_time)
            .bind(doc.key.run_time)
            .bind(y)
            .bind(x_shard)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| GridStoreError::storage(format!("Insert failed: {}", e)))?;

            if doc.segments.is_empty() {
                continue;
            }

            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO row_segments (doc_id, attr, format, data) ");
            builder.push_values(doc.segments.iter(), |mut b, (attr, segment)| {
                b.push_bind(id)
                    .push_bind(attr.clone())
                    .push_bind(segment.format_tag().map(str::to_string))
                    .push_bind(segment.data().to_vec());
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| GridStoreError::storage(format!("Segment insert failed: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| GridStoreError::storage(format!("Commit failed: {}", e)))?;

        debug!(count = documents.len(), "Inserted documents");
        Ok(documents.len())
    }

    async fn find(&self, query: &DocumentQuery) -> Result<Vec<StoredDocument>> {
        // Keys that do not fit the columns cannot have been stored.
        let (Some(y), Some(x_shard)) = (to_column(query.y), to_column(query.x_shard)) else {
            debug!(y = query.y, x_shard = query.x_shard, "Lookup key out of column range");
            return Ok(Vec::new());
        };

        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, proj_id, valid_time, run_time, y, x_shard FROM row_documents \
             WHERE proj_id = $1 AND y = $2 AND x_shard = $3 \
             AND valid_time >= $4 AND valid_time < $5 \
             ORDER BY id",
        )
        .bind(query.proj_id)
        .bind(y)
        .bind(x_shard)
        .bind(query.start)
        .bind(query.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GridStoreError::storage(format!("Query failed: {}", e)))?;

        self.assemble(rows, Some(&query.attrs)).await
    }

    async fn delete_older_than(&self, proj_id: i32, oldest_time: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM row_documents WHERE proj_id = $1 AND valid_time < $2")
            .bind(proj_id)
            .bind(oldest_time)
            .execute(&self.pool)
            .await
            .map_err(|e| GridStoreError::storage(format!("Delete failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn scan_batch(
        &self,
        after: Option<DocumentId>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, proj_id, valid_time, run_time, y, x_shard FROM row_documents \
             WHERE id > $1 ORDER BY id LIMIT $2",
        )
        .bind(after.unwrap_or(0))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GridStoreError::storage(format!("Scan failed: {}", e)))?;

        self.assemble(rows, None).await
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn bulk_update(&self, updates: Vec<SegmentUpdate>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for update in &updates {
            let mut touched = false;
            for (attr, segment) in &update.segments {
                let result = sqlx::query(
                    "UPDATE row_segments SET format = $1, data = $2 \
                     WHERE doc_id = $3 AND attr = $4",
                )
                .bind(segment.format_tag())
                .bind(segment.data())
                .bind(update.id)
                .bind(attr)
                .execute(&mut *tx)
                .await
                .map_err(|e| GridStoreError::storage(format!("Update failed: {}", e)))?;
                touched |= result.rows_affected() > 0;
            }
            if touched {
                updated += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| GridStoreError::storage(format!("Commit failed: {}", e)))?;

        Ok(updated)
    }
}

/// `y` and `x_shard` are stored as INTEGER; `None` when a value does not fit.
fn to_column(value: usize) -> Option<i32> {
    i32::try_from(value).ok()
}

#[derive(FromRow)]
struct DocumentRow {
    id: i64,
    proj_id: i32,
    valid_time: DateTime<Utc>,
    run_time: DateTime<Utc>,
    y: i32,
    x_shard: i32,
}

impl DocumentRow {
    fn key(&self) -> RowKey {
        RowKey {
            proj_id: self.proj_id,
            valid_time: self.valid_time,
            run_time: self.run_time,
            y: self.y as usize,
            x_shard: self.x_shard as usize,
        }
    }
}

#[derive(FromRow)]
struct SegmentRow {
    doc_id: i64,
    attr: String,
    format: Option<String>,
    data: Vec<u8>,
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS row_documents (
    id BIGSERIAL PRIMARY KEY,
    proj_id INTEGER NOT NULL,
    valid_time TIMESTAMPTZ NOT NULL,
    run_time TIMESTAMPTZ NOT NULL,
    y INTEGER NOT NULL,
    x_shard INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_row_documents_proj_valid_y
    ON row_documents (proj_id ASC, valid_time ASC, y ASC);

CREATE TABLE IF NOT EXISTS row_segments (
    doc_id BIGINT NOT NULL REFERENCES row_documents (id) ON DELETE CASCADE,
    attr TEXT NOT NULL,
    format TEXT,
    data BYTEA NOT NULL,
    PRIMARY KEY (doc_id, attr)
);
"#;
