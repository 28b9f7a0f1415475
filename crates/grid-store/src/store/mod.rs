//! Persistence backends for row documents.
//!
//! The write, read and maintenance paths only talk to [`DocumentStore`].
//! Each call is as atomic as the backend makes a single call; the store adds
//! no transactions spanning calls.

mod memory;
mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::RowDocument;
use crate::envelope::Segment;
use crate::error::Result;

/// Store-assigned document identifier; increases with insertion order.
pub type DocumentId = i64;

/// A document as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub document: RowDocument,
}

/// Point lookup: one shard of one row over a half-open valid-time range.
#[derive(Debug, Clone)]
pub struct DocumentQuery {
    pub proj_id: i32,
    pub y: usize,
    pub x_shard: usize,
    /// Inclusive.
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,
    /// Segment attributes to load. Other segments may be omitted from the
    /// returned documents.
    pub attrs: Vec<String>,
}

/// Partial update replacing some segments of one document in place.
#[derive(Debug, Clone)]
pub struct SegmentUpdate {
    pub id: DocumentId,
    pub segments: BTreeMap<String, Segment>,
}

/// Backend holding row documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create whatever tables and the `(proj_id, valid_time, y)` index the
    /// backend needs. Safe to call repeatedly.
    async fn ensure_indexes(&self) -> Result<()>;

    /// Insert documents as new records. Not an upsert: inserting the same key
    /// twice yields two documents. Returns the number inserted.
    async fn insert_many(&self, documents: Vec<RowDocument>) -> Result<usize>;

    /// Documents matching a point lookup, in insertion order.
    async fn find(&self, query: &DocumentQuery) -> Result<Vec<StoredDocument>>;

    /// Delete documents of one projection whose valid time is before
    /// `oldest_time`. Returns the number deleted.
    async fn delete_older_than(&self, proj_id: i32, oldest_time: DateTime<Utc>) -> Result<u64>;

    /// Up to `limit` documents with id greater than `after`, ascending by id,
    /// with all their segments.
    async fn scan_batch(&self, after: Option<DocumentId>, limit: usize)
        -> Result<Vec<StoredDocument>>;

    /// Apply a batch of partial updates. Returns the number of documents
    /// updated.
    async fn bulk_update(&self, updates: Vec<SegmentUpdate>) -> Result<usize>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn ensure_indexes(&self) -> Result<()> {
        (**self).ensure_indexes().await
    }

    async fn insert_many(&self, documents: Vec<RowDocument>) -> Result<usize> {
        (**self).insert_many(documents).await
    }

    async fn find(&self, query: &DocumentQuery) -> Result<Vec<StoredDocument>> {
        (**self).find(query).await
    }

    async fn delete_older_than(&self, proj_id: i32, oldest_time: DateTime<Utc>) -> Result<u64> {
        (**self).delete_older_than(proj_id, oldest_time).await
    }

    async fn scan_batch(
        &self,
        after: Option<DocumentId>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        (**self).scan_batch(after, limit).await
    }

    async fn bulk_update(&self, updates: Vec<SegmentUpdate>) -> Result<usize> {
        (**self).bulk_update(updates).await
    }
}
