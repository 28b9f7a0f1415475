//! Sharded, compressed storage for dense 2-D weather grids.
//!
//! Grids are stored as row documents: one document per
//! `(projection, valid_time, run_time, y, x_shard)`, holding one compressed
//! segment of `n_x_per_row` columns per field. This keeps point lookups
//! cheap (one shard, one segment per field) while whole model runs are
//! written a row at a time.
//!
//! # Architecture
//!
//! ```text
//! put_fields(projection, write_set)
//!      │
//!      ├─► reject grids whose shape != projection
//!      │
//!      └─► for each row y (bounded worker pool)
//!               ├─► slice each field into shards, LZMA-encode
//!               └─► insert_many(row documents)
//!
//! get_fields(proj_id, (x, y), fields, start, end)
//!      │
//!      ├─► shard_key = floor(x / W) * W, offset = trunc(x - shard_key)
//!      ├─► find(proj_id, y, shard_key, [start, end))
//!      └─► decode requested segments, pick values[offset]
//! ```
//!
//! Segments are either bare zlib bytes (legacy) or `{format, data}`
//! envelopes; [`GridStore::migrate_to_lzma`] rewrites the former into the
//! latter in place.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use grid_store::{GridStore, GridStoreConfig, MemoryDocumentStore, Projection, WriteSet};
//!
//! let store = GridStore::open(Arc::new(MemoryDocumentStore::new()), GridStoreConfig::default()).await?;
//! store.put_fields(&projection, write_set).await?;
//! let points = store.get_fields(projection.id, (1.5, 1.0), &fields, start, end).await?;
//! ```

pub mod catalog;
pub mod config;
pub mod document;
pub mod envelope;
pub mod error;
pub mod maintenance;
pub mod reader;
pub mod service;
pub mod shard;
pub mod store;
pub mod types;
pub mod writer;

// Re-export commonly used types at crate root
pub use catalog::{PgProjectionCatalog, ProjectionCatalog};
pub use config::{GridStoreConfig, SnapshotReduction, DEFAULT_SHARD_WIDTH};
pub use document::{RowDocument, RowKey};
pub use envelope::{EnvelopeFormat, Segment};
pub use error::{GridStoreError, Result};
pub use maintenance::MigrationReport;
pub use service::GridStore;
pub use shard::ShardLocation;
pub use store::{
    DocumentId, DocumentQuery, DocumentStore, MemoryDocumentStore, PgDocumentStore,
    SegmentUpdate, StoredDocument,
};
pub use types::{DataPoint, FieldId, Grid, Projection, SourceField, WriteKey, WriteSet};
pub use writer::{RejectedWrite, WriteReport};
