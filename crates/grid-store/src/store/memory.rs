//! In-process document store.
//!
//! Keeps documents in an ordered map behind an async `RwLock`. Used by tests
//! and by embedders that do not need durability.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{DocumentId, DocumentQuery, DocumentStore, SegmentUpdate, StoredDocument};
use crate::document::RowDocument;
use crate::error::Result;

/// Document store backed by process memory.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    documents: RwLock<BTreeMap<DocumentId, RowDocument>>,
    next_id: AtomicI64,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Copy of every stored document, ascending by id.
    pub async fn snapshot(&self) -> Vec<StoredDocument> {
        self.documents
            .read()
            .await
            .iter()
            .map(|(&id, document)| StoredDocument {
                id,
                document: document.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ensure_indexes(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_many(&self, documents: Vec<RowDocument>) -> Result<usize> {
        let count = documents.len();
        let mut map = self.documents.write().await;
        for document in documents {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            map.insert(id, document);
        }
        debug!(count, total = map.len(), "Inserted documents");
        Ok(count)
    }

    async fn find(&self, query: &DocumentQuery) -> Result<Vec<StoredDocument>> {
        let map = self.documents.read().await;
        let found = map
            .iter()
            .filter(|(_, doc)| {
                let key = &doc.key;
                key.proj_id == query.proj_id
                    && key.y == query.y
                    && key.x_shard == query.x_shard
                    && key.valid_time >= query.start
                    && key.valid_time < query.end
            })
            .map(|(&id, doc)| {
                let segments = doc
                    .segments
                    .iter()
                    .filter(|(attr, _)| query.attrs.contains(attr))
                    .map(|(attr, seg)| (attr.clone(), seg.clone()))
                    .collect();
                StoredDocument {
                    id,
                    document: RowDocument {
                        key: doc.key,
                        segments,
                    },
                }
            })
            .collect();
        Ok(found)
    }

    async fn delete_older_than(&self, proj_id: i32, oldest_time: DateTime<Utc>) -> Result<u64> {
        let mut map = self.documents.write().await;
        let before = map.len();
        map.retain(|_, doc| !(doc.key.proj_id == proj_id && doc.key.valid_time < oldest_time));
        Ok((before - map.len()) as u64)
    }

    async fn scan_batch(
        &self,
        after: Option<DocumentId>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        let map = self.documents.read().await;
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(map
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(&id, document)| StoredDocument {
                id,
                document: document.clone(),
            })
            .collect())
    }

    async fn bulk_update(&self, updates: Vec<SegmentUpdate>) -> Result<usize> {
        let mut map = self.documents.write().await;
        let mut updated = 0;
        for update in updates {
            // Documents deleted since they were scanned are skipped.
            if let Some(doc) = map.get_mut(&update.id) {
                doc.segments.extend(update.segments);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::RowKey;
    use crate::envelope;
    use crate::types::FieldId;
    use chrono::{Duration, TimeZone};

    fn doc(y: usize, x_shard: usize, valid_time: DateTime<Utc>) -> RowDocument {
        let mut doc = RowDocument::new(RowKey {
            proj_id: 1,
            valid_time,
            run_time: valid_time - Duration::hours(1),
            y,
            x_shard,
        });
        doc.insert(FieldId(1), envelope::encode(&[1.0, 2.0]).unwrap());
        doc.insert(FieldId(2), envelope::encode(&[3.0, 4.0]).unwrap());
        doc
    }

    #[tokio::test]
    async fn test_find_filters_key_and_attrs() {
        let store = MemoryDocumentStore::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store
            .insert_many(vec![doc(0, 0, t), doc(1, 0, t), doc(0, 128, t), doc(0, 0, t + Duration::hours(2))])
            .await
            .unwrap();

        let found = store
            .find(&DocumentQuery {
                proj_id: 1,
                y: 0,
                x_shard: 0,
                start: t,
                end: t + Duration::hours(1),
                attrs: vec!["f2".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
        assert_eq!(found[0].document.segments.len(), 1);
        assert!(found[0].document.segment(FieldId(2)).is_some());
    }

    #[tokio::test]
    async fn test_scan_batch_pages_by_id() {
        let store = MemoryDocumentStore::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store
            .insert_many((0..5).map(|y| doc(y, 0, t)).collect())
            .await
            .unwrap();

        let first = store.scan_batch(None, 2).await.unwrap();
        assert_eq!(first.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1, 2]);
        let next = store.scan_batch(Some(2), 2).await.unwrap();
        assert_eq!(next.iter().map(|d| d.id).collect::<Vec<_>>(), vec![3, 4]);
        let last = store.scan_batch(Some(4), 2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert!(store.scan_batch(Some(5), 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_older_than_is_per_projection() {
        let store = MemoryDocumentStore::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut other = doc(0, 0, t);
        other.key.proj_id = 2;
        store
            .insert_many(vec![doc(0, 0, t), doc(0, 0, t + Duration::days(1)), other])
            .await
            .unwrap();

        let deleted = store
            .delete_older_than(1, t + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len().await, 2);
    }
}
