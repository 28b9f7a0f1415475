//! Integration tests: write grids through `GridStore`, read points back.
//!
//! All tests run against the in-memory backend:
//! 1. Write a write set with `put_fields`
//! 2. Read single points with `get_fields`
//! 3. Verify values, shard placement and maintenance behavior

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use grid_store::envelope;
use grid_store::{
    DocumentId, DocumentQuery, DocumentStore, FieldId, Grid, GridStore, GridStoreConfig,
    GridStoreError, MemoryDocumentStore, Projection, RowDocument, RowKey, SegmentUpdate,
    SnapshotReduction, SourceField, StoredDocument, WriteSet,
};
use test_utils::{
    assert_approx_eq, create_grid_with_nans, create_noise_grid, create_temperature_grid,
    create_test_grid, hourly_valid_times, projections, reference_time, run_time_before,
    test_grid_value,
};

fn projection((id, n_x, n_y): (i32, usize, usize)) -> Projection {
    Projection::new(id, n_x, n_y)
}

async fn open_store(config: GridStoreConfig) -> GridStore<MemoryDocumentStore> {
    GridStore::open(Arc::new(MemoryDocumentStore::new()), config)
        .await
        .expect("Failed to open grid store")
}

fn window(valid: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (valid - Duration::minutes(30), valid + Duration::minutes(30))
}

#[tokio::test]
async fn test_small_grid_point_read() {
    let store = open_store(GridStoreConfig::default()).await;
    let proj = projection(projections::SMALL_4X4);
    let valid = reference_time();
    let run = run_time_before(valid, 6);

    let mut grid = Grid::filled(4, 4, 0.0);
    grid.set(1, 1, 2.5);
    let set = WriteSet::new().with(FieldId(1), valid, run, grid);

    let report = store.put_fields(&proj, set).await.unwrap();
    assert_eq!(report.rows_written, 4);
    assert_eq!(report.documents_inserted, 4);

    let (start, end) = window(valid);
    let points = store
        .get_fields(proj.id, (1.5, 1.0), &[SourceField::new(1, 100)], start, end)
        .await
        .unwrap();

    assert_eq!(points.len(), 1);
    assert_eq!(points[0].values, vec![2.5]);
    assert_eq!(points[0].metric_id, 100);
    assert_eq!(points[0].valid_time, valid);
    assert_eq!(points[0].run_time, run);
    assert!(!points[0].derived);
    assert!(!points[0].synthesized);

    // Column 10 lies inside shard 0 but past the grid's right edge.
    let err = store
        .get_fields(proj.id, (10.0, 1.0), &[SourceField::new(1, 100)], start, end)
        .await
        .unwrap_err();
    assert!(matches!(err, GridStoreError::InvalidLocation(_)));
}

#[tokio::test]
async fn test_narrow_last_shard() {
    let store = open_store(GridStoreConfig::default()).await;
    let proj = projection(projections::NARROW_LAST_SHARD);
    let valid = reference_time();
    let values = create_test_grid(proj.n_x, proj.n_y);
    let set = WriteSet::new().with(
        FieldId(7),
        valid,
        run_time_before(valid, 1),
        Grid::new(proj.n_x, proj.n_y, values).unwrap(),
    );
    store.put_fields(&proj, set).await.unwrap();

    let docs = store.store().snapshot().await;
    let mut row_two: Vec<&StoredDocument> = docs.iter().filter(|d| d.document.key.y == 2).collect();
    row_two.sort_by_key(|d| d.document.key.x_shard);
    let shards: Vec<usize> = row_two.iter().map(|d| d.document.key.x_shard).collect();
    assert_eq!(shards, vec![0, 128, 256]);

    let last = envelope::decode(row_two[2].document.segment(FieldId(7)).unwrap()).unwrap();
    assert_eq!(last.len(), 44);

    let (start, end) = window(valid);
    let points = store
        .get_fields(proj.id, (270.0, 2.0), &[SourceField::new(7, 1)], start, end)
        .await
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].values, vec![test_grid_value(270, 2)]);
}

#[tokio::test]
async fn test_large_grid_point_reads() {
    // A low preset keeps the 4096 segment encodes quick in debug builds.
    let config = GridStoreConfig {
        lzma_preset: 1,
        ..GridStoreConfig::default()
    };
    let store = open_store(config).await;
    let proj = projection(projections::LARGE_512X1024);
    let valid = reference_time();
    let values = create_test_grid(proj.n_x, proj.n_y);
    let set = WriteSet::new().with(
        FieldId(3),
        valid,
        run_time_before(valid, 3),
        Grid::new(proj.n_x, proj.n_y, values).unwrap(),
    );

    let report = store.put_fields(&proj, set).await.unwrap();
    assert_eq!(report.rows_written, 1024);
    assert_eq!(report.documents_inserted, 1024 * 4);

    let (start, end) = window(valid);
    let fields = [SourceField::new(3, 1)];
    for (x, y) in [(100.0, 100.0), (400.0, 200.0), (300.0, 800.0), (511.9, 1023.0)] {
        let points = store.get_fields(proj.id, (x, y), &fields, start, end).await.unwrap();
        assert_eq!(points.len(), 1, "one point at ({}, {})", x, y);
        assert_approx_eq!(points[0].values[0], test_grid_value(x as usize, y as usize), 1e-6);
    }
}

#[tokio::test]
async fn test_multiple_fields_and_times() {
    let store = open_store(GridStoreConfig::default()).await;
    let proj = projection(projections::SMALL_4X4);
    let times = hourly_valid_times(2);
    let (t0, t1) = (times[0], times[1]);

    let set = WriteSet::new()
        .with(FieldId(1), t0, run_time_before(t0, 1), Grid::filled(4, 4, 1.0))
        .with(FieldId(2), t0, run_time_before(t0, 1), Grid::filled(4, 4, 2.0))
        .with(FieldId(1), t1, run_time_before(t0, 1), Grid::filled(4, 4, 3.0));
    store.put_fields(&proj, set).await.unwrap();

    let fields = [SourceField::new(1, 10), SourceField::new(2, 20)];
    let mut points = store
        .get_fields(proj.id, (0.0, 0.0), &fields, t0, t1 + Duration::minutes(1))
        .await
        .unwrap();
    points.sort_by_key(|p| (p.valid_time, p.source_field_id));

    let got: Vec<(DateTime<Utc>, FieldId, f32)> = points
        .iter()
        .map(|p| (p.valid_time, p.source_field_id, p.values[0]))
        .collect();
    assert_eq!(
        got,
        vec![
            (t0, FieldId(1), 1.0),
            (t0, FieldId(2), 2.0),
            (t1, FieldId(1), 3.0),
        ]
    );

    // End of the range is exclusive.
    let only_t0 = store
        .get_fields(proj.id, (0.0, 0.0), &fields, t0, t1)
        .await
        .unwrap();
    assert!(only_t0.iter().all(|p| p.valid_time == t0));
    assert_eq!(only_t0.len(), 2);
}

#[tokio::test]
async fn test_nan_survives_write_and_read() {
    let store = open_store(GridStoreConfig::default()).await;
    let proj = projection(projections::SMALL_4X4);
    let valid = reference_time();
    let values = create_grid_with_nans(4, 4, &[(2, 3), (0, 0)]);
    let set = WriteSet::new().with(
        FieldId(1),
        valid,
        run_time_before(valid, 1),
        Grid::new(4, 4, values).unwrap(),
    );
    store.put_fields(&proj, set).await.unwrap();

    let (start, end) = window(valid);
    let fields = [SourceField::new(1, 1)];
    for (x, y, is_nan) in [(2.0, 3.0, true), (0.0, 0.0, true), (1.0, 3.0, false)] {
        let points = store.get_fields(proj.id, (x, y), &fields, start, end).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].values[0].is_nan(), is_nan, "value at ({}, {})", x, y);
    }
}

#[tokio::test]
async fn test_mean_reduction_of_members() {
    let config = GridStoreConfig {
        reduction: SnapshotReduction::Mean,
        ..GridStoreConfig::default()
    };
    let store = open_store(config).await;
    let proj = projection(projections::NARROW_LAST_SHARD);
    let valid = reference_time();
    let run = run_time_before(valid, 1);

    let warm = create_temperature_grid(proj.n_x, proj.n_y);
    let set = WriteSet::new()
        .with(FieldId(4), valid, run, Grid::new(proj.n_x, proj.n_y, warm.clone()).unwrap())
        .with(FieldId(4), valid, run, Grid::filled(proj.n_x, proj.n_y, 250.0));
    store.put_fields(&proj, set).await.unwrap();

    let (start, end) = window(valid);
    let points = store
        .get_fields(proj.id, (290.0, 2.0), &[SourceField::new(4, 1)], start, end)
        .await
        .unwrap();
    let expected = (warm[2 * proj.n_x + 290] + 250.0) / 2.0;
    assert_approx_eq!(points[0].values[0], expected, 1e-4);
}

#[tokio::test]
async fn test_migration_is_idempotent_and_preserves_values() {
    let store = open_store(GridStoreConfig::default()).await;
    let valid = reference_time();
    let n_x = 40;
    let noise = create_noise_grid(n_x, 3, 11);

    let legacy_docs: Vec<RowDocument> = (0..3)
        .map(|y| {
            let mut doc = RowDocument::new(RowKey {
                proj_id: 9,
                valid_time: valid,
                run_time: run_time_before(valid, 1),
                y,
                x_shard: 0,
            });
            let row = &noise[y * n_x..(y + 1) * n_x];
            doc.insert(FieldId(1), envelope::encode_legacy(row).unwrap());
            doc
        })
        .collect();
    store.store().insert_many(legacy_docs).await.unwrap();

    let (start, end) = window(valid);
    let fields = [SourceField::new(1, 1)];
    let before = store.get_fields(9, (17.0, 2.0), &fields, start, end).await.unwrap();

    let first = store.migrate_to_lzma(2).await.unwrap();
    assert_eq!(first.scanned, 3);
    assert_eq!(first.migrated, 3);
    assert_eq!(first.failed_documents, 0);

    let migrated = store.store().snapshot().await;
    for stored in &migrated {
        assert!(!stored.document.has_legacy_segments());
        assert_eq!(
            stored.document.segment(FieldId(1)).unwrap().format_tag(),
            Some("lzma")
        );
    }

    let second = store.migrate_to_lzma(2).await.unwrap();
    assert_eq!(second.scanned, 3);
    assert_eq!(second.migrated, 0);
    assert_eq!(store.store().snapshot().await, migrated);

    let after = store.get_fields(9, (17.0, 2.0), &fields, start, end).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(after[0].values, vec![noise[2 * n_x + 17]]);
}

#[tokio::test]
async fn test_clean_then_read_is_empty() {
    let store = open_store(GridStoreConfig::default()).await;
    let proj = projection(projections::SMALL_4X4);
    let old = reference_time() - Duration::days(2);
    let new = reference_time();

    let set = WriteSet::new()
        .with(FieldId(1), old, run_time_before(old, 1), Grid::filled(4, 4, 1.0))
        .with(FieldId(1), new, run_time_before(new, 1), Grid::filled(4, 4, 2.0));
    store.put_fields(&proj, set).await.unwrap();

    let deleted = store
        .clean(&vec![proj], new - Duration::days(1))
        .await
        .unwrap();
    assert_eq!(deleted, 4);

    let fields = [SourceField::new(1, 1)];
    let (start, end) = window(old);
    assert!(store.get_fields(proj.id, (0.0, 0.0), &fields, start, end).await.unwrap().is_empty());

    let (start, end) = window(new);
    let kept = store.get_fields(proj.id, (0.0, 0.0), &fields, start, end).await.unwrap();
    assert_eq!(kept[0].values, vec![2.0]);
}

#[tokio::test]
async fn test_open_rejects_invalid_config() {
    let result = GridStore::open(
        Arc::new(MemoryDocumentStore::new()),
        GridStoreConfig::default().with_shard_width(0),
    )
    .await;
    assert!(matches!(result, Err(GridStoreError::Config(_))));
}

#[tokio::test]
async fn test_negative_x_is_invalid_location() {
    let store = open_store(GridStoreConfig::default()).await;
    let (start, end) = window(reference_time());
    let err = store
        .get_fields(1, (-1.0, 0.0), &[SourceField::new(1, 1)], start, end)
        .await
        .unwrap_err();
    assert!(matches!(err, GridStoreError::InvalidLocation(_)));
}

/// Backend that refuses to insert documents for one row.
struct FailingRowStore {
    inner: MemoryDocumentStore,
    fail_row: usize,
}

#[async_trait]
impl DocumentStore for FailingRowStore {
    async fn ensure_indexes(&self) -> grid_store::Result<()> {
        self.inner.ensure_indexes().await
    }

    async fn insert_many(&self, documents: Vec<RowDocument>) -> grid_store::Result<usize> {
        if documents.iter().any(|d| d.key.y == self.fail_row) {
            return Err(GridStoreError::storage(format!("row {} unavailable", self.fail_row)));
        }
        self.inner.insert_many(documents).await
    }

    async fn find(&self, query: &DocumentQuery) -> grid_store::Result<Vec<StoredDocument>> {
        self.inner.find(query).await
    }

    async fn delete_older_than(
        &self,
        proj_id: i32,
        oldest_time: DateTime<Utc>,
    ) -> grid_store::Result<u64> {
        self.inner.delete_older_than(proj_id, oldest_time).await
    }

    async fn scan_batch(
        &self,
        after: Option<DocumentId>,
        limit: usize,
    ) -> grid_store::Result<Vec<StoredDocument>> {
        self.inner.scan_batch(after, limit).await
    }

    async fn bulk_update(&self, updates: Vec<SegmentUpdate>) -> grid_store::Result<usize> {
        self.inner.bulk_update(updates).await
    }
}

#[tokio::test]
async fn test_failed_row_does_not_block_other_rows() {
    let backend = FailingRowStore {
        inner: MemoryDocumentStore::new(),
        fail_row: 5,
    };
    let store = GridStore::open(Arc::new(backend), GridStoreConfig::default().with_write_pool_size(3))
        .await
        .unwrap();

    let proj = Projection::new(4, 8, 8);
    let valid = reference_time();
    let set = WriteSet::new().with(
        FieldId(1),
        valid,
        run_time_before(valid, 1),
        Grid::new(8, 8, create_test_grid(8, 8)).unwrap(),
    );

    let err = store.put_fields(&proj, set).await.unwrap_err();
    match err {
        GridStoreError::PartialWrite {
            failed_rows,
            rows_written,
            ..
        } => {
            assert_eq!(failed_rows, vec![5]);
            assert_eq!(rows_written, 7);
        }
        other => panic!("expected PartialWrite, got {:?}", other),
    }

    let (start, end) = window(valid);
    let fields = [SourceField::new(1, 1)];
    for y in 0..8 {
        let points = store
            .get_fields(proj.id, (3.0, y as f64), &fields, start, end)
            .await
            .unwrap();
        if y == 5 {
            assert!(points.is_empty());
        } else {
            assert_eq!(points[0].values, vec![test_grid_value(3, y)]);
        }
    }
}
