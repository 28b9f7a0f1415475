//! Write path: fan a write set out into row documents and persist them.
//!
//! Rows never share a document, so each row is built and inserted by its
//! own worker with no shared mutable state. A failed insert for one row
//! leaves the other rows written; nothing is rolled back.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::GridStoreConfig;
use crate::document::build_row_documents;
use crate::error::{GridStoreError, Result};
use crate::store::DocumentStore;
use crate::types::{Projection, WriteKey, WriteSet};

/// Outcome of a successful `put_fields`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    /// Rows whose documents were inserted.
    pub rows_written: usize,
    /// Documents inserted across all rows.
    pub documents_inserted: usize,
    /// Write keys dropped before writing because a grid did not match the
    /// projection's dimensions.
    pub rejected: Vec<RejectedWrite>,
}

/// A write key excluded from a write.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedWrite {
    pub key: WriteKey,
    pub reason: String,
}

/// Persist every row of every grid in `write_set`.
///
/// Rows are processed by at most `config.write_pool_size` concurrent
/// workers. Not idempotent: writing the same keys twice stores duplicates.
pub async fn put_fields<S: DocumentStore + ?Sized>(
    store: &S,
    config: &GridStoreConfig,
    projection: &Projection,
    write_set: WriteSet,
) -> Result<WriteReport> {
    let (accepted, rejected) = split_by_shape(projection, write_set);
    for r in &rejected {
        warn!(
            proj_id = projection.id,
            field_id = %r.key.field_id,
            valid_time = %r.key.valid_time,
            reason = %r.reason,
            "Rejected grid with wrong dimensions"
        );
    }

    let mut report = WriteReport {
        rejected,
        ..WriteReport::default()
    };
    if accepted.is_empty() || projection.n_y == 0 {
        return Ok(report);
    }

    let accepted = Arc::new(accepted);
    let projection = *projection;

    let results: Vec<(usize, Result<usize>)> = stream::iter(0..projection.n_y)
        .map(|y| {
            let write_set = Arc::clone(&accepted);
            let config = config.clone();
            async move { (y, write_row(store, projection, write_set, y, config).await) }
        })
        .buffer_unordered(config.write_pool_size.max(1))
        .collect()
        .await;

    let mut failed_rows = Vec::new();
    let mut first_error = None;
    for (y, result) in results {
        match result {
            Ok(count) => {
                report.rows_written += 1;
                report.documents_inserted += count;
            }
            Err(e) => {
                error!(proj_id = projection.id, y, error = %e, "Row write failed");
                failed_rows.push(y);
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    if let Some(first_error) = first_error {
        failed_rows.sort_unstable();
        return Err(GridStoreError::PartialWrite {
            failed_rows,
            rows_written: report.rows_written,
            first_error,
            rejected: report.rejected,
        });
    }

    info!(
        proj_id = projection.id,
        fields = accepted.len(),
        rows = report.rows_written,
        documents = report.documents_inserted,
        "Wrote fields"
    );
    Ok(report)
}

/// Build one row's documents off the async executor, then insert them in
/// a single call.
async fn write_row<S: DocumentStore + ?Sized>(
    store: &S,
    projection: Projection,
    write_set: Arc<WriteSet>,
    y: usize,
    config: GridStoreConfig,
) -> Result<usize> {
    let num_fields = write_set.len();
    let documents = tokio::task::spawn_blocking(move || {
        let _span = info_span!("put_fields transformations", num_fields, y).entered();
        build_row_documents(&projection, &write_set, y, &config)
    })
    .await
    .map_err(|e| GridStoreError::TaskFailed(e.to_string()))??;

    let count = documents.len();
    store
        .insert_many(documents)
        .instrument(info_span!("put_fields saving", y, count))
        .await?;

    Ok(count)
}

/// Separate write keys whose grids all match the projection from those
/// that do not.
fn split_by_shape(projection: &Projection, write_set: WriteSet) -> (WriteSet, Vec<RejectedWrite>) {
    let mut accepted = WriteSet::new();
    let mut rejected = Vec::new();

    for (key, grids) in write_set {
        let mismatch = grids.iter().find(|g| !g.matches(projection)).map(|bad| {
            format!(
                "grid is {}x{}, projection {} is {}x{}",
                bad.n_y(),
                bad.n_x(),
                projection.id,
                projection.n_y,
                projection.n_x
            )
        });

        match mismatch {
            None => accepted.insert(key, grids),
            Some(reason) => rejected.push(RejectedWrite { key, reason }),
        }
    }

    (accepted, rejected)
}
