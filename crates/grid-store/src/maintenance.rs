//! Retention and envelope migration.
//!
//! Both run against persisted documents while reads and writes continue.
//! Migration only rewrites a segment's envelope; the decoded values never
//! change, so a concurrent reader sees either form and the same numbers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, warn, Instrument};

use crate::catalog::ProjectionCatalog;
use crate::envelope::{self, EnvelopeFormat, Segment};
use crate::error::{GridStoreError, Result};
use crate::store::{DocumentStore, SegmentUpdate, StoredDocument};

/// Summary of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Documents examined.
    pub scanned: usize,
    /// Documents whose legacy segments were rewritten.
    pub migrated: usize,
    /// Documents left as they were because a segment could not be converted.
    pub failed_documents: usize,
    /// Batches whose bulk update failed; their documents stay legacy.
    pub failed_batches: usize,
}

/// Delete every document older than `oldest_time` for each projection the
/// catalog knows. Deletion is permanent. Returns the number deleted.
pub async fn clean<S, C>(store: &S, catalog: &C, oldest_time: DateTime<Utc>) -> Result<u64>
where
    S: DocumentStore + ?Sized,
    C: ProjectionCatalog + ?Sized,
{
    let mut total = 0;
    for projection in catalog.projections().await? {
        let deleted = store.delete_older_than(projection.id, oldest_time).await?;
        if deleted > 0 {
            info!(proj_id = projection.id, deleted, oldest_time = %oldest_time, "Removed expired documents");
        }
        total += deleted;
    }
    Ok(total)
}

/// Rewrite every legacy segment into the LZMA envelope, `batch_size`
/// documents at a time.
///
/// Segments already wrapped are left alone, which makes the run idempotent
/// and safe to resume. A document with any segment that fails to convert is
/// logged and left untouched; a batch whose update fails is logged and the
/// scan moves on.
pub async fn migrate_to_lzma<S: DocumentStore + ?Sized>(
    store: &S,
    batch_size: usize,
    lzma_preset: u32,
) -> Result<MigrationReport> {
    info!(batch_size, "Starting migration from zlib to lzma compression");

    let span = info_span!("migrate_to_lzma", batch_size);
    let report = migrate_batches(store, batch_size.max(1), lzma_preset)
        .instrument(span)
        .await?;

    info!(
        scanned = report.scanned,
        migrated = report.migrated,
        failed_documents = report.failed_documents,
        failed_batches = report.failed_batches,
        "Migration complete. Total documents processed: {}",
        report.migrated
    );
    Ok(report)
}

async fn migrate_batches<S: DocumentStore + ?Sized>(
    store: &S,
    batch_size: usize,
    lzma_preset: u32,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    let mut after = None;

    loop {
        let batch = store.scan_batch(after, batch_size).await?;
        let Some(last) = batch.last() else {
            break;
        };
        after = Some(last.id);
        report.scanned += batch.len();

        let mut updates = Vec::new();
        for stored in &batch {
            match stage_update(stored, lzma_preset) {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err((attr, e)) => {
                    error!(
                        document = stored.id,
                        field = %attr,
                        error = %e,
                        "Failed to migrate field; leaving document unmigrated"
                    );
                    report.failed_documents += 1;
                }
            }
        }

        if updates.is_empty() {
            continue;
        }

        let staged = updates.len();
        match store.bulk_update(updates).await {
            Ok(updated) => {
                report.migrated += updated;
                if updated < staged {
                    warn!(staged, updated, "Some documents vanished before they were migrated");
                }
                info!("Migrated {} documents to lzma compression", report.migrated);
            }
            Err(e) => {
                error!(after = ?after, error = %e, "Failed to update batch");
                report.failed_batches += 1;
            }
        }
    }

    Ok(report)
}

/// Convert a document's legacy segments. `Ok(None)` when there is nothing
/// to do; `Err` names the first segment that could not be converted.
fn stage_update(
    stored: &StoredDocument,
    lzma_preset: u32,
) -> std::result::Result<Option<SegmentUpdate>, (String, GridStoreError)> {
    let mut segments = BTreeMap::new();

    for (attr, segment) in &stored.document.segments {
        if let Segment::Legacy(_) = segment {
            let values = envelope::decode(segment).map_err(|e| (attr.clone(), e))?;
            let wrapped = envelope::encode_with(&EnvelopeFormat::Lzma, lzma_preset, &values)
                .map_err(|e| (attr.clone(), e))?;
            segments.insert(attr.clone(), wrapped);
        }
    }

    if segments.is_empty() {
        return Ok(None);
    }
    Ok(Some(SegmentUpdate {
        id: stored.id,
        segments,
    }))
}

/// Compaction hook. Row documents are append-only and never merged, so
/// there is nothing to do yet.
pub async fn merge() -> Result<()> {
    info!("merge requested; row documents are not compacted");
    Ok(())
}
