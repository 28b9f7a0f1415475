//! Read path: point lookups.
//!
//! A lookup touches only the documents of the shard that owns the requested
//! column, and only decodes the segments of the requested fields.

use chrono::{DateTime, Utc};
use tracing::{debug, info_span, Instrument};

use crate::document::field_attr;
use crate::envelope;
use crate::error::{GridStoreError, Result};
use crate::shard;
use crate::store::{DocumentQuery, DocumentStore};
use crate::types::{DataPoint, SourceField};

/// Read one value per (document, field) at grid location `loc = (x, y)`
/// for valid times in `[start, end)`.
///
/// `x` may carry sub-cell precision; the value of the column at or below it
/// is returned. `y` is matched exactly, so a fractional row finds nothing.
/// Fields missing from a document are skipped. No matching documents is an
/// empty result, not an error.
pub async fn get_fields<S: DocumentStore + ?Sized>(
    store: &S,
    shard_width: usize,
    proj_id: i32,
    loc: (f64, f64),
    fields: &[SourceField],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<DataPoint>> {
    let (x, y) = loc;
    let location = shard::locate(x, shard_width)?;

    let Some(row) = shard::row_index(y) else {
        debug!(proj_id, y, "Row coordinate is not a stored row");
        return Ok(Vec::new());
    };
    if fields.is_empty() || start >= end {
        return Ok(Vec::new());
    }

    let query = DocumentQuery {
        proj_id,
        y: row,
        x_shard: location.shard_key,
        start,
        end,
        attrs: fields.iter().map(|f| field_attr(f.id)).collect(),
    };

    let documents = store
        .find(&query)
        .instrument(info_span!("get_fields lookup", proj_id, y = row, x_shard = location.shard_key))
        .await?;

    let mut data_points = Vec::new();
    for stored in &documents {
        let doc = &stored.document;
        for field in fields {
            let Some(segment) = doc.segment(field.id) else {
                continue;
            };

            let values = envelope::decode(segment)?;
            // Only the narrow last shard of a grid holds fewer values than
            // the offset can reach, so a miss is a column past the grid edge.
            let value = values.get(location.offset).copied().ok_or_else(|| {
                GridStoreError::invalid_location(format!(
                    "x = {} is beyond the last column {} of projection {}",
                    x,
                    location.shard_key + values.len().saturating_sub(1),
                    proj_id
                ))
            })?;

            data_points.push(DataPoint {
                values: vec![value],
                metric_id: field.metric_id,
                source_field_id: field.id,
                valid_time: doc.key.valid_time,
                run_time: doc.key.run_time,
                derived: false,
                synthesized: false,
            });
        }
    }

    debug!(
        proj_id,
        documents = documents.len(),
        points = data_points.len(),
        "Point lookup complete"
    );
    Ok(data_points)
}
