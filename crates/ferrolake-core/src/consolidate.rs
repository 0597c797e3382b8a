use tracing::debug;

use crate::{Batch, StageError};

/// Merges extraction batches into the single batch a snapshot is written from.
///
/// Records keep their `source_scope` and are re-stamped with the earliest
/// input `extracted_at`. Fails with `EmptyBatch` when nothing remains to
/// write and with `InvalidRequest` when batches come from different providers.
pub fn consolidate(batches: Vec<Batch>) -> Result<Batch, StageError> {
    let Some(first) = batches.first() else {
        return Err(StageError::empty_batch("no batches to consolidate"));
    };
    let provider = first.provider;

    if let Some(other) = batches.iter().find(|batch| batch.provider != provider) {
        return Err(StageError::invalid_request(format!(
            "cannot consolidate {} records into a {provider} batch",
            other.provider
        )));
    }

    let extracted_at = batches
        .iter()
        .map(|batch| batch.extracted_at)
        .min()
        .unwrap_or(first.extracted_at);

    let input_batches = batches.len();
    let records = batches
        .into_iter()
        .flat_map(|batch| batch.records)
        .map(|mut record| {
            record.extracted_at = extracted_at;
            record
        })
        .collect::<Vec<_>>();

    if records.is_empty() {
        return Err(StageError::empty_batch(format!(
            "{provider} extraction produced no records"
        )));
    }

    debug!(%provider, input_batches, records = records.len(), "batches consolidated");
    Ok(Batch::new(provider, extracted_at, records))
}
