//! Snapshot writing: one immutable Parquet object per consolidated batch.

mod encoding;
mod store;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument};

pub use encoding::FIXED_COLUMNS;
pub use store::{LocalObjectStore, ObjectStore, S3ObjectStore, S3Settings, StoreError, StoredObject};

use crate::{Batch, ProviderId, StageError, UtcDateTime};

/// Durable artifact produced from exactly one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub provider: ProviderId,
    pub extracted_at: UtcDateTime,
    /// Store-relative partition path.
    pub path: String,
    pub url: String,
    pub size_bytes: u64,
    pub record_count: usize,
    pub column_count: usize,
}

/// Partition path `{provider}/{YYYY}/{MM}/{DD}/{provider}_data_{YYYYMMDD}_{HHMMSS}.parquet`.
pub fn partition_path(provider: ProviderId, extracted_at: UtcDateTime) -> String {
    let at = extracted_at.into_inner();
    let (year, month, day) = (at.year(), u8::from(at.month()), at.day());
    format!(
        "{provider}/{year:04}/{month:02}/{day:02}/{provider}_data_{year:04}{month:02}{day:02}_{:02}{:02}{:02}.parquet",
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Encodes batches and writes them through an [`ObjectStore`].
#[derive(Clone)]
pub struct SnapshotWriter {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Writes `batch` at its partition path, replacing any earlier object there.
    #[instrument(skip_all, fields(provider = %batch.provider, records = batch.len()))]
    pub async fn write(&self, batch: &Batch) -> Result<Snapshot, StageError> {
        if batch.is_empty() {
            return Err(StageError::empty_batch("refusing to write an empty batch"));
        }

        let path = partition_path(batch.provider, batch.extracted_at);
        let encoded = encoding::encode(batch)?;

        let stored = tokio::time::timeout(self.timeout, self.store.put(&path, encoded.bytes))
            .await
            .map_err(|_| {
                StageError::storage_unavailable(format!(
                    "{} store did not finish writing {path} within {} ms",
                    self.store.kind(),
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|error| StageError::storage_unavailable(error.to_string()))?;

        info!(path = %path, url = %stored.url, size_bytes = stored.size_bytes, "snapshot written");
        Ok(Snapshot {
            provider: batch.provider,
            extracted_at: batch.extracted_at,
            path,
            url: stored.url,
            size_bytes: stored.size_bytes,
            record_count: batch.len(),
            column_count: encoded.column_count,
        })
    }

    /// Prepares the backing container, bounded by the write timeout.
    pub async fn ensure_container(&self) -> Result<(), StageError> {
        tokio::time::timeout(self.timeout, self.store.ensure_container())
            .await
            .map_err(|_| StageError::storage_unavailable("timed out preparing snapshot store"))?
            .map_err(|error| StageError::storage_unavailable(error.to_string()))
    }
}
