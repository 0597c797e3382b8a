//! Warehouse load trigger.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use ferrolake_warehouse::{BulkLoadRequest, LoadSummary, Warehouse, WarehouseConfig, WarehouseError};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::snapshot::Snapshot;
use crate::StageError;

/// Outcome of bulk-loading snapshots. Rejected rows never make this an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub success: bool,
    pub table: String,
    pub files: Vec<String>,
    pub created_table: bool,
    pub rows_parsed: u64,
    pub rows_loaded: u64,
    pub rows_rejected: u64,
}

impl LoadResult {
    fn from_summary(summary: LoadSummary) -> Self {
        Self {
            success: true,
            table: summary.table,
            files: summary.files.into_iter().map(|file| file.file).collect(),
            created_table: summary.created_table,
            rows_parsed: summary.rows_parsed,
            rows_loaded: summary.rows_loaded,
            rows_rejected: summary.rows_rejected,
        }
    }

    /// Share of parsed rows that were rejected, 0.0 for an empty load.
    pub fn rejected_ratio(&self) -> f64 {
        if self.rows_parsed == 0 {
            0.0
        } else {
            self.rows_rejected as f64 / self.rows_parsed as f64
        }
    }
}

/// Ingests written snapshots into the provider's raw table.
pub trait LoadTrigger: Send + Sync {
    fn load<'a>(
        &'a self,
        snapshots: &'a [Snapshot],
    ) -> Pin<Box<dyn Future<Output = Result<LoadResult, StageError>> + Send + 'a>>;
}

/// [`LoadTrigger`] backed by the DuckDB warehouse.
///
/// Each load opens the warehouse on a blocking thread; the whole call is
/// bounded by `timeout`. A load that times out keeps running on its thread
/// until DuckDB returns, and holds `in_flight` until then, so the next load
/// waits for it instead of contending for the database file.
#[derive(Debug, Clone)]
pub struct WarehouseLoader {
    config: WarehouseConfig,
    timeout: Duration,
    in_flight: Arc<Mutex<()>>,
}

impl WarehouseLoader {
    pub fn new(config: WarehouseConfig) -> Self {
        Self {
            config,
            timeout: Duration::from_secs(300),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_for(snapshots: &[Snapshot]) -> Result<BulkLoadRequest, StageError> {
        let Some(first) = snapshots.first() else {
            return Err(StageError::invalid_request("no snapshots to load"));
        };
        if snapshots.iter().any(|snapshot| snapshot.provider != first.provider) {
            return Err(StageError::invalid_request(
                "snapshots from different providers cannot share one load",
            ));
        }

        let files = snapshots
            .iter()
            .map(|snapshot| warehouse_location(&snapshot.url))
            .collect();
        Ok(BulkLoadRequest::new(first.provider.raw_table(), files).require_column("record_id"))
    }
}

impl LoadTrigger for WarehouseLoader {
    fn load<'a>(
        &'a self,
        snapshots: &'a [Snapshot],
    ) -> Pin<Box<dyn Future<Output = Result<LoadResult, StageError>> + Send + 'a>> {
        Box::pin(async move {
            let request = Self::request_for(snapshots)?;
            let config = self.config.clone();
            let table = request.table.clone();

            let guard = tokio::time::timeout(self.timeout, Arc::clone(&self.in_flight).lock_owned())
                .await
                .map_err(|_| {
                    StageError::load_unreachable(format!(
                        "previous load still running after {} ms",
                        self.timeout.as_millis()
                    ))
                })?;
            let task = tokio::task::spawn_blocking(move || {
                let _guard = guard;
                let warehouse = Warehouse::open(config)?;
                warehouse.bulk_load(&request)
            });

            let summary = tokio::time::timeout(self.timeout, task)
                .await
                .map_err(|_| {
                    StageError::load_unreachable(format!(
                        "warehouse did not answer within {} ms",
                        self.timeout.as_millis()
                    ))
                })?
                .map_err(|error| StageError::load_failed(format!("load task aborted: {error}")))?
                .map_err(classify)?;

            let result = LoadResult::from_summary(summary);
            if result.rows_rejected > 0 {
                warn!(table = %table, rejected = result.rows_rejected, "rows rejected during load");
            }
            info!(
                table = %table,
                loaded = result.rows_loaded,
                rejected = result.rows_rejected,
                "snapshots loaded"
            );
            Ok(result)
        })
    }
}

fn classify(error: WarehouseError) -> StageError {
    if error.is_connection() {
        StageError::load_unreachable(error.to_string())
    } else {
        StageError::load_failed(error.to_string())
    }
}

/// DuckDB reads local files by plain path and S3 objects by `s3://` URL.
fn warehouse_location(url: &str) -> String {
    url.strip_prefix("file://").unwrap_or(url).to_owned()
}
