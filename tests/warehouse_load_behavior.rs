//! Behavior-driven tests for landing snapshots in the warehouse.
//!
//! Every test writes real Parquet through the snapshot writer into a temp
//! directory and loads it into a throwaway DuckDB file.

use std::path::Path;
use std::sync::Arc;

use ferrolake_core::{
    Batch, LoadTrigger, LocalObjectStore, ProviderId, Record, Snapshot, SnapshotWriter,
    UtcDateTime, WarehouseLoader,
};
use ferrolake_warehouse::{QueryGuardrails, Warehouse, WarehouseConfig};
use serde_json::{json, Value};

fn at(value: &str) -> UtcDateTime {
    UtcDateTime::parse(value).expect("valid timestamp")
}

fn guardrails() -> QueryGuardrails {
    QueryGuardrails {
        max_rows: 1_000,
        query_timeout_ms: 5_000,
    }
}

fn warehouse_config(dir: &Path) -> WarehouseConfig {
    WarehouseConfig::new(dir.join("warehouse.duckdb"))
}

fn query(dir: &Path, sql: &str) -> Vec<Vec<Value>> {
    let warehouse = Warehouse::open(warehouse_config(dir)).expect("warehouse opens");
    warehouse
        .execute_query(sql, guardrails(), false)
        .expect("query runs")
        .rows
}

async fn write_snapshot(dir: &Path, batch: &Batch) -> Snapshot {
    SnapshotWriter::new(Arc::new(LocalObjectStore::new(dir.join("lake"))))
        .write(batch)
        .await
        .expect("snapshot written")
}

/// 100 ticker rows whose `last_price` is text; the listed rows are not numeric.
fn textual_price_batch(extracted_at: UtcDateTime, unparseable: &[usize]) -> Batch {
    let records = (0..100)
        .map(|index| {
            let symbol = format!("SYM{index:03}USDT");
            let price = if unparseable.contains(&index) {
                String::from("not-a-price")
            } else {
                format!("{}.5", 100 + index)
            };
            Record::new(symbol.clone(), symbol.clone(), extracted_at)
                .with("symbol", symbol)
                .with("last_price", price)
        })
        .collect();
    Batch::new(ProviderId::Binance, extracted_at, records)
}

fn ticker_batch(extracted_at: UtcDateTime) -> Batch {
    let records = ["BTCUSDT", "ETHUSDT"]
        .into_iter()
        .map(|symbol| {
            Record::new(symbol, symbol, extracted_at)
                .with("symbol", symbol)
                .with("last_price", 64_250.1)
                .with("trade_count_24h", 1_850_231_i64)
        })
        .collect();
    Batch::new(ProviderId::Binance, extracted_at, records)
}

fn precreate_raw_binance(dir: &Path) {
    let warehouse = Warehouse::open(warehouse_config(dir)).expect("warehouse opens");
    warehouse
        .execute_query(
            "CREATE TABLE raw_binance (RECORD_ID VARCHAR, Symbol VARCHAR, LAST_PRICE DOUBLE, \
             _source_file VARCHAR, _loaded_at TIMESTAMP)",
            guardrails(),
            true,
        )
        .expect("table created");
}

// =============================================================================
// Row rejection
// =============================================================================

#[tokio::test]
async fn when_some_rows_fail_their_cast_system_loads_the_rest() {
    // Given: a typed raw table and a snapshot with 2 unparseable prices out of 100
    let dir = tempfile::tempdir().expect("tempdir");
    precreate_raw_binance(dir.path());
    let batch = textual_price_batch(at("2024-03-05T14:30:00Z"), &[17, 64]);
    let snapshot = write_snapshot(dir.path(), &batch).await;

    // When: the snapshot is loaded
    let loader = WarehouseLoader::new(warehouse_config(dir.path()));
    let result = loader.load(&[snapshot]).await.expect("load completes");

    // Then: the load succeeds with 98 rows landed and 2 rejected
    assert!(result.success);
    assert_eq!(result.table, "raw_binance");
    assert!(!result.created_table);
    assert_eq!(result.rows_parsed, 100);
    assert_eq!(result.rows_loaded, 98);
    assert_eq!(result.rows_rejected, 2);
    assert!((result.rejected_ratio() - 0.02).abs() < f64::EPSILON);

    // And: only the parseable rows are in the table
    let rows = query(dir.path(), "SELECT COUNT(*) FROM raw_binance");
    assert_eq!(rows[0][0], json!(98));
    let rows = query(
        dir.path(),
        "SELECT COUNT(*) FROM raw_binance WHERE RECORD_ID IN ('SYM017USDT', 'SYM064USDT')",
    );
    assert_eq!(rows[0][0], json!(0));
}

// =============================================================================
// Column matching
// =============================================================================

#[tokio::test]
async fn when_table_columns_differ_in_case_system_still_matches_them() {
    // Given: upper- and mixed-case table columns and lower-case file columns
    let dir = tempfile::tempdir().expect("tempdir");
    precreate_raw_binance(dir.path());
    let snapshot = write_snapshot(dir.path(), &ticker_batch(at("2024-03-05T14:30:00Z"))).await;

    // When: the snapshot is loaded
    let result = WarehouseLoader::new(warehouse_config(dir.path()))
        .load(&[snapshot.clone()])
        .await
        .expect("load completes");

    // Then: every value lands in its case-folded column
    assert_eq!(result.rows_loaded, 2);
    assert_eq!(result.rows_rejected, 0);
    let rows = query(
        dir.path(),
        "SELECT RECORD_ID, Symbol, LAST_PRICE, _source_file FROM raw_binance ORDER BY RECORD_ID",
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], json!("BTCUSDT"));
    assert_eq!(rows[0][1], json!("BTCUSDT"));
    assert_eq!(rows[0][2], json!(64_250.1));
    let source_file = rows[0][3].as_str().expect("source file recorded");
    assert!(source_file.ends_with("binance_data_20240305_143000.parquet"));
}

// =============================================================================
// Table lifecycle
// =============================================================================

#[tokio::test]
async fn when_the_raw_table_is_missing_system_creates_it_from_the_snapshot() {
    // Given: an empty warehouse
    let dir = tempfile::tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), &ticker_batch(at("2024-03-05T14:30:00Z"))).await;

    // When: the snapshot is loaded
    let result = WarehouseLoader::new(warehouse_config(dir.path()))
        .load(&[snapshot])
        .await
        .expect("load completes");

    // Then: the table is created with the snapshot's columns plus bookkeeping
    assert!(result.created_table);
    assert_eq!(result.rows_loaded, 2);
    let rows = query(
        dir.path(),
        "SELECT column_name FROM information_schema.columns \
         WHERE table_name = 'raw_binance' ORDER BY ordinal_position",
    );
    let names = rows
        .iter()
        .filter_map(|row| row[0].as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "record_id",
            "provider",
            "source_scope",
            "extracted_at",
            "symbol",
            "last_price",
            "trade_count_24h",
            "_source_file",
            "_loaded_at"
        ]
    );
}

#[tokio::test]
async fn when_the_same_snapshot_is_loaded_twice_system_keeps_one_copy_of_its_rows() {
    // Given: a snapshot that has already been loaded once
    let dir = tempfile::tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), &ticker_batch(at("2024-03-05T14:30:00Z"))).await;
    let loader = WarehouseLoader::new(warehouse_config(dir.path()));
    loader.load(&[snapshot.clone()]).await.expect("first load");

    // When: it is loaded again
    let second = loader.load(&[snapshot]).await.expect("second load");

    // Then: the table holds the rows once, and both loads are in the history
    assert!(!second.created_table);
    assert_eq!(second.rows_loaded, 2);
    let rows = query(dir.path(), "SELECT COUNT(*) FROM raw_binance");
    assert_eq!(rows[0][0], json!(2));
    let rows = query(
        dir.path(),
        "SELECT COUNT(*) FROM load_history WHERE table_name = 'raw_binance'",
    );
    assert_eq!(rows[0][0], json!(2));
}

#[tokio::test]
async fn when_two_snapshots_are_loaded_together_system_reports_each_file() {
    // Given: two snapshots from different extraction instants
    let dir = tempfile::tempdir().expect("tempdir");
    let morning = write_snapshot(dir.path(), &ticker_batch(at("2024-03-05T09:00:00Z"))).await;
    let evening = write_snapshot(dir.path(), &ticker_batch(at("2024-03-05T21:00:00Z"))).await;

    // When: both are loaded in one call
    let result = WarehouseLoader::new(warehouse_config(dir.path()))
        .load(&[morning, evening])
        .await
        .expect("load completes");

    // Then: both files are accounted for
    assert_eq!(result.files.len(), 2);
    assert_eq!(result.rows_loaded, 4);
    let rows = query(dir.path(), "SELECT COUNT(DISTINCT _source_file) FROM raw_binance");
    assert_eq!(rows[0][0], json!(2));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn when_the_staged_file_is_missing_system_reports_a_load_failure() {
    // Given: a snapshot whose file was removed before loading
    let dir = tempfile::tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), &ticker_batch(at("2024-03-05T14:30:00Z"))).await;
    let file = snapshot.url.strip_prefix("file://").expect("local url");
    std::fs::remove_file(file).expect("file removed");

    // When: the snapshot is loaded
    let error = WarehouseLoader::new(warehouse_config(dir.path()))
        .load(&[snapshot])
        .await
        .expect_err("nothing to read");

    // Then: the error is a non-retryable load failure
    assert_eq!(error.kind(), ferrolake_core::ErrorKind::LoadFailed);
    assert!(!error.kind().retryable());
}

#[tokio::test]
async fn when_no_snapshots_are_given_system_rejects_the_request() {
    // Given: a loader and nothing to load
    let dir = tempfile::tempdir().expect("tempdir");
    let loader = WarehouseLoader::new(warehouse_config(dir.path()));

    // When: an empty load is requested
    let error = loader.load(&[]).await.expect_err("nothing to load");

    // Then: it is an invalid request
    assert_eq!(error.kind(), ferrolake_core::ErrorKind::InvalidRequest);
}
