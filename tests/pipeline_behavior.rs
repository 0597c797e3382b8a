//! Behavior-driven tests for whole pipeline runs.
//!
//! Runs go through a scripted exchange API, a local object store, a real
//! DuckDB file and a shell command standing in for the transformation tool.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ferrolake_core::{
    Batch, BinanceAdapter, BinanceSettings, CommandSettings, CommandTransform, ErrorKind,
    Extraction, ExtractionRequest, HttpError, LocalObjectStore, Orchestrator, ProviderId,
    ProviderPolicy, Record, RetryPolicy, RunState, ScriptedHttpClient, SnapshotWriter,
    SourceAdapter, Stage, StageError, StagePolicies, StageStatus, ThrottleRegistry, UtcDateTime,
    WarehouseLoader,
};
use ferrolake_warehouse::WarehouseConfig;
use tokio_util::sync::CancellationToken;

const TICKER: &str = r#"{
    "symbol": "BTCUSDT",
    "lastPrice": "64250.10",
    "priceChange": "-120.50",
    "priceChangePercent": "-0.19",
    "highPrice": "65010.00",
    "lowPrice": "63800.00",
    "openPrice": "64370.60",
    "volume": "21034.5",
    "quoteVolume": "1352000000.0",
    "weightedAvgPrice": "64300.2",
    "count": 1850231
}"#;

const DEPTH: &str = r#"{"lastUpdateId": 1, "bids": [["64250.00", "1.5"]], "asks": [["64251.00", "0.5"]]}"#;

const TRADES: &str = r#"[{"id": 1, "price": "64250.00", "qty": "0.25"}]"#;

fn exchange(symbols: &[&str]) -> ScriptedHttpClient {
    symbols.iter().fold(ScriptedHttpClient::new(), |http, symbol| {
        let scope = format!("symbol={symbol}");
        let scope = scope.as_str();
        http.json(&["ticker/24hr", scope], TICKER)
            .json(&["/depth", scope], DEPTH)
            .json(&["/trades", scope], TRADES)
    })
}

fn adapter(http: ScriptedHttpClient) -> Arc<BinanceAdapter> {
    Arc::new(BinanceAdapter::new(
        Arc::new(http),
        &ThrottleRegistry::new(),
        BinanceSettings {
            base_url: String::from("https://binance.test"),
            policy: ProviderPolicy::binance_default().with_min_interval(Duration::from_millis(1)),
        },
    ))
}

fn shell(script: &str) -> Arc<CommandTransform> {
    Arc::new(CommandTransform::new(CommandSettings {
        program: String::from("sh"),
        args: vec![String::from("-c"), script.to_owned()],
        working_dir: None,
        env: Vec::new(),
        timeout: Duration::from_secs(30),
    }))
}

fn full_pipeline(http: ScriptedHttpClient, dir: &Path, transform: &str) -> Orchestrator {
    Orchestrator::new(adapter(http))
        .with_writer(SnapshotWriter::new(Arc::new(LocalObjectStore::new(dir.join("lake")))))
        .with_loader(Arc::new(WarehouseLoader::new(WarehouseConfig::new(
            dir.join("warehouse.duckdb"),
        ))))
        .with_transformer(shell(transform))
        .with_policies(StagePolicies::no_retry())
}

fn three_symbols() -> ExtractionRequest {
    ExtractionRequest::binance(["BTCUSDT", "ETHUSDT", "XRPUSDT"]).expect("valid request")
}

/// Answers with no records until `empty_calls` extractions have been made.
struct LateExchange {
    empty_calls: u32,
    calls: AtomicU32,
}

impl LateExchange {
    fn new(empty_calls: u32) -> Self {
        Self {
            empty_calls,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SourceAdapter for LateExchange {
    fn id(&self) -> ProviderId {
        ProviderId::Binance
    }

    fn extract<'a>(
        &'a self,
        _request: &'a ExtractionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, StageError>> + Send + 'a>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let extracted_at = UtcDateTime::now().truncate_to_seconds();
        let records = if call > self.empty_calls {
            vec![Record::new("BTCUSDT", "BTCUSDT", extracted_at).with("last_price", 64_250.1)]
        } else {
            Vec::new()
        };
        Box::pin(async move {
            Ok(Extraction {
                batch: Batch::new(ProviderId::Binance, extracted_at, records),
                skipped: Vec::new(),
                warnings: Vec::new(),
            })
        })
    }
}

fn retry_extract_once() -> StagePolicies {
    StagePolicies {
        extract: RetryPolicy::fixed(Duration::ZERO, 1),
        ..StagePolicies::no_retry()
    }
}

// =============================================================================
// Successful runs
// =============================================================================

#[tokio::test]
async fn when_one_symbol_fails_system_lands_the_rest_and_warns() {
    // Given: an exchange where XRPUSDT times out
    let dir = tempfile::tempdir().expect("tempdir");
    let http = exchange(&["BTCUSDT", "ETHUSDT"])
        .route(&["symbol=XRPUSDT"], Err(HttpError::new("operation timed out")));
    let orchestrator = full_pipeline(http, dir.path(), "true");

    // When: the pipeline runs
    let report = orchestrator.run(&three_symbols(), &CancellationToken::new()).await;

    // Then: the run succeeds with the failing symbol in the warnings
    assert_eq!(report.state, RunState::Succeeded, "report: {report:?}");
    assert!(report.error.is_none());
    assert!(report.warnings.iter().any(|warning| warning.contains("XRPUSDT")));
    assert_eq!(report.record_count, 2);

    // And: every stage ran once and succeeded
    for stage in [Stage::Extract, Stage::Consolidate, Stage::Write, Stage::Load, Stage::Transform] {
        let stage_report = report.stage(stage).expect("stage recorded");
        assert_eq!(stage_report.status, StageStatus::Succeeded, "{stage}");
        assert_eq!(stage_report.attempts, 1, "{stage}");
    }

    // And: the snapshot, load and transform outcomes are attached
    let snapshot = report.snapshot.as_ref().expect("snapshot written");
    assert_eq!(snapshot.record_count, 2);
    let load = report.load.as_ref().expect("load ran");
    assert_eq!(load.table, "raw_binance");
    assert_eq!(load.rows_loaded, 2);
    assert_eq!(load.rows_rejected, 0);
    let transform = report.transform.as_ref().expect("transform ran");
    assert!(transform.success);
    assert_eq!(transform.exit_code, Some(0));
}

#[tokio::test]
async fn when_later_stages_are_not_configured_system_marks_them_not_implemented() {
    // Given: an orchestrator with only a source adapter
    let orchestrator = Orchestrator::new(adapter(exchange(&["BTCUSDT"])))
        .with_policies(StagePolicies::no_retry());
    let request = ExtractionRequest::binance(["BTCUSDT"]).expect("valid request");

    // When: the pipeline runs
    let report = orchestrator.run(&request, &CancellationToken::new()).await;

    // Then: the run finishes but never claims the missing stages succeeded
    assert_eq!(report.state, RunState::Succeeded);
    assert_eq!(report.record_count, 1);
    for stage in [Stage::Write, Stage::Load, Stage::Transform] {
        let stage_report = report.stage(stage).expect("stage recorded");
        assert_eq!(stage_report.status, StageStatus::NotImplemented, "{stage}");
        assert_eq!(stage_report.attempts, 0);
    }
    assert_eq!(
        report.warnings.iter().filter(|warning| warning.contains("not implemented")).count(),
        3
    );
    assert!(report.snapshot.is_none());
    assert!(report.load.is_none());
}

#[tokio::test]
async fn when_the_first_extraction_is_empty_system_extracts_again() {
    // Given: an exchange that returns nothing on the first call only
    let exchange = Arc::new(LateExchange::new(1));
    let orchestrator = Orchestrator::new(exchange.clone()).with_policies(retry_extract_once());
    let request = ExtractionRequest::binance(["BTCUSDT"]).expect("valid request");

    // When: the pipeline runs
    let report = orchestrator.run(&request, &CancellationToken::new()).await;

    // Then: the second extraction lands the record
    assert_eq!(report.state, RunState::Succeeded, "report: {report:?}");
    assert_eq!(exchange.calls(), 2);
    assert_eq!(report.record_count, 1);
    let extract = report.stage(Stage::Extract).expect("extract recorded");
    assert_eq!(extract.status, StageStatus::Succeeded);
    assert_eq!(extract.attempts, 2);
    assert_eq!(
        report.stage(Stage::Consolidate).expect("consolidate recorded").status,
        StageStatus::Succeeded
    );
}

// =============================================================================
// Failed runs
// =============================================================================

#[tokio::test]
async fn when_the_transformation_exits_non_zero_system_fails_with_its_stderr() {
    // Given: a transformation command that fails loudly
    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator = full_pipeline(
        exchange(&["BTCUSDT", "ETHUSDT", "XRPUSDT"]),
        dir.path(),
        "echo 'model stg_binance failed' >&2; exit 1",
    );

    // When: the pipeline runs
    let report = orchestrator.run(&three_symbols(), &CancellationToken::new()).await;

    // Then: the run fails with the command's stderr as diagnostics
    assert_eq!(report.state, RunState::Failed);
    let error = report.error.as_ref().expect("terminal error");
    assert_eq!(error.kind, ErrorKind::TransformFailed);
    assert!(error
        .diagnostics
        .as_deref()
        .is_some_and(|diagnostics| diagnostics.contains("model stg_binance failed")));

    // And: the earlier stages still landed their data
    assert_eq!(
        report.stage(Stage::Transform).expect("transform recorded").status,
        StageStatus::Failed
    );
    assert_eq!(report.load.as_ref().expect("load ran").rows_loaded, 3);
}

#[tokio::test]
async fn when_every_symbol_fails_system_stops_after_extraction() {
    // Given: an exchange that answers nothing
    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator = full_pipeline(ScriptedHttpClient::new(), dir.path(), "true");

    // When: the pipeline runs
    let report = orchestrator.run(&three_symbols(), &CancellationToken::new()).await;

    // Then: the run fails at extraction and no later stage is recorded
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.error.as_ref().expect("terminal error").kind, ErrorKind::ExtractionFailed);
    assert_eq!(
        report.stage(Stage::Extract).expect("extract recorded").status,
        StageStatus::Failed
    );
    assert!(report.stage(Stage::Write).is_none());
    assert!(!dir.path().join("lake").exists());
}

#[tokio::test]
async fn when_every_extraction_is_empty_system_fails_with_an_empty_batch() {
    // Given: an exchange that never returns records
    let exchange = Arc::new(LateExchange::new(u32::MAX));
    let orchestrator = Orchestrator::new(exchange.clone()).with_policies(retry_extract_once());
    let request = ExtractionRequest::binance(["BTCUSDT"]).expect("valid request");

    // When: the pipeline runs
    let report = orchestrator.run(&request, &CancellationToken::new()).await;

    // Then: the retry budget is spent and consolidation reports the empty batch
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.error.as_ref().expect("terminal error").kind, ErrorKind::EmptyBatch);
    assert_eq!(exchange.calls(), 2);
    assert_eq!(report.stage(Stage::Extract).expect("extract recorded").attempts, 2);
    assert_eq!(
        report.stage(Stage::Consolidate).expect("consolidate recorded").status,
        StageStatus::Failed
    );
    assert!(report.stage(Stage::Write).is_none());
}

#[tokio::test]
async fn when_the_run_is_cancelled_system_stops_before_the_next_stage() {
    // Given: a cancellation requested before the run starts
    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator = full_pipeline(exchange(&["BTCUSDT"]), dir.path(), "true");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = ExtractionRequest::binance(["BTCUSDT"]).expect("valid request");

    // When: the pipeline runs
    let report = orchestrator.run(&request, &cancel).await;

    // Then: the run fails as cancelled without extracting anything
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.error.as_ref().expect("terminal error").kind, ErrorKind::Cancelled);
    assert!(report.stages.is_empty());
    assert_eq!(report.record_count, 0);
}

#[tokio::test]
async fn when_the_request_targets_another_provider_system_rejects_it() {
    // Given: a GitHub request sent to the exchange pipeline
    let orchestrator = Orchestrator::new(adapter(ScriptedHttpClient::new()));
    let request = ExtractionRequest::github(["rust"], 30, 50).expect("valid request");

    // When: the pipeline runs
    let report = orchestrator.run(&request, &CancellationToken::new()).await;

    // Then: nothing runs and the request is reported invalid
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.error.as_ref().expect("terminal error").kind, ErrorKind::InvalidRequest);
    assert!(report.stages.is_empty());
}
