//! Behavior-driven tests for source adapters.
//!
//! These tests verify how each provider adapter turns scripted API responses
//! into normalized records, and how sub-scope failures are isolated.

use std::sync::Arc;
use std::time::Duration;

use ferrolake_core::{
    BinanceAdapter, BinanceSettings, ErrorKind, ExtractionRequest, GithubAdapter, GithubSettings,
    HttpError, HttpResponse, ProviderId, ProviderPolicy, ScriptedHttpClient, SourceAdapter,
    ThrottleRegistry, Value, YoutubeAdapter, YoutubeSettings,
};

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

const DEPTH: &str = r#"{
    "lastUpdateId": 1,
    "bids": [["64250.00", "1.5"], ["64249.00", "2.0"]],
    "asks": [["64251.00", "0.5"]]
}"#;

const TRADES: &str = r#"[
    {"id": 1, "price": "64250.00", "qty": "0.25"},
    {"id": 2, "price": "64252.00", "qty": "0.75"}
]"#;

fn binance(http: ScriptedHttpClient) -> (BinanceAdapter, Arc<ScriptedHttpClient>) {
    let http = Arc::new(http);
    let adapter = BinanceAdapter::new(
        http.clone(),
        &ThrottleRegistry::new(),
        BinanceSettings {
            base_url: String::from("https://binance.test"),
            policy: ProviderPolicy::binance_default().with_min_interval(Duration::from_millis(1)),
        },
    );
    (adapter, http)
}

fn healthy_symbol(http: ScriptedHttpClient, symbol: &str) -> ScriptedHttpClient {
    let scope = format!("symbol={symbol}");
    let scope = scope.as_str();
    http.json(&["ticker/24hr", scope], TICKER)
        .json(&["/depth", scope], DEPTH)
        .json(&["/trades", scope], TRADES)
}

// =============================================================================
// Exchange adapter
// =============================================================================

#[tokio::test]
async fn when_one_of_three_symbols_times_out_system_extracts_the_other_two() {
    // Given: three symbols where XRPUSDT never answers
    let http = healthy_symbol(healthy_symbol(ScriptedHttpClient::new(), "BTCUSDT"), "ETHUSDT")
        .route(&["symbol=XRPUSDT"], Err(HttpError::new("operation timed out")));
    let (adapter, _) = binance(http);
    let request = ExtractionRequest::binance(["BTCUSDT", "ETHUSDT", "XRPUSDT"]).expect("valid");

    // When: the adapter extracts
    let extraction = adapter.extract(&request).await.expect("partial success");

    // Then: two rows share one timestamp and the failing symbol is reported as skipped
    let batch = &extraction.batch;
    assert_eq!(batch.provider, ProviderId::Binance);
    assert_eq!(batch.len(), 2);
    assert!(batch.records.iter().all(|record| record.extracted_at == batch.extracted_at));
    assert_eq!(
        batch.records.iter().map(|record| record.record_id.as_str()).collect::<Vec<_>>(),
        vec!["BTCUSDT", "ETHUSDT"]
    );
    assert_eq!(extraction.skipped.len(), 1);
    assert_eq!(extraction.skipped[0].scope, "XRPUSDT");
}

#[tokio::test]
async fn when_every_symbol_fails_system_reports_extraction_failed() {
    // Given: an exchange that rate-limits everything
    let http = ScriptedHttpClient::new().route(
        &["ticker/24hr"],
        Ok(HttpResponse::with_status(429, r#"{"code":-1003}"#)),
    );
    let (adapter, _) = binance(http);
    let request = ExtractionRequest::binance(["BTCUSDT", "ETHUSDT"]).expect("valid");

    // When: the adapter extracts
    let error = adapter.extract(&request).await.expect_err("nothing succeeded");

    // Then: the stage fails with the per-symbol causes attached
    assert_eq!(error.kind(), ErrorKind::ExtractionFailed);
    let diagnostics = error.diagnostics().expect("causes recorded");
    assert!(diagnostics.contains("BTCUSDT"));
    assert!(diagnostics.contains("ETHUSDT"));
}

#[tokio::test]
async fn when_ticker_is_available_system_derives_book_and_trade_columns() {
    // Given: a fully answering exchange
    let (adapter, _) = binance(healthy_symbol(ScriptedHttpClient::new(), "BTCUSDT"));
    let request = ExtractionRequest::binance(["btcusdt"]).expect("valid");

    // When: the adapter extracts
    let extraction = adapter.extract(&request).await.expect("success");

    // Then: string decimals are parsed and derived metrics are present
    let record = &extraction.batch.records[0];
    assert_eq!(record.source_scope, "BTCUSDT");
    assert_eq!(record.get("last_price"), Some(&Value::Float(64250.10)));
    assert_eq!(record.get("trade_count_24h"), Some(&Value::Int(1_850_231)));
    assert_eq!(record.get("spread"), Some(&Value::Float(1.0)));
    assert_eq!(record.get("avg_recent_trade_price"), Some(&Value::Float(64251.0)));
    assert_eq!(record.get("recent_trades_volume"), Some(&Value::Float(1.0)));
}

#[tokio::test]
async fn when_order_book_is_unavailable_system_keeps_the_row_with_empty_book_columns() {
    // Given: ticker answers, depth and trades do not
    let http = ScriptedHttpClient::new().json(&["ticker/24hr"], TICKER);
    let (adapter, _) = binance(http);
    let request = ExtractionRequest::binance(["BTCUSDT"]).expect("valid");

    // When: the adapter extracts
    let extraction = adapter.extract(&request).await.expect("ticker suffices");

    // Then: the row exists and the derived columns are null
    let record = &extraction.batch.records[0];
    assert!(extraction.skipped.is_empty());
    assert_eq!(record.get("best_bid"), Some(&Value::Null));
    assert_eq!(record.get("recent_trades_volume"), Some(&Value::Null));
    assert_eq!(record.get("last_price"), Some(&Value::Float(64250.10)));
}

#[tokio::test]
async fn when_request_targets_another_provider_system_rejects_it() {
    // Given: a binance adapter and a github request
    let (adapter, http) = binance(ScriptedHttpClient::new());
    let request = ExtractionRequest::github(["rust"], 30, 50).expect("valid");

    // When: the adapter is asked to extract it
    let error = adapter.extract(&request).await.expect_err("wrong provider");

    // Then: no call is made and the request is invalid
    assert_eq!(error.kind(), ErrorKind::InvalidRequest);
    assert!(http.recorded_requests().is_empty());
}

// =============================================================================
// Video platform adapter
// =============================================================================

fn youtube(http: ScriptedHttpClient) -> (YoutubeAdapter, Arc<ScriptedHttpClient>) {
    let http = Arc::new(http);
    let mut settings = YoutubeSettings::new("yt-test-key");
    settings.base_url = String::from("https://youtube.test/v3");
    settings.policy = ProviderPolicy::youtube_default().with_min_interval(Duration::from_millis(1));
    (YoutubeAdapter::new(http.clone(), &ThrottleRegistry::new(), settings), http)
}

const CHANNEL: &str = r#"{"items": [{
    "id": "UCalpha",
    "snippet": {"title": "Alpha"},
    "statistics": {"viewCount": "90000", "subscriberCount": "1200", "videoCount": "3"}
}]}"#;

fn search_hit(video_id: &str) -> String {
    format!(
        r#"{{"id": {{"kind": "youtube#video", "videoId": "{video_id}"}},
            "snippet": {{"channelTitle": "Alpha", "title": "Video {video_id}",
                        "description": "", "publishedAt": "2024-03-01T10:00:00Z",
                        "thumbnails": {{"high": {{"url": "https://img.test/{video_id}.jpg"}}}}}}}}"#
    )
}

fn video_detail(video_id: &str, views: u32) -> String {
    format!(
        r#"{{"id": "{video_id}", "statistics": {{"viewCount": "{views}", "likeCount": "10"}},
            "contentDetails": {{"duration": "PT4M13S"}}}}"#
    )
}

#[tokio::test]
async fn when_uploads_span_two_pages_system_follows_the_page_token() {
    // Given: a channel whose upload search continues on a second page
    let page_one = format!(
        r#"{{"nextPageToken": "P2", "items": [{}, {}]}}"#,
        search_hit("v1"),
        search_hit("v2")
    );
    let page_two = format!(r#"{{"items": [{}]}}"#, search_hit("v3"));
    let details_one = format!(r#"{{"items": [{}, {}]}}"#, video_detail("v1", 100), video_detail("v2", 200));
    let details_two = format!(r#"{{"items": [{}]}}"#, video_detail("v3", 300));

    let http = ScriptedHttpClient::new()
        .json(&["/channels", "id=UCalpha"], CHANNEL)
        .json(&["/search", "pageToken=P2"], &page_two)
        .json(&["/search", "channelId=UCalpha"], &page_one)
        .json(&["/videos", "id=v1"], &details_one)
        .json(&["/videos", "id=v3"], &details_two);
    let (adapter, http) = youtube(http);
    let request = ExtractionRequest::youtube(["UCalpha"]).expect("valid");

    // When: the adapter extracts
    let extraction = adapter.extract(&request).await.expect("success");

    // Then: all three videos are present with channel statistics denormalized
    let records = &extraction.batch.records;
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].record_id, "v3");
    assert_eq!(records[2].get("view_count"), Some(&Value::Int(300)));
    assert_eq!(records[0].get("channel_subscribers"), Some(&Value::Int(1200)));
    assert_eq!(records[0].get("duration"), Some(&Value::from("PT4M13S")));
    assert!(records.iter().all(|record| record.source_scope == "UCalpha"));

    // And: every call carried the API key as a query parameter
    let requests = http.recorded_requests();
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|request| request.query_value("key") == Some("yt-test-key")));
}

#[tokio::test]
async fn when_a_later_page_fails_system_keeps_the_earlier_pages() {
    // Given: a channel whose second search page times out
    let page_one = format!(
        r#"{{"nextPageToken": "P2", "items": [{}, {}]}}"#,
        search_hit("v1"),
        search_hit("v2")
    );
    let details_one = format!(r#"{{"items": [{}, {}]}}"#, video_detail("v1", 100), video_detail("v2", 200));
    let http = ScriptedHttpClient::new()
        .json(&["/channels", "id=UCalpha"], CHANNEL)
        .route(&["/search", "pageToken=P2"], Err(HttpError::new("operation timed out")))
        .json(&["/search", "channelId=UCalpha"], &page_one)
        .json(&["/videos", "id=v1"], &details_one);
    let (adapter, _) = youtube(http);
    let request = ExtractionRequest::youtube(["UCalpha"]).expect("valid");

    // When: the adapter extracts
    let extraction = adapter.extract(&request).await.expect("first page landed");

    // Then: the first page's videos are kept and the channel is flagged incomplete
    assert_eq!(extraction.batch.len(), 2);
    assert!(extraction.skipped.is_empty());
    assert_eq!(extraction.warnings.len(), 1);
    assert!(extraction.warnings[0].contains("UCalpha"));
    assert!(extraction.warnings[0].contains("page 2"));
}

#[tokio::test]
async fn when_the_first_page_fails_system_skips_the_channel() {
    // Given: a channel whose very first search page is refused
    let http = ScriptedHttpClient::new()
        .json(&["/channels", "id=UCalpha"], CHANNEL)
        .route(&["/search"], Ok(HttpResponse::with_status(403, "quotaExceeded")));
    let (adapter, _) = youtube(http);
    let request = ExtractionRequest::youtube(["UCalpha"]).expect("valid");

    // When: the adapter extracts
    let error = adapter.extract(&request).await.expect_err("nothing landed");

    // Then: no partial rows are reported
    assert_eq!(error.kind(), ErrorKind::ExtractionFailed);
}

#[tokio::test]
async fn when_a_channel_does_not_exist_system_skips_only_that_channel() {
    // Given: one known and one unknown channel
    let page = format!(r#"{{"items": [{}]}}"#, search_hit("v1"));
    let details = format!(r#"{{"items": [{}]}}"#, video_detail("v1", 100));
    let http = ScriptedHttpClient::new()
        .json(&["/channels", "id=UCghost"], r#"{"items": []}"#)
        .json(&["/channels", "id=UCalpha"], CHANNEL)
        .json(&["/search", "channelId=UCalpha"], &page)
        .json(&["/videos", "id=v1"], &details);
    let (adapter, _) = youtube(http);
    let request = ExtractionRequest::youtube(["UCghost", "UCalpha"]).expect("valid");

    // When: the adapter extracts
    let extraction = adapter.extract(&request).await.expect("one channel succeeded");

    // Then: the unknown channel is a skipped scope
    assert_eq!(extraction.batch.len(), 1);
    assert_eq!(extraction.skipped.len(), 1);
    assert_eq!(extraction.skipped[0].scope, "UCghost");
}

// =============================================================================
// Code index adapter
// =============================================================================

fn github(http: ScriptedHttpClient, token: Option<&str>) -> (GithubAdapter, Arc<ScriptedHttpClient>) {
    let http = Arc::new(http);
    let settings = GithubSettings {
        base_url: String::from("https://github.test"),
        token: token.map(str::to_owned),
        per_page: 30,
        policy: ProviderPolicy::github_default().with_min_interval(Duration::from_millis(1)),
    };
    (GithubAdapter::new(http.clone(), &ThrottleRegistry::new(), settings), http)
}

const REPOSITORIES: &str = r#"{"total_count": 2, "items": [
    {"id": 101, "full_name": "acme/engine", "stargazers_count": 900, "forks_count": 40,
     "watchers_count": 900, "open_issues_count": 3, "language": "Rust",
     "created_at": "2024-02-20T08:00:00Z", "updated_at": "2024-03-04T08:00:00Z",
     "html_url": "https://github.test/acme/engine", "topics": ["db", "olap"],
     "license": {"key": "apache-2.0", "name": "Apache License 2.0"}},
    {"id": 102, "full_name": "acme/cli", "stargazers_count": 75, "topics": []}
]}"#;

#[tokio::test]
async fn when_a_token_is_configured_system_searches_with_bearer_auth() {
    // Given: a github adapter with a token
    let http = ScriptedHttpClient::new().json(&["/search/repositories"], REPOSITORIES);
    let (adapter, http) = github(http, Some("ghp_test"));
    let request = ExtractionRequest::github(["rust"], 30, 50).expect("valid");

    // When: the adapter extracts
    let extraction = adapter.extract(&request).await.expect("success");

    // Then: repositories are normalized and the query carries the filters
    let records = &extraction.batch.records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].record_id, "101");
    assert_eq!(records[0].get("topics"), Some(&Value::from("db,olap")));
    assert_eq!(records[1].get("license"), Some(&Value::Null));
    assert_eq!(records[1].get("search_language"), Some(&Value::from("rust")));

    let sent = &http.recorded_requests()[0];
    assert_eq!(
        sent.headers.get("authorization").map(String::as_str),
        Some("Bearer ghp_test")
    );
    let query = sent.query_value("q").expect("search query");
    assert!(query.starts_with("language:rust created:>"));
    assert!(query.ends_with("stars:>50"));
    assert_eq!(sent.query_value("sort"), Some("stars"));
}

#[tokio::test]
async fn when_one_language_is_rate_limited_system_keeps_the_others() {
    // Given: the search API refuses the go query
    let http = ScriptedHttpClient::new()
        .route(
            &["language%3Ago"],
            Ok(HttpResponse::with_status(429, r#"{"message":"API rate limit exceeded"}"#)),
        )
        .json(&["/search/repositories"], REPOSITORIES);
    let (adapter, http) = github(http, None);
    let request = ExtractionRequest::github(["rust", "go"], 7, 10).expect("valid");

    // When: the adapter extracts
    let extraction = adapter.extract(&request).await.expect("rust succeeded");

    // Then: only rust rows are present and go is skipped; no auth header was sent
    assert_eq!(extraction.batch.len(), 2);
    assert_eq!(extraction.skipped[0].scope, "go");
    assert!(http
        .recorded_requests()
        .iter()
        .all(|request| !request.headers.contains_key("authorization")));
}
