//! Provider adapter implementations.
//!
//! Adapters share one call path ([`ProviderClient`]) that waits on the
//! provider throttle, applies the request timeout and classifies HTTP
//! failures, and one sub-scope loop ([`extract_scopes`]) that turns per-scope
//! failures into skipped scopes.

mod binance;
mod github;
mod youtube;

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use binance::{BinanceAdapter, BinanceSettings};
pub use github::{GithubAdapter, GithubSettings};
pub use youtube::{YoutubeAdapter, YoutubeSettings};

use crate::data_source::{Extraction, SkippedScope, SourceError};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::ProviderThrottle;
use crate::{Batch, ExtractionRequest, ProviderId, Record, StageError, UtcDateTime};

/// Throttled, time-bounded JSON calls against one provider.
#[derive(Clone)]
pub(crate) struct ProviderClient {
    http_client: Arc<dyn HttpClient>,
    throttle: ProviderThrottle,
    policy: ProviderPolicy,
}

impl ProviderClient {
    pub(crate) fn new(
        http_client: Arc<dyn HttpClient>,
        throttle: ProviderThrottle,
        policy: ProviderPolicy,
    ) -> Self {
        Self {
            http_client,
            throttle,
            policy,
        }
    }

    pub(crate) fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    pub(crate) async fn get_json<T>(&self, request: HttpRequest) -> Result<T, SourceError>
    where
        T: DeserializeOwned,
    {
        let provider = self.policy.provider_id;
        let request = request.with_timeout_ms(self.policy.request_timeout_ms());
        debug!(%provider, url = %request.url, "provider call");

        self.throttle.until_ready().await;
        let response = self.http_client.execute(request).await.map_err(|error| {
            let mut mapped = SourceError::from(error);
            if mapped.retryable() {
                mapped = SourceError::unavailable(format!(
                    "{provider} transport error: {}",
                    mapped.message()
                ));
            }
            mapped
        })?;

        match response.status {
            429 => {
                return Err(SourceError::rate_limited(format!(
                    "{provider} rate limit exceeded"
                )))
            }
            404 => {
                return Err(SourceError::not_found(format!(
                    "{provider} upstream returned status 404"
                )))
            }
            status if !response.is_success() => {
                return Err(SourceError::unavailable(format!(
                    "{provider} upstream returned status {status}"
                )))
            }
            _ => {}
        }

        serde_json::from_str(&response.body).map_err(|error| {
            SourceError::invalid_response(format!("{provider} response could not be parsed: {error}"))
        })
    }
}

/// Rejects requests addressed to another provider.
pub(crate) fn ensure_provider(
    adapter: ProviderId,
    request: &ExtractionRequest,
) -> Result<(), StageError> {
    if request.provider() == adapter {
        return Ok(());
    }
    Err(StageError::invalid_request(format!(
        "{adapter} adapter cannot extract a {} request",
        request.provider()
    )))
}

/// Rows fetched for one sub-scope, with a note when the fetch stopped short.
#[derive(Debug, Default)]
pub(crate) struct ScopeRecords {
    pub records: Vec<Record>,
    pub incomplete: Option<String>,
}

impl From<Vec<Record>> for ScopeRecords {
    fn from(records: Vec<Record>) -> Self {
        Self {
            records,
            incomplete: None,
        }
    }
}

/// Runs `fetch` once per sub-scope, in order, and collects the records.
///
/// A failing sub-scope is logged and skipped. When every sub-scope fails the
/// extraction fails with `ExtractionFailed`; a sub-scope returning no records
/// still counts as a success.
pub(crate) async fn extract_scopes<F, Fut, R>(
    provider: ProviderId,
    scopes: &[String],
    extracted_at: UtcDateTime,
    mut fetch: F,
) -> Result<Extraction, StageError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<R, SourceError>>,
    R: Into<ScopeRecords>,
{
    let mut records = Vec::new();
    let mut skipped = Vec::new();
    let mut warnings = Vec::new();
    let mut succeeded = 0_usize;

    for scope in scopes {
        match fetch(scope.clone()).await {
            Ok(fetched) => {
                let ScopeRecords {
                    records: scope_records,
                    incomplete,
                } = fetched.into();
                debug!(%provider, scope = %scope, records = scope_records.len(), "sub-scope extracted");
                if let Some(note) = incomplete {
                    warnings.push(format!("incomplete {scope}: {note}"));
                }
                succeeded += 1;
                records.extend(scope_records);
            }
            Err(error) => {
                warn!(%provider, scope = %scope, code = error.code(), error = %error, "skipping sub-scope");
                skipped.push(SkippedScope {
                    scope: scope.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    if succeeded == 0 {
        let causes = skipped
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(StageError::extraction_failed(format!(
            "all {} {provider} sub-scopes failed",
            scopes.len()
        ))
        .with_diagnostics(causes));
    }

    Ok(Extraction {
        batch: Batch::new(provider, extracted_at, records),
        skipped,
        warnings,
    })
}

/// Parses a decimal that providers encode either as a JSON string or number.
pub(crate) fn parse_decimal(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(text) => text.trim().parse::<f64>().ok(),
        serde_json::Value::Number(number) => number.as_f64(),
        _ => None,
    }
}

/// Parses a count that providers encode either as a JSON string or number.
pub(crate) fn parse_count(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::String(text) => text.trim().parse::<i64>().ok(),
        serde_json::Value::Number(number) => number.as_i64(),
        _ => None,
    }
}
