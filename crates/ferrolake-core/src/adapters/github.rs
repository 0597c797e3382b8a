use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info_span, Instrument};

use super::{ensure_provider, extract_scopes, ProviderClient};
use crate::data_source::{Extraction, SourceAdapter, SourceError};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::ThrottleRegistry;
use crate::{ExtractionRequest, ProviderId, Record, StageError, UtcDateTime};

/// Repository search settings. Without a token the API allows far fewer calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub per_page: u32,
    pub policy: ProviderPolicy,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            base_url: String::from("https://api.github.com"),
            token: None,
            per_page: 30,
            policy: ProviderPolicy::github_default(),
        }
    }
}

/// Recently created, highly starred repositories per language.
#[derive(Clone)]
pub struct GithubAdapter {
    client: ProviderClient,
    base_url: String,
    auth: HttpAuth,
    per_page: u32,
}

impl GithubAdapter {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        throttles: &ThrottleRegistry,
        settings: GithubSettings,
    ) -> Self {
        let throttle = throttles.throttle_for(&settings.policy);
        Self {
            client: ProviderClient::new(http_client, throttle, settings.policy),
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            auth: settings
                .token
                .filter(|token| !token.trim().is_empty())
                .map_or(HttpAuth::None, HttpAuth::BearerToken),
            per_page: settings.per_page.clamp(1, 100),
        }
    }

    async fn trending_repositories(
        &self,
        language: String,
        created_after: String,
        min_stars: u32,
        extracted_at: UtcDateTime,
    ) -> Result<Vec<Record>, SourceError> {
        let query = search_query(&language, &created_after, min_stars);
        let mut records = Vec::new();

        for page in 1..=self.client.policy().max_pages {
            let response: SearchPayload = self
                .client
                .get_json(
                    HttpRequest::get(format!("{}/search/repositories", self.base_url))
                        .with_header("accept", "application/vnd.github+json")
                        .with_query("q", &query)
                        .with_query("sort", "stars")
                        .with_query("order", "desc")
                        .with_query("per_page", self.per_page)
                        .with_query("page", page)
                        .with_auth(&self.auth),
                )
                .await?;

            let fetched = response.items.len();
            records.extend(
                response
                    .items
                    .into_iter()
                    .map(|item| normalize_repository(item, &language, extracted_at)),
            );
            debug!(language = %language, page, fetched, "repository page processed");

            if fetched < self.per_page as usize {
                break;
            }
        }

        Ok(records)
    }
}

impl SourceAdapter for GithubAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Github
    }

    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, StageError>> + Send + 'a>> {
        let span = info_span!("extract", provider = "github", scopes = request.sub_scopes().len());
        Box::pin(
            async move {
                ensure_provider(ProviderId::Github, request)?;
                let ExtractionRequest::Github {
                    languages,
                    created_within_days,
                    min_stars,
                } = request
                else {
                    return Err(StageError::invalid_request("expected a github request"));
                };

                let extracted_at = UtcDateTime::now().truncate_to_seconds();
                let created_after = extracted_at.days_before(*created_within_days)?.date_string();

                extract_scopes(ProviderId::Github, languages, extracted_at, |language| {
                    self.trending_repositories(
                        language,
                        created_after.clone(),
                        *min_stars,
                        extracted_at,
                    )
                })
                .await
            }
            .instrument(span),
        )
    }
}

fn search_query(language: &str, created_after: &str, min_stars: u32) -> String {
    format!("language:{language} created:>{created_after} stars:>{min_stars}")
}

fn normalize_repository(item: RepositoryItem, language: &str, extracted_at: UtcDateTime) -> Record {
    let topics = item.topics.join(",");

    Record::new(item.id.to_string(), language, extracted_at)
        .with("repo_id", item.id)
        .with("repo_name", item.full_name)
        .with("description", item.description)
        .with("stars", item.stargazers_count)
        .with("forks", item.forks_count)
        .with("watchers", item.watchers_count)
        .with("open_issues", item.open_issues_count)
        .with("language", item.language)
        .with("created_at", item.created_at)
        .with("updated_at", item.updated_at)
        .with("url", item.html_url)
        .with("topics", topics)
        .with("license", item.license.and_then(|license| license.name))
        .with("search_language", language)
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    items: Vec<RepositoryItem>,
}

#[derive(Debug, Deserialize)]
struct RepositoryItem {
    id: i64,
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    stargazers_count: Option<i64>,
    #[serde(default)]
    forks_count: Option<i64>,
    #[serde(default)]
    watchers_count: Option<i64>,
    #[serde(default)]
    open_issues_count: Option<i64>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    license: Option<License>,
}

#[derive(Debug, Deserialize)]
struct License {
    #[serde(default)]
    name: Option<String>,
}
