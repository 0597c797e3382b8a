use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info_span, warn, Instrument};

use super::{ensure_provider, extract_scopes, parse_count, ProviderClient, ScopeRecords};
use crate::data_source::{Extraction, SourceAdapter, SourceError};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::ThrottleRegistry;
use crate::{ExtractionRequest, ProviderId, Record, StageError, UtcDateTime};

const SEARCH_PAGE_SIZE: u32 = 50;

/// Data API v3 settings. The API key travels as the `key` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YoutubeSettings {
    pub base_url: String,
    pub api_key: String,
    pub policy: ProviderPolicy,
}

impl YoutubeSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: String::from("https://www.googleapis.com/youtube/v3"),
            api_key: api_key.into(),
            policy: ProviderPolicy::youtube_default(),
        }
    }
}

/// Channel upload adapter: one row per video, channel statistics denormalized.
#[derive(Clone)]
pub struct YoutubeAdapter {
    client: ProviderClient,
    base_url: String,
    auth: HttpAuth,
}

impl YoutubeAdapter {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        throttles: &ThrottleRegistry,
        settings: YoutubeSettings,
    ) -> Self {
        let throttle = throttles.throttle_for(&settings.policy);
        Self {
            client: ProviderClient::new(http_client, throttle, settings.policy),
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            auth: HttpAuth::QueryKey {
                name: String::from("key"),
                value: settings.api_key,
            },
        }
    }

    async fn channel_videos(
        &self,
        channel_id: String,
        extracted_at: UtcDateTime,
    ) -> Result<ScopeRecords, SourceError> {
        let channels: ListPayload<ChannelItem> = self
            .client
            .get_json(
                HttpRequest::get(format!("{}/channels", self.base_url))
                    .with_query("part", "snippet,statistics")
                    .with_query("id", &channel_id)
                    .with_auth(&self.auth),
            )
            .await?;
        let channel = channels
            .items
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::not_found(format!("channel '{channel_id}' does not exist")))?;

        let mut fetched = ScopeRecords::default();
        let mut page_token: Option<String> = None;
        let max_pages = self.client.policy().max_pages;

        for page in 1..=max_pages {
            let (rows, next_page_token) = match self
                .search_page(&channel_id, &channel, page_token.as_deref(), extracted_at)
                .await
            {
                Ok(page_result) => page_result,
                Err(error) if page == 1 => return Err(error),
                Err(error) => {
                    warn!(
                        channel = %channel_id,
                        page,
                        kept = fetched.records.len(),
                        error = %error,
                        "search page failed, keeping earlier pages"
                    );
                    fetched.incomplete = Some(format!("page {page} failed: {error}"));
                    break;
                }
            };
            fetched.records.extend(rows);

            debug!(channel = %channel_id, page, rows = fetched.records.len(), "search page processed");
            page_token = next_page_token.filter(|token| !token.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        Ok(fetched)
    }

    /// One search page joined with its video statistics.
    async fn search_page(
        &self,
        channel_id: &str,
        channel: &ChannelItem,
        page_token: Option<&str>,
        extracted_at: UtcDateTime,
    ) -> Result<(Vec<Record>, Option<String>), SourceError> {
        let mut request = HttpRequest::get(format!("{}/search", self.base_url))
            .with_query("part", "snippet")
            .with_query("channelId", channel_id)
            .with_query("type", "video")
            .with_query("order", "date")
            .with_query("maxResults", SEARCH_PAGE_SIZE);
        if let Some(token) = page_token {
            request = request.with_query("pageToken", token);
        }
        let search: SearchPayload = self.client.get_json(request.with_auth(&self.auth)).await?;

        let hits = search
            .items
            .into_iter()
            .filter_map(|item| item.id.video_id.clone().map(|video_id| (video_id, item)))
            .collect::<Vec<_>>();
        if hits.is_empty() {
            return Ok((Vec::new(), search.next_page_token));
        }

        let ids = hits
            .iter()
            .map(|(video_id, _)| video_id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let details: ListPayload<VideoItem> = self
            .client
            .get_json(
                HttpRequest::get(format!("{}/videos", self.base_url))
                    .with_query("part", "statistics,contentDetails")
                    .with_query("id", ids)
                    .with_auth(&self.auth),
            )
            .await?;

        let rows = hits
            .iter()
            .enumerate()
            .map(|(position, (video_id, hit))| {
                let detail = match_detail(&details.items, position, video_id);
                normalize_video(channel_id, channel, video_id, hit, detail, extracted_at)
            })
            .collect();
        Ok((rows, search.next_page_token))
    }
}

impl SourceAdapter for YoutubeAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Youtube
    }

    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, StageError>> + Send + 'a>> {
        let span = info_span!("extract", provider = "youtube", scopes = request.sub_scopes().len());
        Box::pin(
            async move {
                ensure_provider(ProviderId::Youtube, request)?;
                let extracted_at = UtcDateTime::now().truncate_to_seconds();

                extract_scopes(
                    ProviderId::Youtube,
                    request.sub_scopes(),
                    extracted_at,
                    |channel_id| self.channel_videos(channel_id, extracted_at),
                )
                .await
            }
            .instrument(span),
        )
    }
}

/// Details are joined to search hits by position; the id lookup covers
/// responses that drop or reorder deleted videos.
fn match_detail<'a>(details: &'a [VideoItem], position: usize, video_id: &str) -> Option<&'a VideoItem> {
    details
        .get(position)
        .filter(|detail| detail.id == video_id)
        .or_else(|| details.iter().find(|detail| detail.id == video_id))
}

fn normalize_video(
    channel_id: &str,
    channel: &ChannelItem,
    video_id: &str,
    hit: &SearchItem,
    detail: Option<&VideoItem>,
    extracted_at: UtcDateTime,
) -> Record {
    let statistics = detail.map(|detail| &detail.statistics);
    let count = |pick: fn(&VideoStatistics) -> &serde_json::Value| {
        statistics.and_then(|statistics| parse_count(pick(statistics)))
    };

    Record::new(video_id, channel_id, extracted_at)
        .with("video_id", video_id)
        .with("channel_title", hit.snippet.channel_title.clone())
        .with("title", hit.snippet.title.clone())
        .with("description", hit.snippet.description.clone())
        .with("published_at", hit.snippet.published_at.clone())
        .with("thumbnail_url", hit.snippet.thumbnails.high_url())
        .with("view_count", count(|statistics| &statistics.view_count))
        .with("like_count", count(|statistics| &statistics.like_count))
        .with("comment_count", count(|statistics| &statistics.comment_count))
        .with(
            "duration",
            detail.and_then(|detail| detail.content_details.duration.clone()),
        )
        .with("channel_id", channel_id)
        .with("channel_subscribers", parse_count(&channel.statistics.subscriber_count))
        .with("channel_total_views", parse_count(&channel.statistics.view_count))
        .with("channel_video_count", parse_count(&channel.statistics.video_count))
}

#[derive(Debug, Deserialize)]
struct ListPayload<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    #[serde(default)]
    statistics: ChannelStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    #[serde(default)]
    view_count: serde_json::Value,
    #[serde(default)]
    subscriber_count: serde_json::Value,
    #[serde(default)]
    video_count: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPayload {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    #[serde(default)]
    snippet: SearchSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    #[serde(default)]
    channel_title: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    #[serde(default)]
    high: Option<Thumbnail>,
}

impl Thumbnails {
    fn high_url(&self) -> Option<String> {
        self.high.as_ref().map(|thumbnail| thumbnail.url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    statistics: VideoStatistics,
    #[serde(default)]
    content_details: ContentDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    #[serde(default)]
    view_count: serde_json::Value,
    #[serde(default)]
    like_count: serde_json::Value,
    #[serde(default)]
    comment_count: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct ContentDetails {
    #[serde(default)]
    duration: Option<String>,
}
