use std::time::Duration;

use crate::ProviderId;

/// Call pacing and per-request bounds for one provider API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    /// Minimum spacing between two consecutive calls to the provider.
    pub min_interval: Duration,
    pub request_timeout: Duration,
    /// Upper bound on followed result pages per sub-scope.
    pub max_pages: u32,
}

impl ProviderPolicy {
    pub fn binance_default() -> Self {
        Self {
            provider_id: ProviderId::Binance,
            min_interval: Duration::from_millis(200),
            request_timeout: Duration::from_secs(10),
            max_pages: 1,
        }
    }

    /// Data API v3 costs quota per call, so calls are spaced and the
    /// upload listing is capped.
    pub fn youtube_default() -> Self {
        Self {
            provider_id: ProviderId::Youtube,
            min_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(10),
            max_pages: 20,
        }
    }

    pub fn github_default() -> Self {
        Self {
            provider_id: ProviderId::Github,
            min_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
            max_pages: 1,
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Binance => Self::binance_default(),
            ProviderId::Youtube => Self::youtube_default(),
            ProviderId::Github => Self::github_default(),
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn request_timeout_ms(&self) -> u64 {
        u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_policy_spaces_calls_by_200ms() {
        let policy = ProviderPolicy::binance_default();

        assert_eq!(policy.provider_id, ProviderId::Binance);
        assert_eq!(policy.min_interval, Duration::from_millis(200));
        assert_eq!(policy.request_timeout_ms(), 10_000);
    }

    #[test]
    fn max_pages_never_drops_below_one() {
        let policy = ProviderPolicy::github_default().with_max_pages(0);
        assert_eq!(policy.max_pages, 1);
    }
}
