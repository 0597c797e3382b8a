use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::provider_policy::ProviderPolicy;
use crate::ProviderId;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Spaces calls to one provider by at least `min_interval`.
///
/// Cloning shares the underlying limiter.
#[derive(Clone)]
pub struct ProviderThrottle {
    limiter: Arc<DirectRateLimiter>,
    min_interval: Duration,
}

impl ProviderThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_interval(min_interval))),
            min_interval,
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self::new(policy.min_interval)
    }

    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the next call may be issued.
    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for ProviderThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderThrottle")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

/// One throttle per provider, shared by every adapter built from the registry.
#[derive(Debug, Clone, Default)]
pub struct ThrottleRegistry {
    throttles: Arc<Mutex<HashMap<ProviderId, ProviderThrottle>>>,
}

impl ThrottleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the provider's throttle, creating it from `policy` on first use.
    /// Later policies for the same provider do not replace the existing one.
    pub fn throttle_for(&self, policy: &ProviderPolicy) -> ProviderThrottle {
        let mut throttles = self
            .throttles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        throttles
            .entry(policy.provider_id)
            .or_insert_with(|| ProviderThrottle::from_policy(policy))
            .clone()
    }
}

fn quota_from_interval(min_interval: Duration) -> Quota {
    let period = min_interval.max(Duration::from_millis(1));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::MIN)
}
