//! Resilience policies applied to every external call.
//!
//! - [`RetryPolicy`]: bounded retry with `base * attempt` backoff
//! - [`ResultCache`]: TTL memoization keyed by content fingerprint
//! - [`RateLimiter`]: rolling one-second window per dependency
//!
//! [`guarded_call`] composes the three the same way for every stage: a
//! cache lookup first, then retried attempts, each attempt taking a rate
//! limit slot before it goes out.

pub mod cache;
pub mod rate_limit;
pub mod retry;

use std::future::Future;

pub use cache::{CacheConfig, CacheStats, ResultCache, DEFAULT_TTL};
pub use rate_limit::{RateLimiter, RateLimiters};
pub use retry::{execute, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

use crate::error::{RetryError, ServiceError};
use crate::utils::fingerprint::ContentHash;

/// Call an external service through cache, retry and rate limiter.
///
/// Only transient [`ServiceError`]s are retried. A successful result is
/// stored under `key` when a cache is given.
///
/// # Arguments
///
/// * `cache` - Optional cache and the fingerprint of this request
/// * `limiter` - Limiter of the dependency being called
/// * `retry` - Attempt budget for this call
/// * `call` - Produces one attempt's future
pub async fn guarded_call<V, F, Fut>(
    cache: Option<(&ResultCache<V>, ContentHash)>,
    limiter: &RateLimiter,
    retry: &RetryPolicy,
    mut call: F,
) -> Result<V, RetryError<ServiceError>>
where
    V: Clone,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<V, ServiceError>>,
{
    if let Some((cache, key)) = &cache {
        if let Some(hit) = cache.get(key) {
            tracing::debug!(cache = cache.name(), key = %key, "Cache hit, skipping external call");
            return Ok(hit);
        }
    }

    let value = retry
        .execute_when(
            || {
                let attempt = call();
                async move {
                    limiter.acquire().await;
                    attempt.await
                }
            },
            ServiceError::is_transient,
        )
        .await?;

    if let Some((cache, key)) = cache {
        cache.set(key, value.clone());
    }
    Ok(value)
}
