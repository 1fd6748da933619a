//! Token-bucket rate limiting, keyed per contract.

use crate::components::RateLimiter;
use crate::error::{ConfigurationParseError, PolicyError};
use crate::policy::{expect_config, Policy, PolicyConfig, PolicyContext, PolicyVerdict};
use crate::types::{ApiRequest, FailureType, PolicyFailure};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
}

/// Rejects with 429 once the caller's token bucket is exhausted.
///
/// Buckets live in the shared [`RateLimiter`] component: keyed by API key
/// when the request carries a contract, otherwise by API coordinates, so
/// public API traffic shares one bucket per API.
pub struct RateLimitPolicy;

pub const FAILURE_CODE_RATE_LIMITED: i32 = 10_005;

#[async_trait]
impl Policy for RateLimitPolicy {
    fn parse_config(&self, raw: &str) -> Result<PolicyConfig, ConfigurationParseError> {
        let parsed: RateLimitConfig =
            serde_json::from_str(raw).map_err(|e| ConfigurationParseError {
                policy_impl: "rate-limit".into(),
                details: e.to_string(),
            })?;
        if parsed.requests_per_second <= 0.0 {
            return Err(ConfigurationParseError {
                policy_impl: "rate-limit".into(),
                details: "requests_per_second must be positive".into(),
            });
        }
        Ok(Arc::new(parsed))
    }

    async fn apply_to_request(
        &self,
        request: &mut ApiRequest,
        context: &mut PolicyContext,
        config: &PolicyConfig,
    ) -> Result<PolicyVerdict, PolicyError> {
        let config = expect_config::<RateLimitConfig>(config)?;
        let limiter = context.component::<RateLimiter>()?;

        let key = match (&request.api_key, request.api_coords()) {
            (Some(api_key), _) => format!("key:{api_key}"),
            (None, Some(coords)) => format!("api:{coords}"),
            (None, None) => "anonymous".to_string(),
        };

        if limiter.try_acquire(&key, config.requests_per_second).await {
            Ok(PolicyVerdict::Continue)
        } else {
            Ok(PolicyVerdict::Reject(PolicyFailure::new(
                FailureType::RateLimit,
                FAILURE_CODE_RATE_LIMITED,
                429,
                "rate limit exceeded",
            )))
        }
    }
}
