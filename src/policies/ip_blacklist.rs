//! Rejects requests from blacklisted source addresses.

use crate::error::{ConfigurationParseError, PolicyError};
use crate::policy::{expect_config, Policy, PolicyConfig, PolicyContext, PolicyVerdict};
use crate::types::{ApiRequest, FailureType, PolicyFailure};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    ip_list: Vec<IpAddr>,
}

#[derive(Debug)]
pub struct IpBlacklistConfig {
    blocked: HashSet<IpAddr>,
}

/// Denies any request whose source address appears in the configured list.
/// A request with no known source address is allowed through.
pub struct IpBlacklistPolicy;

pub const FAILURE_CODE_IP_BLACKLISTED: i32 = 10_002;

#[async_trait]
impl Policy for IpBlacklistPolicy {
    fn parse_config(&self, raw: &str) -> Result<PolicyConfig, ConfigurationParseError> {
        let parsed: RawConfig =
            serde_json::from_str(raw).map_err(|e| ConfigurationParseError {
                policy_impl: "ip-blacklist".into(),
                details: e.to_string(),
            })?;
        Ok(Arc::new(IpBlacklistConfig {
            blocked: parsed.ip_list.into_iter().collect(),
        }))
    }

    async fn apply_to_request(
        &self,
        request: &mut ApiRequest,
        _context: &mut PolicyContext,
        config: &PolicyConfig,
    ) -> Result<PolicyVerdict, PolicyError> {
        let config = expect_config::<IpBlacklistConfig>(config)?;
        if let Some(addr) = request.remote_addr {
            if config.blocked.contains(&addr) {
                return Ok(PolicyVerdict::Reject(PolicyFailure::new(
                    FailureType::Authorization,
                    FAILURE_CODE_IP_BLACKLISTED,
                    403,
                    format!("source address {addr} is not permitted"),
                )));
            }
        }
        Ok(PolicyVerdict::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentRegistry;
    use http::Method;

    fn context() -> PolicyContext {
        PolicyContext::new(Arc::new(ComponentRegistry::new()))
    }

    #[tokio::test]
    async fn blocks_listed_address_and_allows_others() {
        let policy = IpBlacklistPolicy;
        let config = policy
            .parse_config(r#"{"ip_list":["10.0.0.8","192.168.1.1"]}"#)
            .unwrap();

        let mut request = ApiRequest::new(Method::GET, "/things");
        request.remote_addr = Some("10.0.0.8".parse().unwrap());
        let verdict = policy
            .apply_to_request(&mut request, &mut context(), &config)
            .await
            .unwrap();
        match verdict {
            PolicyVerdict::Reject(failure) => {
                assert_eq!(failure.response_code, 403);
                assert_eq!(failure.failure_code, FAILURE_CODE_IP_BLACKLISTED);
                assert_eq!(failure.failure_type, FailureType::Authorization);
            }
            PolicyVerdict::Continue => panic!("expected rejection"),
        }

        request.remote_addr = Some("10.0.0.9".parse().unwrap());
        assert!(matches!(
            policy
                .apply_to_request(&mut request, &mut context(), &config)
                .await
                .unwrap(),
            PolicyVerdict::Continue
        ));
    }

    #[tokio::test]
    async fn unknown_source_address_is_allowed() {
        let policy = IpBlacklistPolicy;
        let config = policy.parse_config(r#"{"ip_list":["10.0.0.8"]}"#).unwrap();
        let mut request = ApiRequest::new(Method::GET, "/things");
        assert!(matches!(
            policy
                .apply_to_request(&mut request, &mut context(), &config)
                .await
                .unwrap(),
            PolicyVerdict::Continue
        ));
    }

    #[test]
    fn malformed_config_fails_to_parse() {
        let policy = IpBlacklistPolicy;
        assert!(policy.parse_config(r#"{"ip_list":["not-an-ip"]}"#).is_err());
        assert!(policy.parse_config("not json").is_err());
    }
}
