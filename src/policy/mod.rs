//! Policy abstraction: a unit of traffic-affecting logic with a parsed
//! configuration, applied once per chain position to the inbound request
//! or the outbound response.
//!
//! A policy does exactly one of three things per application: continue the
//! chain, reject with a [`PolicyFailure`], or fail hard with a
//! [`PolicyError`]. The verdict is the return value, so the type system
//! rules out "more than one of these" by construction.

pub mod chain;
pub mod context;

pub use chain::{BodyTap, ChainOutcome, ChainState, RequestChain, ResponseChain};
pub use context::PolicyContext;

use crate::error::{ConfigurationParseError, PolicyError, PolicyNotFoundError};
use crate::types::{ApiRequest, ApiResponse, PolicyFailure};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A parsed policy configuration. Parsing is deterministic and
/// side-effect-free, so parsed configs are cached and shared across
/// concurrent requests.
pub type PolicyConfig = Arc<dyn Any + Send + Sync>;

/// Outcome of applying one policy at one chain position.
#[derive(Debug)]
pub enum PolicyVerdict {
    /// Advance to the next policy (or the terminal connector step).
    Continue,
    /// Reject the request: remaining policies and the backend call are
    /// skipped and the failure is converted into a response.
    Reject(PolicyFailure),
}

/// A policy implementation.
///
/// Implementations are stateless and shared; all per-request state lives in
/// the [`PolicyContext`] or in a [`BodyTap`] created per chain.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Parses the raw JSON configuration into whatever typed object the
    /// implementation wants back in `apply_*`.
    fn parse_config(&self, raw: &str) -> Result<PolicyConfig, ConfigurationParseError>;

    /// Applies the policy to an inbound request.
    async fn apply_to_request(
        &self,
        request: &mut ApiRequest,
        context: &mut PolicyContext,
        config: &PolicyConfig,
    ) -> Result<PolicyVerdict, PolicyError>;

    /// Applies the policy to an outbound response. Most policies only act
    /// on the request.
    async fn apply_to_response(
        &self,
        _response: &mut ApiResponse,
        _context: &mut PolicyContext,
        _config: &PolicyConfig,
    ) -> Result<PolicyVerdict, PolicyError> {
        Ok(PolicyVerdict::Continue)
    }

    /// Body tap to install on the request chain, if this policy inspects
    /// or transforms the request body.
    fn request_body_tap(&self, _config: &PolicyConfig) -> Option<Box<dyn BodyTap>> {
        None
    }

    /// Body tap to install on the response chain.
    fn response_body_tap(&self, _config: &PolicyConfig) -> Option<Box<dyn BodyTap>> {
        None
    }
}

/// Downcasts a cached [`PolicyConfig`] to the concrete type produced by
/// `parse_config`. A mismatch is a programming error in the policy, not a
/// rejection.
pub fn expect_config<T: Any + Send + Sync>(config: &PolicyConfig) -> Result<&T, PolicyError> {
    config.downcast_ref::<T>().ok_or_else(|| {
        PolicyError::Internal(format!(
            "unexpected configuration type, wanted {}",
            std::any::type_name::<T>()
        ))
    })
}

/// A policy implementation paired with its parsed configuration; the unit
/// the chains iterate over.
#[derive(Clone)]
pub struct PolicyWithConfig {
    pub policy: Arc<dyn Policy>,
    pub config: PolicyConfig,
}

/// Lookup from policy implementation identifier to an executable policy.
///
/// Failure to find one surfaces at publish/registration time as a
/// [`PolicyNotFoundError`], never at traffic time.
pub trait PolicyFactory: Send + Sync {
    fn lookup(&self, policy_impl: &str) -> Result<Arc<dyn Policy>, PolicyNotFoundError>;
}

/// A fixed table of policy implementations, populated by the host at
/// startup.
#[derive(Default)]
pub struct StaticPolicyFactory {
    policies: HashMap<String, Arc<dyn Policy>>,
}

impl StaticPolicyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, policy_impl: impl Into<String>, policy: Arc<dyn Policy>) {
        self.policies.insert(policy_impl.into(), policy);
    }
}

impl PolicyFactory for StaticPolicyFactory {
    fn lookup(&self, policy_impl: &str) -> Result<Arc<dyn Policy>, PolicyNotFoundError> {
        self.policies
            .get(policy_impl)
            .cloned()
            .ok_or_else(|| PolicyNotFoundError {
                policy_impl: policy_impl.to_string(),
            })
    }
}
