//! Built-in policy implementations.

pub mod ip_blacklist;
pub mod rate_limit;

pub use ip_blacklist::IpBlacklistPolicy;
pub use rate_limit::RateLimitPolicy;

use crate::policy::StaticPolicyFactory;
use std::sync::Arc;

/// Factory preloaded with every built-in policy under its canonical
/// identifier.
pub fn builtin_policy_factory() -> StaticPolicyFactory {
    let mut factory = StaticPolicyFactory::new();
    factory.register("ip-blacklist", Arc::new(IpBlacklistPolicy));
    factory.register("rate-limit", Arc::new(RateLimitPolicy));
    factory
}
