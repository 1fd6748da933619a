//! Engine façade: lifecycle operations plus per-request executor creation.

use crate::components::ComponentRegistry;
use crate::config::ConnectorConfig;
use crate::connector::{ConnectorFactory, HttpConnectorFactory};
use crate::error::{ConnectorError, EngineError, PublishingError, RegistrationError};
use crate::executor::RequestExecutor;
use crate::metrics::{MetricsSink, NullMetrics};
use crate::policy::{PolicyConfig, PolicyFactory, PolicyWithConfig};
use crate::registry::Registry;
use crate::types::{Api, ApiCoords, ApiRequest, Client, ClientCoords, PolicyDef};
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// The gateway runtime engine.
///
/// Owns the registry, the policy and connector factories, the shared
/// component registry, and the parsed-configuration cache. One engine
/// serves all requests; per-request state lives in the executor it hands
/// out.
pub struct Engine {
    registry: Arc<dyn Registry>,
    policy_factory: Arc<dyn PolicyFactory>,
    connector_factory: Arc<dyn ConnectorFactory>,
    components: Arc<ComponentRegistry>,
    metrics: Arc<dyn MetricsSink>,
    /// Parsed policy configurations, keyed by implementation id plus a
    /// digest of the raw configuration text.
    config_cache: DashMap<String, PolicyConfig>,
}

/// Assembles an [`Engine`] from its collaborators, defaulting the ones the
/// host does not care about.
pub struct EngineBuilder {
    registry: Arc<dyn Registry>,
    policy_factory: Arc<dyn PolicyFactory>,
    connector_factory: Option<Arc<dyn ConnectorFactory>>,
    components: Arc<ComponentRegistry>,
    metrics: Arc<dyn MetricsSink>,
    connector_config: ConnectorConfig,
}

impl EngineBuilder {
    pub fn new(registry: Arc<dyn Registry>, policy_factory: Arc<dyn PolicyFactory>) -> Self {
        Self {
            registry,
            policy_factory,
            connector_factory: None,
            components: Arc::new(ComponentRegistry::new()),
            metrics: Arc::new(NullMetrics),
            connector_config: ConnectorConfig::default(),
        }
    }

    pub fn connector_factory(mut self, factory: Arc<dyn ConnectorFactory>) -> Self {
        self.connector_factory = Some(factory);
        self
    }

    pub fn connector_config(mut self, config: ConnectorConfig) -> Self {
        self.connector_config = config;
        self
    }

    pub fn components(mut self, components: Arc<ComponentRegistry>) -> Self {
        self.components = components;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<Engine, ConnectorError> {
        let connector_factory = match self.connector_factory {
            Some(factory) => factory,
            None => Arc::new(HttpConnectorFactory::new(self.connector_config)?),
        };
        Ok(Engine {
            registry: self.registry,
            policy_factory: self.policy_factory,
            connector_factory,
            components: self.components,
            metrics: self.metrics,
            config_cache: DashMap::new(),
        })
    }
}

impl Engine {
    pub fn builder(
        registry: Arc<dyn Registry>,
        policy_factory: Arc<dyn PolicyFactory>,
    ) -> EngineBuilder {
        EngineBuilder::new(registry, policy_factory)
    }

    /// Resolves a request to an executor, or fails without running any
    /// policy.
    ///
    /// A request with an API key resolves through its contract; a keyless
    /// request resolves by explicit coordinates and only reaches public
    /// APIs. If a keyed request also carries explicit coordinates, the
    /// contract must be for that same API.
    pub async fn executor(&self, mut request: ApiRequest) -> Result<RequestExecutor, EngineError> {
        let (api, policy_defs) = match request.api_key.clone() {
            Some(api_key) => {
                let contract = self.registry.get_contract(&api_key).await?;
                if let Some(requested) = request.api_coords() {
                    if contract.api.coords() != requested {
                        return Err(EngineError::InvalidContractForApi { requested });
                    }
                }
                let api = contract.api.clone();
                let mut defs = api.api_policies.clone();
                defs.extend(contract.policies.iter().cloned());
                request.contract = Some(contract);
                (api, defs)
            }
            None => {
                let coords = request
                    .api_coords()
                    .ok_or(EngineError::MissingApiCoordinates)?;
                let api = self
                    .registry
                    .get_api(&coords)
                    .await?
                    .ok_or(EngineError::ApiNotFound { api: coords.clone() })?;
                if !api.public_api {
                    return Err(EngineError::ApiNotPublic { api: coords });
                }
                let defs = api.api_policies.clone();
                (api, defs)
            }
        };

        let policies = self.resolve_policies(&policy_defs)?;
        tracing::debug!(
            request_id = %request.request_id,
            api = %api.coords(),
            policies = policies.len(),
            "request resolved"
        );
        Ok(RequestExecutor::new(
            request,
            api,
            policies,
            Arc::clone(&self.components),
            Arc::clone(&self.connector_factory),
            Arc::clone(&self.metrics),
            Utc::now(),
        ))
    }

    /// Publishes an API after validating every attached policy: unknown
    /// implementations and unparseable configurations fail here, never at
    /// traffic time.
    pub async fn publish_api(&self, api: Api) -> Result<(), PublishingError> {
        self.validate_policy_defs::<PublishingError>(&api.api_policies)?;
        self.registry.publish_api(api).await
    }

    pub async fn retire_api(&self, coords: &ApiCoords) -> Result<(), PublishingError> {
        self.registry.retire_api(coords).await
    }

    /// Registers a client after validating every contract policy.
    pub async fn register_client(&self, client: Client) -> Result<(), RegistrationError> {
        for contract in &client.contracts {
            self.validate_policy_defs::<RegistrationError>(&contract.policies)?;
        }
        self.registry.register_client(client).await
    }

    pub async fn unregister_client(&self, coords: &ClientCoords) -> Result<(), RegistrationError> {
        self.registry.unregister_client(coords).await
    }

    /// Resolves definitions to executable policies, reusing parsed
    /// configurations across requests.
    fn resolve_policies(&self, defs: &[PolicyDef]) -> Result<Vec<PolicyWithConfig>, EngineError> {
        let mut resolved = Vec::with_capacity(defs.len());
        for def in defs {
            let policy = self.policy_factory.lookup(&def.policy_impl)?;
            let key = config_cache_key(def);
            let config = match self.config_cache.get(&key) {
                Some(cached) => cached.value().clone(),
                None => {
                    let parsed = policy.parse_config(&def.config)?;
                    self.config_cache.insert(key, parsed.clone());
                    parsed
                }
            };
            resolved.push(PolicyWithConfig { policy, config });
        }
        Ok(resolved)
    }

    fn validate_policy_defs<E>(&self, defs: &[PolicyDef]) -> Result<(), E>
    where
        E: From<crate::error::PolicyNotFoundError> + From<crate::error::ConfigurationParseError>,
    {
        for def in defs {
            let policy = self.policy_factory.lookup(&def.policy_impl)?;
            policy.parse_config(&def.config)?;
        }
        Ok(())
    }
}

fn config_cache_key(def: &PolicyDef) -> String {
    let digest = Sha256::digest(def.config.as_bytes());
    format!("{}:{}", def.policy_impl, hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_distinguishes_impl_and_config() {
        let a = config_cache_key(&PolicyDef::new("rate-limit", r#"{"n":1}"#));
        let b = config_cache_key(&PolicyDef::new("rate-limit", r#"{"n":2}"#));
        let c = config_cache_key(&PolicyDef::new("ip-blacklist", r#"{"n":1}"#));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, config_cache_key(&PolicyDef::new("rate-limit", r#"{"n":1}"#)));
    }
}
