//! In-memory reference registry.
//!
//! Tables mirror the reference storage schema: `apis` keyed by coordinates,
//! `clients` keyed by coordinates, `contracts` keyed by API key, each value
//! a full entity snapshot. Reads are lock-free; the four write operations
//! serialize behind one async mutex so each is atomic as a unit.

use crate::error::{PublishingError, RegistrationError, RegistryError};
use crate::registry::Registry;
use crate::types::{Api, ApiContract, ApiCoords, Client, ClientCoords};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryRegistry {
    apis: DashMap<ApiCoords, Api>,
    clients: DashMap<ClientCoords, Client>,
    contracts: DashMap<String, ApiContract>,
    /// Serializes publish/retire/register/unregister.
    write_lock: Mutex<()>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn get_contract(&self, api_key: &str) -> Result<ApiContract, RegistryError> {
        let mut contract = self
            .contracts
            .get(api_key)
            .map(|c| c.clone())
            .ok_or_else(|| RegistryError::NoContractForKey {
                api_key: api_key.to_string(),
            })?;

        // The API may have been retired since registration; detect lazily.
        let coords = contract.api.coords();
        match self.apis.get(&coords) {
            Some(api) => {
                // Hand back the currently published snapshot so a republish
                // (e.g. changed endpoint or policies) takes effect.
                contract.api = api.clone();
                Ok(contract)
            }
            None => Err(RegistryError::ApiRetired { api: coords }),
        }
    }

    async fn get_api(&self, coords: &ApiCoords) -> Result<Option<Api>, RegistryError> {
        Ok(self.apis.get(coords).map(|a| a.clone()))
    }

    async fn publish_api(&self, api: Api) -> Result<(), PublishingError> {
        let _guard = self.write_lock.lock().await;
        let coords = api.coords();
        tracing::info!(api = %coords, "publishing API");
        self.apis.insert(coords, api);
        Ok(())
    }

    async fn retire_api(&self, coords: &ApiCoords) -> Result<(), PublishingError> {
        let _guard = self.write_lock.lock().await;
        tracing::info!(api = %coords, "retiring API");
        self.apis
            .remove(coords)
            .map(|_| ())
            .ok_or_else(|| PublishingError::ApiNotFound { api: coords.clone() })
    }

    async fn register_client(&self, client: Client) -> Result<(), RegistrationError> {
        let _guard = self.write_lock.lock().await;
        let client_coords = client.coords();

        if client.contracts.is_empty() {
            return Err(RegistrationError::NoContracts {
                client: client_coords,
            });
        }

        // Validate every contract before touching any table.
        let mut resolved = Vec::with_capacity(client.contracts.len());
        for contract in &client.contracts {
            // API key is the contract table's key; another client holding
            // it blocks the whole registration.
            if let Some(existing) = self.contracts.get(&contract.api_key) {
                if existing.client != client_coords {
                    return Err(RegistrationError::ApiKeyInUse {
                        api_key: contract.api_key.clone(),
                        client: existing.client.clone(),
                    });
                }
            }
            let api_coords = contract.api_coords();
            let api = self
                .apis
                .get(&api_coords)
                .map(|a| a.clone())
                .ok_or(RegistrationError::ApiNotFoundForContract { api: api_coords })?;
            resolved.push(ApiContract {
                api_key: contract.api_key.clone(),
                plan: contract.plan.clone(),
                api,
                client: client_coords.clone(),
                policies: contract.policies.clone(),
            });
        }

        // Replace any previous registration of this client wholesale.
        self.contracts.retain(|_, c| c.client != client_coords);
        for contract in resolved {
            self.contracts.insert(contract.api_key.clone(), contract);
        }
        tracing::info!(client = %client_coords, contracts = client.contracts.len(), "registered client");
        self.clients.insert(client_coords, client);
        Ok(())
    }

    async fn unregister_client(&self, coords: &ClientCoords) -> Result<(), RegistrationError> {
        let _guard = self.write_lock.lock().await;
        if self.clients.remove(coords).is_none() {
            return Err(RegistrationError::ClientNotFound {
                client: coords.clone(),
            });
        }
        self.contracts.retain(|_, c| &c.client != coords);
        tracing::info!(client = %coords, "unregistered client");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Contract, EndpointType, PolicyDef};

    fn api(org: &str, id: &str, version: &str) -> Api {
        Api {
            organization_id: org.into(),
            api_id: id.into(),
            version: version.into(),
            endpoint: format!("http://backend/{id}"),
            endpoint_type: EndpointType::Rest,
            public_api: true,
            api_policies: Vec::new(),
        }
    }

    fn client_with_contract(api_key: &str, api: &Api) -> Client {
        Client {
            organization_id: "org1".into(),
            client_id: "app1".into(),
            version: "1.0".into(),
            contracts: vec![Contract {
                api_key: api_key.into(),
                plan: "gold".into(),
                api_organization_id: api.organization_id.clone(),
                api_id: api.api_id.clone(),
                api_version: api.version.clone(),
                policies: vec![PolicyDef::new("rate-limit", r#"{"requests_per_second":10.0}"#)],
            }],
        }
    }

    #[tokio::test]
    async fn publish_get_retire_round_trip() {
        let registry = InMemoryRegistry::new();
        let api = api("org1", "svc1", "1.0");
        let coords = api.coords();

        registry.publish_api(api.clone()).await.unwrap();
        assert_eq!(registry.get_api(&coords).await.unwrap(), Some(api));

        registry.retire_api(&coords).await.unwrap();
        assert_eq!(registry.get_api(&coords).await.unwrap(), None);
    }

    #[tokio::test]
    async fn republish_replaces_the_record() {
        let registry = InMemoryRegistry::new();
        let mut api = api("org1", "svc1", "1.0");
        registry.publish_api(api.clone()).await.unwrap();

        api.endpoint = "http://elsewhere/svc1".into();
        registry.publish_api(api.clone()).await.unwrap();

        let stored = registry.get_api(&api.coords()).await.unwrap().unwrap();
        assert_eq!(stored.endpoint, "http://elsewhere/svc1");
    }

    #[tokio::test]
    async fn retiring_an_unknown_api_fails() {
        let registry = InMemoryRegistry::new();
        let err = registry
            .retire_api(&ApiCoords::new("org1", "ghost", "1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishingError::ApiNotFound { .. }));
    }

    #[tokio::test]
    async fn register_then_resolve_contract() {
        let registry = InMemoryRegistry::new();
        let api = api("org1", "svc1", "1.0");
        registry.publish_api(api.clone()).await.unwrap();
        registry
            .register_client(client_with_contract("K1", &api))
            .await
            .unwrap();

        let contract = registry.get_contract("K1").await.unwrap();
        assert_eq!(contract.api.coords(), api.coords());
        assert_eq!(contract.plan, "gold");
        assert_eq!(contract.policies.len(), 1);
    }

    #[tokio::test]
    async fn unknown_key_is_a_distinct_error_from_retired_api() {
        let registry = InMemoryRegistry::new();
        let api = api("org1", "svc1", "1.0");
        registry.publish_api(api.clone()).await.unwrap();
        registry
            .register_client(client_with_contract("K1", &api))
            .await
            .unwrap();

        assert!(matches!(
            registry.get_contract("K2").await.unwrap_err(),
            RegistryError::NoContractForKey { .. }
        ));

        registry.retire_api(&api.coords()).await.unwrap();
        assert!(matches!(
            registry.get_contract("K1").await.unwrap_err(),
            RegistryError::ApiRetired { .. }
        ));
    }

    #[tokio::test]
    async fn resolution_sees_the_republished_api() {
        let registry = InMemoryRegistry::new();
        let mut api = api("org1", "svc1", "1.0");
        registry.publish_api(api.clone()).await.unwrap();
        registry
            .register_client(client_with_contract("K1", &api))
            .await
            .unwrap();

        api.endpoint = "http://v2-backend/svc1".into();
        registry.publish_api(api).await.unwrap();

        let contract = registry.get_contract("K1").await.unwrap();
        assert_eq!(contract.api.endpoint, "http://v2-backend/svc1");
    }

    #[tokio::test]
    async fn registration_validates_before_writing() {
        let registry = InMemoryRegistry::new();
        let published = api("org1", "svc1", "1.0");
        registry.publish_api(published.clone()).await.unwrap();

        // Two contracts, second references an unpublished API: nothing is
        // written, including the valid first contract.
        let mut client = client_with_contract("K1", &published);
        client.contracts.push(Contract {
            api_key: "K2".into(),
            plan: "gold".into(),
            api_organization_id: "org1".into(),
            api_id: "ghost".into(),
            api_version: "1.0".into(),
            policies: Vec::new(),
        });

        let err = registry.register_client(client).await.unwrap_err();
        assert!(matches!(err, RegistrationError::ApiNotFoundForContract { .. }));
        assert!(matches!(
            registry.get_contract("K1").await.unwrap_err(),
            RegistryError::NoContractForKey { .. }
        ));
    }

    #[tokio::test]
    async fn zero_contract_clients_are_rejected() {
        let registry = InMemoryRegistry::new();
        let client = Client {
            organization_id: "org1".into(),
            client_id: "app1".into(),
            version: "1.0".into(),
            contracts: Vec::new(),
        };
        assert!(matches!(
            registry.register_client(client).await.unwrap_err(),
            RegistrationError::NoContracts { .. }
        ));
    }

    #[tokio::test]
    async fn reregistration_replaces_all_contracts() {
        let registry = InMemoryRegistry::new();
        let api = api("org1", "svc1", "1.0");
        registry.publish_api(api.clone()).await.unwrap();
        registry
            .register_client(client_with_contract("K1", &api))
            .await
            .unwrap();

        // Same client, new key: the old contract disappears with it.
        registry
            .register_client(client_with_contract("K9", &api))
            .await
            .unwrap();

        assert!(registry.get_contract("K9").await.is_ok());
        assert!(matches!(
            registry.get_contract("K1").await.unwrap_err(),
            RegistryError::NoContractForKey { .. }
        ));
    }

    #[tokio::test]
    async fn api_key_held_by_another_client_blocks_registration() {
        let registry = InMemoryRegistry::new();
        let api = api("org1", "svc1", "1.0");
        registry.publish_api(api.clone()).await.unwrap();
        registry
            .register_client(client_with_contract("K1", &api))
            .await
            .unwrap();

        // A different client presenting the same key is rejected wholesale.
        let mut intruder = client_with_contract("K1", &api);
        intruder.client_id = "app2".into();
        let err = registry.register_client(intruder).await.unwrap_err();
        assert!(matches!(err, RegistrationError::ApiKeyInUse { .. }));

        // The original owner's contract is untouched.
        let contract = registry.get_contract("K1").await.unwrap();
        assert_eq!(contract.client, ClientCoords::new("org1", "app1", "1.0"));

        // The same client re-registering its own key is still allowed.
        registry
            .register_client(client_with_contract("K1", &api))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unregister_removes_client_and_contracts() {
        let registry = InMemoryRegistry::new();
        let api = api("org1", "svc1", "1.0");
        registry.publish_api(api.clone()).await.unwrap();
        let client = client_with_contract("K1", &api);
        let coords = client.coords();
        registry.register_client(client).await.unwrap();

        registry.unregister_client(&coords).await.unwrap();
        assert!(matches!(
            registry.get_contract("K1").await.unwrap_err(),
            RegistryError::NoContractForKey { .. }
        ));
        assert!(matches!(
            registry.unregister_client(&coords).await.unwrap_err(),
            RegistrationError::ClientNotFound { .. }
        ));
    }
}
