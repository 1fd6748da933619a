//! Registry contract: the single source of truth for which APIs and
//! contracts are currently valid.
//!
//! Publish/retire and register/unregister are each atomic as a unit.
//! Cross-entity consistency (contract -> API) is enforced only at
//! registration time and at resolution time, never continuously: an API may
//! be retired after a contract referencing it was validated, and that
//! contract then fails lazily on its next resolution.

pub mod memory;

pub use memory::InMemoryRegistry;

use crate::error::{PublishingError, RegistrationError, RegistryError};
use crate::types::{Api, ApiContract, ApiCoords, Client, ClientCoords};
use async_trait::async_trait;

/// Resolver and store for APIs, clients and contracts.
///
/// Implementations may complete synchronously before returning (a blocking
/// backend run on a worker) or truly asynchronously; callers must not
/// assume either.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Resolves an API key to its contract.
    ///
    /// Verifies that the referenced API is still published: a contract
    /// whose API has been retired fails with [`RegistryError::ApiRetired`]
    /// even though the contract record still exists. On success the
    /// returned contract carries the currently published API snapshot.
    async fn get_contract(&self, api_key: &str) -> Result<ApiContract, RegistryError>;

    /// Gets a published API by coordinates, or `None`.
    async fn get_api(&self, coords: &ApiCoords) -> Result<Option<Api>, RegistryError>;

    /// Publishes an API: an idempotent upsert keyed by coordinates. The
    /// prior record at the same coordinates is replaced atomically.
    async fn publish_api(&self, api: Api) -> Result<(), PublishingError>;

    /// Retires an API, removing its record. In-flight requests holding a
    /// resolved snapshot are unaffected.
    async fn retire_api(&self, coords: &ApiCoords) -> Result<(), PublishingError>;

    /// Registers a client, validating every contract's API reference
    /// before persisting anything. The client record and all its contracts
    /// are (re)written as one atomic unit; any failure means nothing was
    /// written.
    async fn register_client(&self, client: Client) -> Result<(), RegistrationError>;

    /// Removes a client and all its contracts together.
    async fn unregister_client(&self, coords: &ClientCoords) -> Result<(), RegistrationError>;
}
