//! Error taxonomy for the gateway runtime.
//!
//! Each category is a distinct type so callers can map them to different
//! transport behaviors: configuration errors fail fast at publish/register
//! time, resolution errors terminate a request before any policy runs, and
//! connector errors are kept apart from policy rejections (which are values,
//! see [`crate::types::PolicyFailure`], never errors).

use crate::types::{ApiCoords, ClientCoords};
use thiserror::Error;

/// A policy configuration blob could not be parsed.
///
/// Surfaced at publish/registration time, never mid-chain.
#[derive(Debug, Error, Clone)]
#[error("unable to parse policy configuration for '{policy_impl}': {details}")]
pub struct ConfigurationParseError {
    pub policy_impl: String,
    pub details: String,
}

/// No policy implementation is registered under the requested identifier.
#[derive(Debug, Error, Clone)]
#[error("policy implementation not found: {policy_impl}")]
pub struct PolicyNotFoundError {
    pub policy_impl: String,
}

/// A policy asked for a shared component the host did not provide.
#[derive(Debug, Error, Clone)]
#[error("component not found: {component}")]
pub struct ComponentNotFoundError {
    pub component: &'static str,
}

/// Contract/API resolution failures reported by a [`crate::registry::Registry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No contract exists for the presented API key.
    #[error("no contract found for API key '{api_key}'")]
    NoContractForKey { api_key: String },

    /// A contract record exists but the API it references has been retired.
    #[error("contract references a retired API: {api}")]
    ApiRetired { api: ApiCoords },

    /// Storage backend failure (I/O, serialization, connectivity).
    #[error("registry backend error: {0}")]
    Backend(String),
}

/// Failures publishing or retiring an API.
#[derive(Debug, Error)]
pub enum PublishingError {
    #[error("API not found: {api}")]
    ApiNotFound { api: ApiCoords },

    #[error(transparent)]
    PolicyNotFound(#[from] PolicyNotFoundError),

    #[error(transparent)]
    InvalidPolicyConfig(#[from] ConfigurationParseError),

    #[error("registry backend error: {0}")]
    Backend(String),
}

/// Failures registering or unregistering a client.
///
/// Registration validates everything before persisting anything; any of
/// these means no partial write occurred.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("client has no contracts: {client}")]
    NoContracts { client: ClientCoords },

    #[error("contract references an unpublished API: {api}")]
    ApiNotFoundForContract { api: ApiCoords },

    /// The API key is the contract table's primary key; a second client
    /// may not claim a key another client already holds.
    #[error("API key '{api_key}' is already registered to client {client}")]
    ApiKeyInUse {
        api_key: String,
        client: ClientCoords,
    },

    #[error("client not found: {client}")]
    ClientNotFound { client: ClientCoords },

    #[error(transparent)]
    PolicyNotFound(#[from] PolicyNotFoundError),

    #[error(transparent)]
    InvalidPolicyConfig(#[from] ConfigurationParseError),

    #[error("registry backend error: {0}")]
    Backend(String),
}

/// Backend connector failures: unreachable, timed out, or broken mid-stream.
///
/// Kept distinct from policy failures so transports can choose a different
/// status mapping (gateway error vs. policy-rejected).
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid backend endpoint '{endpoint}': {details}")]
    InvalidEndpoint { endpoint: String, details: String },

    #[error("timed out waiting for the backend after {phase}")]
    Timeout { phase: &'static str },

    #[error("unable to connect to the backend: {0}")]
    Connect(String),

    #[error("backend I/O error: {0}")]
    Io(String),

    /// The connection was aborted before the backend answered.
    #[error("connection aborted")]
    Aborted,

    /// `end()` was invoked more than once on the same connection.
    #[error("connection already completed")]
    AlreadyCompleted,
}

/// Unexpected failure inside a policy. Fatal for the request it occurred
/// in, triggers abort semantics, and is never retried by the engine.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    ComponentNotFound(#[from] ComponentNotFoundError),

    #[error("policy execution failed: {0}")]
    Internal(String),

    /// A chain method was invoked in a state that does not allow it.
    #[error("policy chain state error: {0}")]
    ChainState(&'static str),
}

/// Top-level engine errors returned to the transport layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request carried neither an API key nor full API coordinates.
    #[error("request did not identify an API")]
    MissingApiCoordinates,

    #[error("API not found: {api}")]
    ApiNotFound { api: ApiCoords },

    #[error("API is not public: {api}")]
    ApiNotPublic { api: ApiCoords },

    /// The API key resolved to a contract for a different API than the one
    /// named by the request's explicit coordinates.
    #[error("contract for API key is not valid for the requested API {requested}")]
    InvalidContractForApi { requested: ApiCoords },

    #[error(transparent)]
    InvalidContract(#[from] RegistryError),

    #[error(transparent)]
    PolicyNotFound(#[from] PolicyNotFoundError),

    #[error(transparent)]
    InvalidPolicyConfig(#[from] ConfigurationParseError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}
