//! Core gateway entity types.
//!
//! `Api`, `Client` and `Contract` are the long-lived registry entities,
//! mutated only through publish/retire/register/unregister. `ApiRequest`
//! and `ApiResponse` are short-lived, single-request records that travel
//! through the policy chains.

use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// How the gateway talks to an API's backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    Rest,
    Soap,
}

/// Coordinates uniquely identifying a published API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiCoords {
    pub organization_id: String,
    pub api_id: String,
    pub version: String,
}

impl ApiCoords {
    pub fn new(
        organization_id: impl Into<String>,
        api_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            api_id: api_id.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for ApiCoords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.organization_id, self.api_id, self.version)
    }
}

/// Coordinates uniquely identifying a registered client application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientCoords {
    pub organization_id: String,
    pub client_id: String,
    pub version: String,
}

impl ClientCoords {
    pub fn new(
        organization_id: impl Into<String>,
        client_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            client_id: client_id.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for ClientCoords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.organization_id, self.client_id, self.version)
    }
}

/// A reference to a policy implementation plus its raw (unparsed)
/// JSON configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyDef {
    /// Identifier of the policy implementation to apply.
    pub policy_impl: String,
    /// Opaque configuration blob, parsed lazily by the implementation.
    pub config: String,
}

impl PolicyDef {
    pub fn new(policy_impl: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            policy_impl: policy_impl.into(),
            config: config.into(),
        }
    }
}

/// A published backend service managed by the gateway.
///
/// Created on publish, overwritten on republish at the same coordinates,
/// removed on retire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Api {
    pub organization_id: String,
    pub api_id: String,
    pub version: String,
    /// Backend endpoint address, e.g. `http://backend:8080/ping`.
    pub endpoint: String,
    pub endpoint_type: EndpointType,
    /// Public APIs can be invoked without an API key.
    pub public_api: bool,
    /// API-level policies, applied before any contract-level policies.
    pub api_policies: Vec<PolicyDef>,
}

impl Api {
    pub fn coords(&self) -> ApiCoords {
        ApiCoords::new(
            self.organization_id.clone(),
            self.api_id.clone(),
            self.version.clone(),
        )
    }
}

/// A binding of one client to one API: an API key, a plan reference and
/// the contract-level policies layered on top of the API-level ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Unique lookup token presented by the consumer at traffic time.
    pub api_key: String,
    pub plan: String,
    pub api_organization_id: String,
    pub api_id: String,
    pub api_version: String,
    pub policies: Vec<PolicyDef>,
}

impl Contract {
    pub fn api_coords(&self) -> ApiCoords {
        ApiCoords::new(
            self.api_organization_id.clone(),
            self.api_id.clone(),
            self.api_version.clone(),
        )
    }
}

/// A consumer application holding one or more contracts to APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub organization_id: String,
    pub client_id: String,
    pub version: String,
    pub contracts: Vec<Contract>,
}

impl Client {
    pub fn coords(&self) -> ClientCoords {
        ClientCoords::new(
            self.organization_id.clone(),
            self.client_id.clone(),
            self.version.clone(),
        )
    }
}

/// A contract resolved at traffic time: the API key, the currently
/// published `Api` it refers to, and the owning client's coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiContract {
    pub api_key: String,
    pub plan: String,
    pub api: Api,
    pub client: ClientCoords,
    /// Contract-level policies, applied after the API-level ones.
    pub policies: Vec<PolicyDef>,
}

/// An inbound service request as seen by the engine.
///
/// One instance exists per inbound call; it is never pooled or reused.
#[derive(Debug)]
pub struct ApiRequest {
    pub request_id: Uuid,
    pub method: Method,
    /// Destination path (plus query string) on the backend API.
    pub destination: String,
    pub headers: HeaderMap,
    pub remote_addr: Option<IpAddr>,
    /// API key extracted from the transport (header or query parameter).
    pub api_key: Option<String>,
    /// Explicit API coordinates, when the transport routes by coordinates.
    pub api_org_id: Option<String>,
    pub api_id: Option<String>,
    pub api_version: Option<String>,
    /// Set exactly once by the engine when contract resolution succeeds.
    pub contract: Option<ApiContract>,
}

impl ApiRequest {
    pub fn new(method: Method, destination: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method,
            destination: destination.into(),
            headers: HeaderMap::new(),
            remote_addr: None,
            api_key: None,
            api_org_id: None,
            api_id: None,
            api_version: None,
            contract: None,
        }
    }

    /// Explicit API coordinates carried by the request, if all three parts
    /// are present.
    pub fn api_coords(&self) -> Option<ApiCoords> {
        match (&self.api_org_id, &self.api_id, &self.api_version) {
            (Some(org), Some(id), Some(version)) => {
                Some(ApiCoords::new(org.clone(), id.clone(), version.clone()))
            }
            _ => None,
        }
    }
}

/// The response head returned from a backend (or synthesized from cache).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub code: u16,
    pub message: String,
    pub headers: HeaderMap,
}

impl ApiResponse {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            message: http::StatusCode::from_u16(code)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or_default()
                .to_string(),
            headers: HeaderMap::new(),
        }
    }
}

/// Classification of an expected policy rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    Authentication,
    Authorization,
    RateLimit,
    NotFound,
    Other,
}

/// A structured, expected rejection produced by a policy.
///
/// This is a routine chain outcome ("the request was rejected"), distinct
/// from a transport or programming error. It is converted into a response
/// by the transport layer, never propagated as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyFailure {
    pub failure_type: FailureType,
    /// Policy-specific failure code, stable across releases.
    pub failure_code: i32,
    /// Suggested HTTP status for the synthesized response.
    pub response_code: u16,
    pub message: String,
    pub headers: HeaderMap,
}

impl PolicyFailure {
    pub fn new(
        failure_type: FailureType,
        failure_code: i32,
        response_code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            failure_type,
            failure_code,
            response_code,
            message: message.into(),
            headers: HeaderMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_coords_round_trip() {
        let api = Api {
            organization_id: "org1".into(),
            api_id: "svc1".into(),
            version: "1.0".into(),
            endpoint: "http://backend/ping".into(),
            endpoint_type: EndpointType::Rest,
            public_api: true,
            api_policies: Vec::new(),
        };
        assert_eq!(api.coords(), ApiCoords::new("org1", "svc1", "1.0"));
        assert_eq!(api.coords().to_string(), "org1/svc1/1.0");
    }

    #[test]
    fn request_coords_require_all_three_parts() {
        let mut request = ApiRequest::new(Method::GET, "/ping");
        assert!(request.api_coords().is_none());

        request.api_org_id = Some("org1".into());
        request.api_id = Some("svc1".into());
        assert!(request.api_coords().is_none());

        request.api_version = Some("1.0".into());
        assert_eq!(request.api_coords(), Some(ApiCoords::new("org1", "svc1", "1.0")));
    }

    #[test]
    fn response_message_uses_canonical_reason() {
        assert_eq!(ApiResponse::new(200).message, "OK");
        assert_eq!(ApiResponse::new(429).message, "Too Many Requests");
    }

    #[test]
    fn bean_serialization_round_trip() {
        let api = Api {
            organization_id: "org1".into(),
            api_id: "svc1".into(),
            version: "1.0".into(),
            endpoint: "http://backend/ping".into(),
            endpoint_type: EndpointType::Rest,
            public_api: false,
            api_policies: vec![PolicyDef::new("ip-blacklist", r#"{"ip_list":[]}"#)],
        };
        let bean = serde_json::to_string(&api).unwrap();
        let parsed: Api = serde_json::from_str(&bean).unwrap();
        assert_eq!(parsed, api);
    }
}
