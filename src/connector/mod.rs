//! Backend connector abstraction.
//!
//! A connector opens one logical bidirectional connection to the backend
//! implementation of an API for one request. The executor cannot tell a
//! live backend call apart from a substituted one (see [`cache`]): both
//! satisfy the same write/end/read contract with identical handler
//! guarantees.

pub mod cache;
pub mod http;

pub use cache::{CacheConnectorInterceptor, CachedResponse};
pub use http::HttpConnectorFactory;

use crate::error::ConnectorError;
use crate::types::{Api, ApiRequest, ApiResponse};
use ::http::header::{self, HeaderMap, HeaderName};
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Creates a connector for one request against one API.
pub trait ConnectorFactory: Send + Sync {
    fn create_connector(
        &self,
        request: &ApiRequest,
        api: &Api,
    ) -> Result<Box<dyn Connector>, ConnectorError>;
}

/// A factory-produced connector; `connect` opens the logical connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &ApiRequest) -> Result<Box<dyn Connection>, ConnectorError>;
}

/// An open connection accepting the outbound request body.
///
/// `write` calls must reach the backend in submission order; `end`
/// completes exactly once with either the backend's response or an error
/// (a second call is [`ConnectorError::AlreadyCompleted`]).
#[async_trait]
pub trait Connection: Send {
    fn write(&mut self, chunk: Bytes);

    async fn end(&mut self) -> Result<Box<dyn ConnectionResponse>, ConnectorError>;

    /// Aborts the connection and releases its resources. Safe to call any
    /// number of times; calls after the first are no-ops.
    fn abort(&mut self);

    fn is_connected(&self) -> bool;
}

/// The backend's response: a head plus an ordered pull stream of body
/// chunks terminated by exactly one `None`.
#[async_trait]
pub trait ConnectionResponse: Send {
    fn head(&self) -> &ApiResponse;

    fn head_mut(&mut self) -> &mut ApiResponse;

    /// Next body chunk, or `None` exactly once at end of stream. After
    /// `abort` this yields `None` without touching the backend.
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ConnectorError>;

    /// Stops the body stream early. Idempotent.
    fn abort(&mut self);

    fn is_finished(&self) -> bool;
}

/// Replaces the real connector factory's output for one request.
///
/// Installed on the policy context by a policy (e.g. on a cache hit); the
/// executor consults it before the factory.
pub trait ConnectorInterceptor: Send {
    fn create_connector(&self) -> Box<dyn Connector>;
}

/// Transport header carrying the consumer's API key. Never forwarded to
/// the backend.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Hop-by-hop framing headers plus the API key header: these describe the
/// consumer-to-gateway leg and must not leak upstream. Content-Length is
/// dropped because taps may change the body; the upstream leg re-frames.
static SUPPRESSED_HEADERS: Lazy<HashSet<HeaderName>> = Lazy::new(|| {
    let mut set: HashSet<HeaderName> = [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
        header::HOST,
        header::CONTENT_LENGTH,
    ]
    .into_iter()
    .collect();
    set.insert(HeaderName::from_static("keep-alive"));
    set.insert(HeaderName::from_static(API_KEY_HEADER));
    set
});

/// Copies `headers` minus the suppressed set, preserving multi-value
/// ordering.
pub(crate) fn filtered_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !SUPPRESSED_HEADERS.contains(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}
