//! Cached-response replay connector.
//!
//! A caching policy that finds a hit installs [`CacheConnectorInterceptor`]
//! on the policy context; the executor then connects to the replay
//! connector instead of the real backend. The replay honors the full
//! connection contract so downstream policies, taps and handlers behave
//! exactly as they would for a live call.

use crate::connector::{Connection, ConnectionResponse, Connector, ConnectorInterceptor};
use crate::error::ConnectorError;
use crate::types::{ApiRequest, ApiResponse};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// A previously captured backend response: head plus body chunks in
/// arrival order.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub head: ApiResponse,
    pub chunks: Vec<Bytes>,
}

pub struct CacheConnectorInterceptor {
    entry: Arc<CachedResponse>,
}

impl CacheConnectorInterceptor {
    pub fn new(entry: Arc<CachedResponse>) -> Self {
        Self { entry }
    }
}

impl ConnectorInterceptor for CacheConnectorInterceptor {
    fn create_connector(&self) -> Box<dyn Connector> {
        Box::new(CacheConnector {
            entry: Arc::clone(&self.entry),
        })
    }
}

struct CacheConnector {
    entry: Arc<CachedResponse>,
}

#[async_trait]
impl Connector for CacheConnector {
    async fn connect(&self, _request: &ApiRequest) -> Result<Box<dyn Connection>, ConnectorError> {
        Ok(Box::new(CacheConnection {
            entry: Arc::clone(&self.entry),
            connected: true,
            ended: false,
            aborted: false,
        }))
    }
}

struct CacheConnection {
    entry: Arc<CachedResponse>,
    connected: bool,
    ended: bool,
    aborted: bool,
}

#[async_trait]
impl Connection for CacheConnection {
    fn write(&mut self, _chunk: Bytes) {
        // The request body played no part in the cached response; discard.
    }

    async fn end(&mut self) -> Result<Box<dyn ConnectionResponse>, ConnectorError> {
        if self.aborted {
            return Err(ConnectorError::Aborted);
        }
        if self.ended {
            return Err(ConnectorError::AlreadyCompleted);
        }
        self.ended = true;
        self.connected = false;
        Ok(Box::new(CacheResponse {
            head: self.entry.head.clone(),
            entry: Arc::clone(&self.entry),
            cursor: 0,
            finished: false,
            aborted: false,
        }))
    }

    fn abort(&mut self) {
        self.connected = false;
        self.aborted = true;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

struct CacheResponse {
    head: ApiResponse,
    entry: Arc<CachedResponse>,
    cursor: usize,
    finished: bool,
    aborted: bool,
}

#[async_trait]
impl ConnectionResponse for CacheResponse {
    fn head(&self) -> &ApiResponse {
        &self.head
    }

    fn head_mut(&mut self) -> &mut ApiResponse {
        &mut self.head
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ConnectorError> {
        if self.finished || self.aborted {
            return Ok(None);
        }
        match self.entry.chunks.get(self.cursor) {
            Some(chunk) => {
                self.cursor += 1;
                Ok(Some(chunk.clone()))
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn abort(&mut self) {
        self.aborted = true;
    }

    fn is_finished(&self) -> bool {
        self.finished || self.aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Arc<CachedResponse> {
        let mut head = ApiResponse::new(200);
        head.headers
            .insert("x-cache", http::HeaderValue::from_static("hit"));
        Arc::new(CachedResponse {
            head,
            chunks: vec![Bytes::from_static(b"alpha"), Bytes::from_static(b"beta")],
        })
    }

    #[tokio::test]
    async fn replays_head_and_chunks_in_order() {
        let interceptor = CacheConnectorInterceptor::new(entry());
        let connector = interceptor.create_connector();
        let request = ApiRequest::new(http::Method::GET, "/things");
        let mut connection = connector.connect(&request).await.unwrap();

        // Request body chunks are accepted and discarded.
        connection.write(Bytes::from_static(b"ignored"));
        let mut response = connection.end().await.unwrap();

        assert_eq!(response.head().code, 200);
        assert_eq!(response.head().headers.get("x-cache").unwrap(), "hit");
        assert_eq!(
            response.read_chunk().await.unwrap(),
            Some(Bytes::from_static(b"alpha"))
        );
        assert_eq!(
            response.read_chunk().await.unwrap(),
            Some(Bytes::from_static(b"beta"))
        );
        assert_eq!(response.read_chunk().await.unwrap(), None);
        assert!(response.is_finished());
        // End of stream is sticky.
        assert_eq!(response.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn end_completes_once() {
        let interceptor = CacheConnectorInterceptor::new(entry());
        let connector = interceptor.create_connector();
        let request = ApiRequest::new(http::Method::GET, "/things");
        let mut connection = connector.connect(&request).await.unwrap();

        connection.end().await.unwrap();
        assert!(matches!(
            connection.end().await,
            Err(ConnectorError::AlreadyCompleted)
        ));
    }

    #[tokio::test]
    async fn end_after_abort_reports_the_abort() {
        let interceptor = CacheConnectorInterceptor::new(entry());
        let connector = interceptor.create_connector();
        let request = ApiRequest::new(http::Method::GET, "/things");
        let mut connection = connector.connect(&request).await.unwrap();

        connection.abort();
        connection.abort();
        assert!(!connection.is_connected());
        assert!(matches!(
            connection.end().await,
            Err(ConnectorError::Aborted)
        ));
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_stops_the_stream() {
        let interceptor = CacheConnectorInterceptor::new(entry());
        let connector = interceptor.create_connector();
        let request = ApiRequest::new(http::Method::GET, "/things");
        let mut connection = connector.connect(&request).await.unwrap();
        let mut response = connection.end().await.unwrap();

        response.abort();
        response.abort();
        assert_eq!(response.read_chunk().await.unwrap(), None);
        assert!(response.is_finished());
    }
}
