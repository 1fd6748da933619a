//! HTTP backend connector built on the hyper client.
//!
//! Request bodies stream through an unbounded channel body so the caller
//! can keep writing chunks while the request is in flight; response bodies
//! are pulled frame by frame off the hyper `Incoming` stream.

use crate::config::ConnectorConfig;
use crate::connector::{
    filtered_headers, Connection, ConnectionResponse, Connector, ConnectorFactory,
};
use crate::error::ConnectorError;
use crate::types::{Api, ApiRequest, ApiResponse};
use async_trait::async_trait;
use bytes::Bytes;
use http_body::Frame;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector as TcpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Outbound request body fed chunk by chunk from `Connection::write`.
/// Dropping the sender ends the stream.
struct ChannelBody {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl http_body::Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut().rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Connector factory for HTTP and HTTPS backends.
///
/// One hyper client (and its connection pool) is shared across all
/// connectors the factory creates.
pub struct HttpConnectorFactory {
    client: Client<HttpsConnector<TcpConnector>, ChannelBody>,
    config: ConnectorConfig,
}

impl HttpConnectorFactory {
    pub fn new(config: ConnectorConfig) -> Result<Self, ConnectorError> {
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| ConnectorError::Io(e.to_string()))?
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);
        Ok(Self { client, config })
    }
}

impl ConnectorFactory for HttpConnectorFactory {
    fn create_connector(
        &self,
        _request: &ApiRequest,
        api: &Api,
    ) -> Result<Box<dyn Connector>, ConnectorError> {
        let url = Url::parse(&api.endpoint).map_err(|e| ConnectorError::InvalidEndpoint {
            endpoint: api.endpoint.clone(),
            details: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ConnectorError::InvalidEndpoint {
                    endpoint: api.endpoint.clone(),
                    details: format!("unsupported scheme '{scheme}'"),
                })
            }
        }

        Ok(Box::new(HttpBackendConnector {
            client: self.client.clone(),
            endpoint: api.endpoint.trim_end_matches('/').to_string(),
            config: self.config.clone(),
        }))
    }
}

struct HttpBackendConnector {
    client: Client<HttpsConnector<TcpConnector>, ChannelBody>,
    endpoint: String,
    config: ConnectorConfig,
}

#[async_trait]
impl Connector for HttpBackendConnector {
    async fn connect(&self, request: &ApiRequest) -> Result<Box<dyn Connection>, ConnectorError> {
        let mut target = self.endpoint.clone();
        if !request.destination.is_empty() && !request.destination.starts_with('/') {
            target.push('/');
        }
        target.push_str(&request.destination);
        let uri: http::Uri = target
            .parse()
            .map_err(|e: http::uri::InvalidUri| ConnectorError::InvalidEndpoint {
                endpoint: target.clone(),
                details: e.to_string(),
            })?;

        let (body_tx, body_rx) = mpsc::unbounded_channel();
        let mut outbound = http::Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .body(ChannelBody { rx: body_rx })
            .map_err(|e| ConnectorError::Connect(e.to_string()))?;
        *outbound.headers_mut() = filtered_headers(&request.headers);

        // The request is driven on its own task so the caller can keep
        // writing body chunks; the response head comes back over a oneshot.
        let cancel = CancellationToken::new();
        let (head_tx, head_rx) = oneshot::channel();
        let client = self.client.clone();
        let connect_timeout = self.config.connect_timeout;
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = task_cancel.cancelled() => return,
                result = tokio::time::timeout(connect_timeout, client.request(outbound)) => {
                    match result {
                        Err(_) => Err(ConnectorError::Timeout { phase: "connect" }),
                        Ok(Err(e)) => Err(ConnectorError::Connect(e.to_string())),
                        Ok(Ok(response)) => Ok(response),
                    }
                }
            };
            let _ = head_tx.send(outcome);
        });

        Ok(Box::new(HttpBackendConnection {
            body_tx: Some(body_tx),
            head_rx: Some(head_rx),
            cancel,
            read_timeout: self.config.read_timeout,
            connected: true,
        }))
    }
}

struct HttpBackendConnection {
    body_tx: Option<mpsc::UnboundedSender<Bytes>>,
    head_rx: Option<oneshot::Receiver<Result<http::Response<Incoming>, ConnectorError>>>,
    cancel: CancellationToken,
    read_timeout: Duration,
    connected: bool,
}

#[async_trait]
impl Connection for HttpBackendConnection {
    fn write(&mut self, chunk: Bytes) {
        if let Some(tx) = &self.body_tx {
            // A send failure means the request task already finished; the
            // outcome surfaces from end().
            if tx.send(chunk).is_err() {
                self.body_tx = None;
            }
        }
    }

    async fn end(&mut self) -> Result<Box<dyn ConnectionResponse>, ConnectorError> {
        // Closing the channel terminates the outbound body stream.
        self.body_tx = None;
        let head_rx = self.head_rx.take().ok_or(ConnectorError::AlreadyCompleted)?;
        self.connected = false;

        let response = head_rx.await.map_err(|_| ConnectorError::Aborted)??;
        let (parts, body) = response.into_parts();
        let mut head = ApiResponse::new(parts.status.as_u16());
        head.headers = parts.headers;

        Ok(Box::new(HttpBackendResponse {
            head,
            body,
            read_timeout: self.read_timeout,
            finished: false,
            aborted: false,
        }))
    }

    fn abort(&mut self) {
        self.cancel.cancel();
        self.body_tx = None;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

struct HttpBackendResponse {
    head: ApiResponse,
    body: Incoming,
    read_timeout: Duration,
    finished: bool,
    aborted: bool,
}

#[async_trait]
impl ConnectionResponse for HttpBackendResponse {
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
        loop {
            match tokio::time::timeout(self.read_timeout, self.body.frame()).await {
                Err(_) => {
                    self.aborted = true;
                    return Err(ConnectorError::Timeout { phase: "read" });
                }
                Ok(None) => {
                    self.finished = true;
                    return Ok(None);
                }
                Ok(Some(Ok(frame))) => {
                    // Trailer frames are dropped; only data reaches the chain.
                    if let Ok(data) = frame.into_data() {
                        return Ok(Some(data));
                    }
                }
                Ok(Some(Err(e))) => {
                    self.aborted = true;
                    return Err(ConnectorError::Io(e.to_string()));
                }
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
