//! Per-request execution: request chain, backend connection, response
//! chain, and metrics emission on every exit path.

use crate::components::ComponentRegistry;
use crate::connector::{Connection, ConnectionResponse, ConnectorFactory};
use crate::error::EngineError;
use crate::metrics::{MetricsSink, RequestMetric};
use crate::policy::{
    ChainOutcome, PolicyContext, PolicyWithConfig, RequestChain, ResponseChain,
};
use crate::types::{Api, ApiRequest, ApiResponse, PolicyFailure};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Everything needed to emit the request's single metric record, carried
/// along as ownership moves through the execution stages.
struct MetricScope {
    request_id: Uuid,
    api: crate::types::ApiCoords,
    method: http::Method,
    destination: String,
    start: DateTime<Utc>,
    sink: Arc<dyn MetricsSink>,
}

/// How a request finished, for the metric record.
enum Outcome {
    Success(u16),
    Rejected(u16),
    Errored,
    Aborted,
}

impl MetricScope {
    fn record(&self, outcome: Outcome) {
        let (response_code, policy_failure, errored, aborted) = match outcome {
            Outcome::Success(code) => (Some(code), false, false, false),
            Outcome::Rejected(code) => (Some(code), true, false, false),
            Outcome::Errored => (None, false, true, false),
            Outcome::Aborted => (None, false, false, true),
        };
        self.sink.record(RequestMetric {
            request_id: self.request_id,
            api: Some(self.api.clone()),
            method: self.method.clone(),
            destination: self.destination.clone(),
            response_code,
            policy_failure,
            errored,
            aborted,
            start: self.start,
            end: Utc::now(),
        });
    }
}

/// One request's resolved execution state, produced by
/// [`crate::engine::Engine::executor`]. Consumed by [`execute`].
///
/// [`execute`]: RequestExecutor::execute
pub struct RequestExecutor {
    request: ApiRequest,
    api: Api,
    policies: Vec<PolicyWithConfig>,
    context: PolicyContext,
    connector_factory: Arc<dyn ConnectorFactory>,
    metrics: Arc<dyn MetricsSink>,
    start: DateTime<Utc>,
}

/// Outcome of the request chain: stream toward the backend, or an
/// immediate policy rejection.
pub enum Execution {
    Proceed(RequestStream),
    Rejected(PolicyFailure),
}

impl RequestExecutor {
    pub(crate) fn new(
        request: ApiRequest,
        api: Api,
        policies: Vec<PolicyWithConfig>,
        components: Arc<ComponentRegistry>,
        connector_factory: Arc<dyn ConnectorFactory>,
        metrics: Arc<dyn MetricsSink>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            request,
            api,
            policies,
            context: PolicyContext::new(components),
            connector_factory,
            metrics,
            start,
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    /// Runs the request chain and, unless a policy rejected, connects to
    /// the backend (or to whatever connector a policy substituted via the
    /// context interceptor).
    pub async fn execute(mut self) -> Result<Execution, EngineError> {
        let scope = MetricScope {
            request_id: self.request.request_id,
            api: self.api.coords(),
            method: self.request.method.clone(),
            destination: self.request.destination.clone(),
            start: self.start,
            sink: Arc::clone(&self.metrics),
        };

        let mut chain = RequestChain::new(self.policies.clone());
        match chain.apply(&mut self.request, &mut self.context).await {
            Err(err) => {
                scope.record(Outcome::Errored);
                Err(err.into())
            }
            Ok(ChainOutcome::Rejected(failure)) => {
                scope.record(Outcome::Rejected(failure.response_code));
                Ok(Execution::Rejected(failure))
            }
            Ok(ChainOutcome::Continue) => {
                let connector = match self.context.take_connector_interceptor() {
                    Some(interceptor) => interceptor.create_connector(),
                    None => {
                        match self.connector_factory.create_connector(&self.request, &self.api) {
                            Ok(connector) => connector,
                            Err(err) => {
                                chain.abort();
                                scope.record(Outcome::Errored);
                                return Err(err.into());
                            }
                        }
                    }
                };
                let connection = match connector.connect(&self.request).await {
                    Ok(connection) => connection,
                    Err(err) => {
                        chain.abort();
                        scope.record(Outcome::Errored);
                        return Err(err.into());
                    }
                };
                Ok(Execution::Proceed(RequestStream {
                    chain,
                    connection,
                    policies: self.policies,
                    context: self.context,
                    scope,
                }))
            }
        }
    }
}

/// Streaming stage: the caller writes request body chunks, then `end`s the
/// stream to receive the backend's response through the response chain.
pub struct RequestStream {
    chain: RequestChain,
    connection: Box<dyn Connection>,
    policies: Vec<PolicyWithConfig>,
    context: PolicyContext,
    scope: MetricScope,
}

impl RequestStream {
    /// Forwards one request body chunk through the request chain's taps to
    /// the backend connection.
    pub fn write(&mut self, chunk: Bytes) {
        let connection = &mut self.connection;
        self.chain.write_through(chunk, &mut |c| connection.write(c));
    }

    /// Ends the request body, waits for the backend's response head, and
    /// runs the response chain over it.
    pub async fn end(mut self) -> Result<EngineResult, EngineError> {
        {
            let connection = &mut self.connection;
            self.chain.end_through(&mut |c| connection.write(c));
        }

        let mut response = match self.connection.end().await {
            Ok(response) => response,
            Err(err) => {
                self.scope.record(Outcome::Errored);
                return Err(err.into());
            }
        };

        let mut chain = ResponseChain::new(self.policies);
        match chain.apply(response.head_mut(), &mut self.context).await {
            Err(err) => {
                response.abort();
                self.connection.abort();
                self.scope.record(Outcome::Errored);
                Err(err.into())
            }
            Ok(ChainOutcome::Rejected(failure)) => {
                response.abort();
                self.connection.abort();
                self.scope.record(Outcome::Rejected(failure.response_code));
                Ok(EngineResult::Failure(failure))
            }
            Ok(ChainOutcome::Continue) => {
                let head = response.head().clone();
                self.scope.record(Outcome::Success(head.code));
                Ok(EngineResult::Success {
                    response: head,
                    body: ResponseBody {
                        chain,
                        source: response,
                    },
                })
            }
        }
    }

    /// Abandons the request mid-stream; the backend call is cancelled.
    pub fn abort(mut self) {
        self.chain.abort();
        self.connection.abort();
        self.scope.record(Outcome::Aborted);
    }
}

/// Final outcome of a request that reached the backend (or its substitute).
pub enum EngineResult {
    /// Response head already filtered by the response chain; the body is
    /// still pending in `body`.
    Success {
        response: ApiResponse,
        body: ResponseBody,
    },
    /// A response policy rejected; the backend body was discarded.
    Failure(PolicyFailure),
}

/// The response body stream, pulled from the backend and pushed through
/// the response chain's taps to the caller's handlers.
pub struct ResponseBody {
    chain: ResponseChain,
    source: Box<dyn ConnectionResponse>,
}

impl ResponseBody {
    /// Registers the sink receiving each filtered body chunk.
    pub fn body_handler(&mut self, handler: impl FnMut(Bytes) + Send + 'static) {
        self.chain.body_handler(handler);
    }

    /// Registers the end-of-body callback; fires exactly once, after the
    /// last chunk was delivered, never after an error or abort.
    pub fn end_handler(&mut self, handler: impl FnOnce() + Send + 'static) {
        self.chain.end_handler(handler);
    }

    /// Pumps the backend body to completion through the registered
    /// handlers.
    pub async fn transmit(mut self) -> Result<(), EngineError> {
        loop {
            match self.source.read_chunk().await {
                Ok(Some(chunk)) => self.chain.write(chunk),
                Ok(None) => {
                    self.chain.end();
                    return Ok(());
                }
                Err(err) => {
                    self.chain.abort();
                    return Err(err.into());
                }
            }
        }
    }

    /// Stops the body early; no further handler fires.
    pub fn abort(mut self) {
        self.chain.abort();
        self.source.abort();
    }
}
