//! Per-request metrics emission.

use crate::types::ApiCoords;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One record per completed (or failed) request.
#[derive(Debug, Clone)]
pub struct RequestMetric {
    pub request_id: Uuid,
    pub api: Option<ApiCoords>,
    pub method: http::Method,
    pub destination: String,
    /// Response status sent to the consumer, when one was produced.
    pub response_code: Option<u16>,
    /// The request was rejected by a policy.
    pub policy_failure: bool,
    /// The request died to an unexpected error.
    pub errored: bool,
    /// The caller abandoned the request before it completed.
    pub aborted: bool,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RequestMetric {
    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

/// Metrics destination. `record` must not block or fail; emission is
/// fire-and-forget and never affects request processing.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: RequestMetric);
}

/// Discards everything.
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn record(&self, _metric: RequestMetric) {}
}

/// Emits each metric as a structured log event.
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn record(&self, metric: RequestMetric) {
        let api = metric.api.as_ref().map(|c| c.to_string());
        tracing::info!(
            request_id = %metric.request_id,
            api = api.as_deref(),
            method = %metric.method,
            destination = %metric.destination,
            response_code = metric.response_code,
            policy_failure = metric.policy_failure,
            errored = metric.errored,
            aborted = metric.aborted,
            duration_ms = metric.duration_ms(),
            "request complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct CapturingMetrics(pub Mutex<Vec<RequestMetric>>);

    impl MetricsSink for CapturingMetrics {
        fn record(&self, metric: RequestMetric) {
            self.0.lock().unwrap().push(metric);
        }
    }

    #[test]
    fn duration_is_end_minus_start() {
        let start = Utc::now();
        let metric = RequestMetric {
            request_id: Uuid::new_v4(),
            api: Some(ApiCoords::new("org1", "svc1", "1.0")),
            method: http::Method::GET,
            destination: "/things".into(),
            response_code: Some(200),
            policy_failure: false,
            errored: false,
            aborted: false,
            start,
            end: start + chrono::Duration::milliseconds(42),
        };
        assert_eq!(metric.duration_ms(), 42);

        let sink = CapturingMetrics(Mutex::new(Vec::new()));
        sink.record(metric);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
