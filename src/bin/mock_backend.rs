//! Mock echo backend for exercising the gateway end to end.
//!
//! Echoes the request body back, reflects selected request metadata in
//! response headers, and can delay its answer to exercise timeouts.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::any;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(name = "mock_backend", about = "Echo backend for gateway testing")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "MOCK_BACKEND_PORT", default_value_t = 9280)]
    port: u16,

    /// Artificial delay before answering, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
}

#[derive(Clone)]
struct Config {
    delay: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = Config {
        delay: Duration::from_millis(args.delay_ms),
    };
    let app = Router::new().fallback(any(echo)).with_state(config);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!("mock backend listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn echo(
    State(config): State<Config>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, HeaderMap, Bytes) {
    if !config.delay.is_zero() {
        sleep(config.delay).await;
    }
    tracing::info!(%method, %uri, bytes = body.len(), "echoing request");

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = method.as_str().parse() {
        response_headers.insert("x-echo-method", value);
    }
    if let Ok(value) = uri.path().parse() {
        response_headers.insert("x-echo-path", value);
    }
    // The gateway must never forward the consumer's key; make leaks visible.
    if headers.contains_key("x-api-key") {
        if let Ok(value) = "leaked".parse() {
            response_headers.insert("x-echo-api-key", value);
        }
    }

    (StatusCode::OK, response_headers, body)
}
