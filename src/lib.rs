//! apigate - embeddable API gateway runtime engine.
//!
//! The engine resolves each inbound request to a published API (directly or
//! through an API key contract), runs an ordered policy chain over the
//! request, proxies it to the backend over a pluggable connector, and runs
//! the same chain in reverse over the response. Policies can reject,
//! transform bodies via taps, or substitute the backend entirely (e.g. to
//! replay a cached response).
//!
//! # Flow
//!
//! 1. [`engine::Engine::executor`] resolves the request and its policies.
//! 2. [`executor::RequestExecutor::execute`] runs the request chain and
//!    connects to the backend.
//! 3. The caller streams the request body, then `end`s the stream.
//! 4. The response head passes through the response chain (reverse order);
//!    the body is pumped through response taps to the caller's handlers.

pub mod components;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod policies;
pub mod policy;
pub mod registry;
pub mod types;
