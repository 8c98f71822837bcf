//! # agentdeck runtime client
//!
//! Talks to a remote agent runtime over HTTP: fetches the runtime
//! descriptor listing its agents, and proxies runs of those agents whose
//! responses stream back as server-sent wire events.

pub mod error;
pub mod info;
pub mod proxied;
pub mod sse;

pub use error::RuntimeError;
pub use info::{AgentDescription, HttpRuntimeInfoFetcher, RuntimeInfo, RuntimeInfoFetcher};
pub use proxied::{ProxiedAgentFactory, ProxiedRuntimeAgent, RemoteAgentFactory};
pub use sse::SseDecoder;

use std::time::Duration;

/// Build the HTTP client shared by the fetcher and proxied agents.
///
/// `connect_timeout` bounds connection setup only; agent runs stream for as
/// long as the runtime keeps the response open.
pub fn http_client(connect_timeout: Duration) -> Result<reqwest::Client, RuntimeError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| RuntimeError::Client(e.to_string()))
}
