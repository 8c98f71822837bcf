//! Runtime descriptor and its HTTP fetcher.

use std::collections::{BTreeMap, HashMap};

use agentdeck_core::RuntimeTransport;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RuntimeError;

/// What a runtime reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentDescription>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Source of runtime descriptors.
#[async_trait]
pub trait RuntimeInfoFetcher: Send + Sync {
    async fn fetch(
        &self,
        runtime_url: &str,
        transport: RuntimeTransport,
        headers: &HashMap<String, String>,
    ) -> Result<RuntimeInfo, RuntimeError>;
}

/// Fetches the descriptor over HTTP.
///
/// `rest` issues `GET {url}/info`; `single` posts `{"method":"info"}` to
/// the runtime URL itself.
pub struct HttpRuntimeInfoFetcher {
    client: reqwest::Client,
}

impl HttpRuntimeInfoFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RuntimeInfoFetcher for HttpRuntimeInfoFetcher {
    async fn fetch(
        &self,
        runtime_url: &str,
        transport: RuntimeTransport,
        headers: &HashMap<String, String>,
    ) -> Result<RuntimeInfo, RuntimeError> {
        let mut request = match transport {
            RuntimeTransport::Rest => self.client.get(format!("{runtime_url}/info")),
            RuntimeTransport::Single => {
                let mut request = self
                    .client
                    .post(runtime_url)
                    .body(serde_json::json!({ "method": "info" }).to_string());
                let has_content_type = headers
                    .keys()
                    .any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
                if !has_content_type {
                    request = request.header(CONTENT_TYPE, "application/json");
                }
                request
            }
        };
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(runtime_url, %transport, "Fetching runtime info");
        let response = request
            .send()
            .await
            .map_err(|e| RuntimeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuntimeError::InfoStatus(status.as_u16()));
        }

        response
            .json::<RuntimeInfo>()
            .await
            .map_err(|e| RuntimeError::Decode(e.to_string()))
    }
}
