//! HTTP fallback used when no embedding bridge is present

use serde_json::Value;
use tracing::debug;

use crate::config;
use crate::error::BridgeError;
use crate::gateway::CommandEnvelope;

#[derive(Clone)]
pub struct NetworkClient {
    client: reqwest::Client,
    endpoint: String,
}

impl NetworkClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One POST per call; the response body is the command result.
    pub async fn post(&self, envelope: &CommandEnvelope) -> Result<Value, BridgeError> {
        debug!("POST {} {}", self.endpoint, envelope.command);

        let response = self
            .client
            .post(&self.endpoint)
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::HttpStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }
}

impl Default for NetworkClient {
    fn default() -> Self {
        Self::new(config::default_api_endpoint())
    }
}
