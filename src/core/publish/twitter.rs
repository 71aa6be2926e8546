use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::error::PublishError;
use crate::core::publish::{Connector, compose_post, map_http_failure, map_transport_error};
use crate::core::types::{DestinationSpec, PlatformKind, ProcessedItem};
use crate::core::vault::CredentialVault;

const TWEET_MAX_CHARS: usize = 280;

/// X/Twitter v2 `POST /2/tweets`. Credentials: `{"bearer_token": "..."}`.
pub struct TwitterConnector {
    vault: Arc<CredentialVault>,
    client: reqwest::Client,
    endpoint: String,
}

impl TwitterConnector {
    pub fn new(vault: Arc<CredentialVault>, client: reqwest::Client) -> Self {
        Self {
            vault,
            client,
            endpoint: "https://api.twitter.com/2/tweets".to_string(),
        }
    }

    async fn bearer_token(&self, credential_ref: &str) -> Result<String, PublishError> {
        let creds = self
            .vault
            .resolve_json(credential_ref)
            .await
            .map_err(|e| PublishError::Auth(e.to_string()))?
            .ok_or_else(|| {
                PublishError::Auth(format!("no credentials stored under '{}'", credential_ref))
            })?;
        creds["bearer_token"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| PublishError::Auth("credential is missing 'bearer_token'".into()))
    }
}

#[async_trait]
impl Connector for TwitterConnector {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Twitter
    }

    async fn publish(
        &self,
        item: &ProcessedItem,
        destination: &DestinationSpec,
    ) -> Result<String, PublishError> {
        let token = self.bearer_token(&destination.credential_ref).await?;
        let text = compose_post(item, TWEET_MAX_CHARS, true);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(map_http_failure(response).await);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PublishError::Unavailable(format!("tweet response: {}", e)))?;
        body["data"]["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| PublishError::Unavailable("tweet response had no id".into()))
    }
}
