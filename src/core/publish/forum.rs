use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::error::PublishError;
use crate::core::publish::{Connector, compose_post, map_http_failure, map_transport_error};
use crate::core::types::{DestinationSpec, PlatformKind, ProcessedItem};
use crate::core::vault::CredentialVault;

const FORUM_MAX_CHARS: usize = 30_000;

/// Discourse-style forum `POST /posts.json`. Credentials:
/// `{"base_url": "...", "api_key": "...", "api_username": "...",
///   "category": 5}` (category optional).
pub struct ForumConnector {
    vault: Arc<CredentialVault>,
    client: reqwest::Client,
}

impl ForumConnector {
    pub fn new(vault: Arc<CredentialVault>, client: reqwest::Client) -> Self {
        Self { vault, client }
    }
}

#[async_trait]
impl Connector for ForumConnector {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Forum
    }

    async fn publish(
        &self,
        item: &ProcessedItem,
        destination: &DestinationSpec,
    ) -> Result<String, PublishError> {
        let creds = self
            .vault
            .resolve_json(&destination.credential_ref)
            .await
            .map_err(|e| PublishError::Auth(e.to_string()))?
            .ok_or_else(|| {
                PublishError::Auth(format!(
                    "no credentials stored under '{}'",
                    destination.credential_ref
                ))
            })?;
        let base_url = creds["base_url"]
            .as_str()
            .ok_or_else(|| PublishError::Auth("credential is missing 'base_url'".into()))?;
        let api_key = creds["api_key"]
            .as_str()
            .ok_or_else(|| PublishError::Auth("credential is missing 'api_key'".into()))?;
        let api_username = creds["api_username"]
            .as_str()
            .ok_or_else(|| PublishError::Auth("credential is missing 'api_username'".into()))?;

        let mut payload = json!({
            "title": item.source_item.title,
            "raw": compose_post(item, FORUM_MAX_CHARS, true),
        });
        if let Some(category) = creds["category"].as_i64() {
            payload["category"] = json!(category);
        }

        let response = self
            .client
            .post(format!("{}/posts.json", base_url.trim_end_matches('/')))
            .header("Api-Key", api_key)
            .header("Api-Username", api_username)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(map_http_failure(response).await);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PublishError::Unavailable(format!("forum response: {}", e)))?;
        body["id"]
            .as_i64()
            .map(|id| id.to_string())
            .ok_or_else(|| PublishError::Unavailable("forum response had no post id".into()))
    }
}
