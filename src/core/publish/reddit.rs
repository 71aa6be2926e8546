use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::PublishError;
use crate::core::publish::{Connector, compose_post, map_http_failure, map_transport_error};
use crate::core::types::{DestinationSpec, PlatformKind, ProcessedItem};
use crate::core::vault::CredentialVault;

const SELFTEXT_MAX_CHARS: usize = 10_000;

/// Reddit `POST /api/submit` as a self post. Credentials:
/// `{"access_token": "...", "subreddit": "..."}`.
pub struct RedditConnector {
    vault: Arc<CredentialVault>,
    client: reqwest::Client,
    endpoint: String,
}

impl RedditConnector {
    pub fn new(vault: Arc<CredentialVault>, client: reqwest::Client) -> Self {
        Self {
            vault,
            client,
            endpoint: "https://oauth.reddit.com/api/submit".to_string(),
        }
    }
}

#[async_trait]
impl Connector for RedditConnector {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Reddit
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
        let token = creds["access_token"]
            .as_str()
            .ok_or_else(|| PublishError::Auth("credential is missing 'access_token'".into()))?;
        let subreddit = creds["subreddit"]
            .as_str()
            .ok_or_else(|| PublishError::Auth("credential is missing 'subreddit'".into()))?;

        let body = compose_post(item, SELFTEXT_MAX_CHARS, true);
        let form = [
            ("api_type", "json"),
            ("kind", "self"),
            ("sr", subreddit),
            ("title", item.source_item.title.as_str()),
            ("text", body.as_str()),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .form(&form)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(map_http_failure(response).await);
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PublishError::Unavailable(format!("submit response: {}", e)))?;

        // Submission errors come back 200 with an errors array.
        if let Some(errors) = payload["json"]["errors"].as_array()
            && !errors.is_empty()
        {
            let text = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            if text.contains("RATELIMIT") {
                return Err(PublishError::RateLimited { retry_after: None });
            }
            return Err(PublishError::Unavailable(format!("submit rejected: {}", text)));
        }

        payload["json"]["data"]["name"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| PublishError::Unavailable("submit response had no name".into()))
    }
}
