use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::PublishError;
use crate::core::publish::{Connector, compose_post, map_http_failure, map_transport_error};
use crate::core::types::{DestinationSpec, PlatformKind, ProcessedItem};
use crate::core::vault::CredentialVault;

const CAPTION_MAX_CHARS: usize = 2_200;

/// Instagram graph API: create a media container, then publish it.
/// Credentials: `{"user_id": "...", "access_token": "..."}`.
///
/// Instagram is image-first: an item whose image reference is not a
/// fetchable URL cannot be published there.
pub struct InstagramConnector {
    vault: Arc<CredentialVault>,
    client: reqwest::Client,
    graph_base: String,
}

impl InstagramConnector {
    pub fn new(vault: Arc<CredentialVault>, client: reqwest::Client) -> Self {
        Self {
            vault,
            client,
            graph_base: "https://graph.facebook.com/v19.0".to_string(),
        }
    }
}

#[async_trait]
impl Connector for InstagramConnector {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Instagram
    }

    async fn publish(
        &self,
        item: &ProcessedItem,
        destination: &DestinationSpec,
    ) -> Result<String, PublishError> {
        let image_url = match item.image_ref.as_deref() {
            Some(url) if url.starts_with("http") => url,
            _ => {
                return Err(PublishError::Unavailable(
                    "item has no fetchable image for instagram".into(),
                ));
            }
        };

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
        let user_id = creds["user_id"]
            .as_str()
            .ok_or_else(|| PublishError::Auth("credential is missing 'user_id'".into()))?;
        let token = creds["access_token"]
            .as_str()
            .ok_or_else(|| PublishError::Auth("credential is missing 'access_token'".into()))?;

        // Step 1: media container.
        let caption = compose_post(item, CAPTION_MAX_CHARS, true);
        let response = self
            .client
            .post(format!("{}/{}/media", self.graph_base, user_id))
            .query(&[
                ("image_url", image_url),
                ("caption", caption.as_str()),
                ("access_token", token),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(map_http_failure(response).await);
        }
        let container: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PublishError::Unavailable(format!("media response: {}", e)))?;
        let creation_id = container["id"]
            .as_str()
            .ok_or_else(|| PublishError::Unavailable("media response had no id".into()))?;

        // Step 2: publish the container.
        let response = self
            .client
            .post(format!("{}/{}/media_publish", self.graph_base, user_id))
            .query(&[("creation_id", creation_id), ("access_token", token)])
            .send()
            .await
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(map_http_failure(response).await);
        }
        let published: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PublishError::Unavailable(format!("publish response: {}", e)))?;
        published["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| PublishError::Unavailable("publish response had no id".into()))
    }
}
