mod forum;
mod instagram;
mod reddit;
mod twitter;

pub use forum::ForumConnector;
pub use instagram::InstagramConnector;
pub use reddit::RedditConnector;
pub use twitter::TwitterConnector;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::PublishError;
use crate::core::types::{DestinationSpec, PlatformKind, ProcessedItem};
use crate::core::vault::CredentialVault;

/// One platform binding. Implementations resolve their own credentials
/// from the vault via the destination's credential reference and return
/// the platform's post identifier on success.
#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> PlatformKind;

    async fn publish(
        &self,
        item: &ProcessedItem,
        destination: &DestinationSpec,
    ) -> Result<String, PublishError>;
}

/// Connectors keyed by platform kind. New platforms are added by
/// registering an implementation; the pipeline never matches on kinds.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<PlatformKind, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in connectors over one shared HTTP client.
    pub fn with_defaults(vault: Arc<CredentialVault>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wirebot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let mut registry = Self::new();
        registry.register(Arc::new(TwitterConnector::new(vault.clone(), client.clone())));
        registry.register(Arc::new(RedditConnector::new(vault.clone(), client.clone())));
        registry.register(Arc::new(ForumConnector::new(vault.clone(), client.clone())));
        registry.register(Arc::new(InstagramConnector::new(vault, client)));
        Ok(registry)
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.platform(), connector);
    }

    pub fn get(&self, platform: PlatformKind) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&platform).cloned()
    }
}

/// Compose a post body from the item's artifacts: title, summary, first
/// question, then the article link, truncated to the platform's budget
/// on a character boundary.
pub fn compose_post(item: &ProcessedItem, max_chars: usize, include_url: bool) -> String {
    let mut parts = vec![item.source_item.title.clone()];
    if !item.summary.is_empty() && item.summary != item.source_item.title {
        parts.push(item.summary.clone());
    }
    if let Some(question) = item.questions.first() {
        parts.push(question.clone());
    }

    let url = if include_url && !item.source_item.url.is_empty() {
        Some(item.source_item.url.as_str())
    } else {
        None
    };

    // The link survives truncation; prose gives way first.
    let reserved = url.map(|u| u.chars().count() + 2).unwrap_or(0);
    let budget = max_chars.saturating_sub(reserved);

    let mut body = String::new();
    for part in parts {
        let candidate_len = if body.is_empty() {
            part.chars().count()
        } else {
            body.chars().count() + 2 + part.chars().count()
        };
        if candidate_len <= budget {
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(&part);
        } else if body.is_empty() {
            body = truncate_chars(&part, budget);
            break;
        } else {
            break;
        }
    }

    if let Some(url) = url {
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(url);
    }
    body
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

/// Shared response mapping: auth failures are terminal, 429 carries its
/// Retry-After, everything else unexpected is "unavailable".
pub(crate) async fn map_http_failure(response: reqwest::Response) -> PublishError {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return PublishError::Auth(format!("{}: {}", status, truncate_chars(&body, 200)));
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return PublishError::RateLimited { retry_after };
    }
    PublishError::Unavailable(format!("unexpected status {}", status))
}

pub(crate) fn map_transport_error(e: reqwest::Error) -> PublishError {
    PublishError::Unavailable(e.to_string())
}
