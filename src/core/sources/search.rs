use async_trait::async_trait;
use chrono::Utc;

use crate::core::error::SourceError;
use crate::core::sources::rss::parse_feed;
use crate::core::sources::{NewsSource, strip_markup};
use crate::core::types::{RawItem, SourceSpec};

/// Keyword search over the Google News index, consumed through its RSS
/// endpoint. The source's `identifier` is appended to the topic as extra
/// query terms (`site:`, quoted phrases, and so on).
pub struct SearchSource {
    client: reqwest::Client,
    endpoint: String,
}

impl SearchSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: "https://news.google.com/rss/search".to_string(),
        }
    }
}

#[async_trait]
impl NewsSource for SearchSource {
    async fn fetch(&self, spec: &SourceSpec, topic: &str) -> Result<Vec<RawItem>, SourceError> {
        let query = if spec.identifier.trim().is_empty() {
            topic.to_string()
        } else {
            format!("{} {}", topic, spec.identifier.trim())
        };
        let url = format!(
            "{}?q={}&hl=en-US&gl=US&ceid=US:en",
            self.endpoint,
            urlencoding::encode(&query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("news search: {}", e)))?;
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "news search returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(format!("news search body: {}", e)))?;

        let now = Utc::now().timestamp();
        let source_id = spec.source_id();
        Ok(parse_feed(&body)?
            .into_iter()
            .map(|entry| RawItem {
                source_id: source_id.clone(),
                url: entry.link,
                title: strip_markup(&entry.title),
                fetched_at: now,
                raw_text: strip_markup(&entry.description),
                image_url: entry.image_url,
            })
            .collect())
    }
}
