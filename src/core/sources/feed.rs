use async_trait::async_trait;
use chrono::Utc;

use crate::core::error::SourceError;
use crate::core::sources::rss::parse_feed;
use crate::core::sources::{NewsSource, strip_markup};
use crate::core::types::{RawItem, SourceSpec};

/// A plain RSS/Atom feed. The source's `identifier` is the feed URL; the
/// topic is used as a keep-filter over titles and bodies so one feed can
/// serve several bots with different topics.
pub struct FeedSource {
    client: reqwest::Client,
}

impl FeedSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NewsSource for FeedSource {
    async fn fetch(&self, spec: &SourceSpec, topic: &str) -> Result<Vec<RawItem>, SourceError> {
        let response = self
            .client
            .get(&spec.identifier)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("feed fetch: {}", e)))?;
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "feed returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(format!("feed body: {}", e)))?;

        let topic_lower = topic.to_lowercase();
        let now = Utc::now().timestamp();
        let source_id = spec.source_id();

        Ok(parse_feed(&body)?
            .into_iter()
            .filter(|entry| {
                topic_lower.is_empty()
                    || entry.title.to_lowercase().contains(&topic_lower)
                    || entry.description.to_lowercase().contains(&topic_lower)
            })
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
