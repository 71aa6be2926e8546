use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

use crate::core::error::SourceError;
use crate::core::sources::{NewsSource, strip_markup};
use crate::core::types::{RawItem, SourceSpec};

/// Scrapes a website's headline page. The source's `identifier` is the
/// page URL; anchors whose text mentions the topic become candidates, and
/// each candidate's article page is fetched for body text and a lead
/// image.
pub struct SiteSource {
    client: reqwest::Client,
    /// Upper bound on article pages fetched per call, over and above the
    /// source's own max_items truncation.
    article_budget: usize,
}

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap()
    })
}

fn og_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<meta\s[^>]*property\s*=\s*["']og:image["'][^>]*content\s*=\s*["']([^"']+)["']"#)
            .unwrap()
    })
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p[^>]*>(.*?)</p>").unwrap())
}

impl SiteSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            article_budget: 8,
        }
    }

    async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("site fetch: {}", e)))?;
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "site returned {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(format!("site body: {}", e)))
    }

    /// Pull headline candidates out of a listing page.
    fn candidate_links(html: &str, base: &url::Url, topic: &str) -> Vec<(String, String)> {
        let topic_lower = topic.to_lowercase();
        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();
        for cap in anchor_re().captures_iter(html) {
            let text = strip_markup(&cap[2]);
            // Headline-length anchor text mentioning the topic.
            if text.len() < 20 || !text.to_lowercase().contains(&topic_lower) {
                continue;
            }
            let Ok(href) = base.join(&cap[1]) else {
                continue;
            };
            if !matches!(href.scheme(), "http" | "https") {
                continue;
            }
            let href = href.to_string();
            if seen.insert(href.clone()) {
                links.push((href, text));
            }
        }
        links
    }

    /// Body text and lead image from one article page.
    fn extract_article(html: &str) -> (String, Option<String>) {
        let mut body = String::new();
        for cap in paragraph_re().captures_iter(html) {
            let text = strip_markup(&cap[1]);
            if text.len() > 40 {
                if !body.is_empty() {
                    body.push(' ');
                }
                body.push_str(&text);
            }
            if body.len() > 2_000 {
                break;
            }
        }
        let image = og_image_re()
            .captures(html)
            .map(|cap| cap[1].to_string());
        (body, image)
    }
}

#[async_trait]
impl NewsSource for SiteSource {
    async fn fetch(&self, spec: &SourceSpec, topic: &str) -> Result<Vec<RawItem>, SourceError> {
        let base = url::Url::parse(&spec.identifier)
            .map_err(|e| SourceError::Unavailable(format!("bad site url: {}", e)))?;
        let listing = self.get_text(&spec.identifier).await?;

        let now = Utc::now().timestamp();
        let source_id = spec.source_id();
        let budget = self.article_budget.min(spec.max_items as usize);

        let mut items = Vec::new();
        for (href, title) in Self::candidate_links(&listing, &base, topic)
            .into_iter()
            .take(budget)
        {
            // Article fetch failures only cost us that one candidate.
            let (raw_text, image_url) = match self.get_text(&href).await {
                Ok(html) => Self::extract_article(&html),
                Err(e) => {
                    tracing::debug!(url = %href, error = %e, "article fetch failed");
                    (String::new(), None)
                }
            };
            items.push(RawItem {
                source_id: source_id.clone(),
                url: href,
                title,
                fetched_at: now,
                raw_text,
                image_url,
            });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body>
      <a href="/news/rust-ships-new-release">Rust ships a major new release today</a>
      <a href="/about">About</a>
      <a href="https://other.example.com/rust-in-embedded-systems">Rust in embedded systems takes off</a>
      <a href="/news/go-release">Go ships a release, unrelated topic here</a>
    </body></html>"#;

    #[test]
    fn candidate_links_filter_by_topic_and_length() {
        let base = url::Url::parse("https://example.com/news").unwrap();
        let links = SiteSource::candidate_links(LISTING, &base, "rust");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].0, "https://example.com/news/rust-ships-new-release");
        assert_eq!(links[1].0, "https://other.example.com/rust-in-embedded-systems");
    }

    #[test]
    fn extract_article_pulls_paragraphs_and_og_image() {
        let html = r#"<html><head>
          <meta property="og:image" content="https://example.com/lead.jpg">
          </head><body>
          <p>Short.</p>
          <p>This is a long enough paragraph to be considered article body text for extraction.</p>
        </body></html>"#;
        let (body, image) = SiteSource::extract_article(html);
        assert!(body.contains("long enough paragraph"));
        assert!(!body.contains("Short."));
        assert_eq!(image.as_deref(), Some("https://example.com/lead.jpg"));
    }
}
