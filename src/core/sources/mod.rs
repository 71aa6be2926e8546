mod feed;
pub mod rss;
mod search;
mod site;

pub use feed::FeedSource;
pub use search::SearchSource;
pub use site::SiteSource;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::core::error::{GatherError, SourceError};
use crate::core::policy::CallPolicy;
use crate::core::types::{Fingerprint, RawItem, SourceKind, SourceSpec};

/// One kind of news source. Implementations are plain fetchers; quotas,
/// timeouts, retries, ordering and dedup all live in [`SourceManager`].
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch(&self, spec: &SourceSpec, topic: &str) -> Result<Vec<RawItem>, SourceError>;
}

/// Decode HTML entities, drop tags, collapse whitespace.
pub fn strip_markup(s: &str) -> String {
    static RE_TAGS: OnceLock<Regex> = OnceLock::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());

    let decoded = html_escape::decode_html_entities(s).to_string();
    let stripped = re_tags.replace_all(&decoded, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Everything a gather produced: the merged, deduplicated item list plus
/// which sources failed along the way.
#[derive(Debug, Default)]
pub struct GatherOutput {
    pub items: Vec<RawItem>,
    pub failures: Vec<(String, SourceError)>,
}

/// Merges the output of a bot's sources for one run: per-source quota,
/// declaration-order merging, fingerprint dedup, per-source failure
/// isolation.
pub struct SourceManager {
    adapters: HashMap<SourceKind, Arc<dyn NewsSource>>,
    policy: CallPolicy,
}

impl SourceManager {
    pub fn new(policy: CallPolicy) -> Self {
        Self {
            adapters: HashMap::new(),
            policy,
        }
    }

    /// The production wiring: one shared HTTP client across all adapters.
    pub fn with_default_adapters(policy: CallPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout())
            .user_agent(concat!("wirebot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let mut manager = Self::new(policy);
        manager.register(SourceKind::Search, Arc::new(SearchSource::new(client.clone())));
        manager.register(SourceKind::Feed, Arc::new(FeedSource::new(client.clone())));
        manager.register(SourceKind::Site, Arc::new(SiteSource::new(client)));
        Ok(manager)
    }

    pub fn register(&mut self, kind: SourceKind, adapter: Arc<dyn NewsSource>) {
        self.adapters.insert(kind, adapter);
    }

    /// Fetch one spec for one topic under the timeout/retry budget.
    async fn fetch_one(
        &self,
        spec: &SourceSpec,
        topic: &str,
    ) -> Result<Vec<RawItem>, SourceError> {
        let adapter = self
            .adapters
            .get(&spec.kind)
            .ok_or_else(|| SourceError::Unavailable(format!("no adapter for {}", spec.kind)))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(self.policy.timeout(), adapter.fetch(spec, topic))
                .await
                .map_err(|_| SourceError::Timeout(self.policy.timeout()))
                .and_then(|r| r);
            match result {
                Ok(items) => return Ok(items),
                Err(e) if attempt < self.policy.attempts => {
                    debug!(source = %spec.source_id(), attempt, error = %e, "source retry");
                    tokio::time::sleep(self.policy.delay_before(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Gather candidates for a run. Sources are consulted in declaration
    /// order; that order is also the tie-break when two sources return
    /// the same logical item. A failing source never aborts the gather —
    /// only all of them failing does.
    pub async fn gather(
        &self,
        topics: &[String],
        sources: &[SourceSpec],
    ) -> Result<GatherOutput, GatherError> {
        // Title-only items hash against the primary topic, both here and
        // in the pipeline, so the two stages agree on identity.
        let primary_topic = topics.first().map(String::as_str).unwrap_or("");

        let mut output = GatherOutput::default();
        let mut seen: HashSet<Fingerprint> = HashSet::new();
        let mut attempted = 0usize;
        let mut failed = 0usize;

        for spec in sources {
            if spec.max_items == 0 {
                continue;
            }
            attempted += 1;

            let mut spec_items = Vec::new();
            let mut spec_errors = Vec::new();
            for topic in topics {
                match self.fetch_one(spec, topic).await {
                    Ok(items) => spec_items.extend(items),
                    Err(e) => spec_errors.push(e),
                }
            }

            if spec_items.is_empty() && !spec_errors.is_empty() {
                let error = spec_errors.remove(0);
                warn!(source = %spec.source_id(), error = %error, "source failed, skipping");
                output.failures.push((spec.source_id(), error));
                failed += 1;
                continue;
            }

            spec_items.truncate(spec.max_items as usize);
            for item in spec_items {
                let fingerprint = Fingerprint::of(&item, primary_topic);
                if seen.insert(fingerprint) {
                    output.items.push(item);
                }
            }
        }

        if attempted > 0 && failed == attempted {
            return Err(GatherError::AllSourcesUnavailable(attempted));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        items: Vec<RawItem>,
    }

    #[async_trait]
    impl NewsSource for StaticSource {
        async fn fetch(&self, spec: &SourceSpec, _topic: &str) -> Result<Vec<RawItem>, SourceError> {
            Ok(self
                .items
                .iter()
                .cloned()
                .map(|mut item| {
                    item.source_id = spec.source_id();
                    item
                })
                .collect())
        }
    }

    struct FailingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NewsSource for FailingSource {
        async fn fetch(&self, _spec: &SourceSpec, _topic: &str) -> Result<Vec<RawItem>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Unavailable("down".into()))
        }
    }

    fn raw(url: &str, title: &str) -> RawItem {
        RawItem {
            source_id: String::new(),
            url: url.into(),
            title: title.into(),
            fetched_at: 0,
            raw_text: "body".into(),
            image_url: None,
        }
    }

    fn spec(kind: SourceKind, identifier: &str, max_items: u32) -> SourceSpec {
        SourceSpec {
            kind,
            identifier: identifier.into(),
            max_items,
        }
    }

    fn fast_policy() -> CallPolicy {
        CallPolicy {
            timeout_secs: 5,
            attempts: 2,
            base_delay_ms: 1,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn overlapping_urls_across_sources_collapse() {
        let mut manager = SourceManager::new(fast_policy());
        manager.register(
            SourceKind::Feed,
            Arc::new(StaticSource {
                items: vec![
                    raw("https://example.com/shared", "Shared story"),
                    raw("https://example.com/only-a", "Only in A"),
                ],
            }),
        );
        manager.register(
            SourceKind::Search,
            Arc::new(StaticSource {
                items: vec![
                    raw("https://www.example.com/shared/", "Shared story again"),
                    raw("https://example.com/only-b", "Only in B"),
                ],
            }),
        );

        let output = manager
            .gather(
                &["rust".into()],
                &[
                    spec(SourceKind::Feed, "feedA", 2),
                    spec(SourceKind::Search, "feedB", 2),
                ],
            )
            .await
            .unwrap();

        assert_eq!(output.items.len(), 3);
        // First-seen copy wins: the shared story is tagged with feed A.
        let shared = output
            .items
            .iter()
            .find(|i| i.url.contains("shared"))
            .unwrap();
        assert_eq!(shared.source_id, "feed:feedA");
        assert!(output.failures.is_empty());
    }

    #[tokio::test]
    async fn one_failing_source_is_isolated() {
        let mut manager = SourceManager::new(fast_policy());
        manager.register(
            SourceKind::Feed,
            Arc::new(FailingSource {
                calls: AtomicUsize::new(0),
            }),
        );
        manager.register(
            SourceKind::Search,
            Arc::new(StaticSource {
                items: vec![raw("https://example.com/x", "Story X")],
            }),
        );

        let output = manager
            .gather(
                &["rust".into()],
                &[
                    spec(SourceKind::Feed, "bad", 3),
                    spec(SourceKind::Search, "", 3),
                ],
            )
            .await
            .unwrap();

        assert_eq!(output.items.len(), 1);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].0, "feed:bad");
    }

    #[tokio::test]
    async fn all_sources_failing_escalates() {
        let mut manager = SourceManager::new(fast_policy());
        manager.register(
            SourceKind::Feed,
            Arc::new(FailingSource {
                calls: AtomicUsize::new(0),
            }),
        );

        let result = manager
            .gather(&["rust".into()], &[spec(SourceKind::Feed, "bad", 3)])
            .await;
        assert!(matches!(
            result,
            Err(GatherError::AllSourcesUnavailable(1))
        ));
    }

    #[tokio::test]
    async fn failed_fetches_are_retried_within_budget() {
        let failing = Arc::new(FailingSource {
            calls: AtomicUsize::new(0),
        });
        let mut manager = SourceManager::new(fast_policy());
        manager.register(SourceKind::Feed, failing.clone());

        let _ = manager
            .gather(&["rust".into()], &[spec(SourceKind::Feed, "bad", 1)])
            .await;
        // attempts=2 in the policy: one retry after the initial failure.
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_quota_sources_are_not_consulted() {
        let failing = Arc::new(FailingSource {
            calls: AtomicUsize::new(0),
        });
        let mut manager = SourceManager::new(fast_policy());
        manager.register(SourceKind::Feed, failing.clone());

        let output = manager
            .gather(&["rust".into()], &[spec(SourceKind::Feed, "bad", 0)])
            .await
            .unwrap();
        assert!(output.items.is_empty());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn strip_markup_decodes_and_flattens() {
        assert_eq!(
            strip_markup("<p>Ampersand &amp;  <b>bold</b></p>"),
            "Ampersand & bold"
        );
    }
}
