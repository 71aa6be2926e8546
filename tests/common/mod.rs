#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use wirebot::core::error::{PublishError, SourceError};
use wirebot::core::ledger::PostingLedger;
use wirebot::core::pipeline::PipelineRunner;
use wirebot::core::policy::{CallPolicies, CallPolicy};
use wirebot::core::publish::{Connector, ConnectorRegistry};
use wirebot::core::scheduler::RunDeps;
use wirebot::core::sources::{NewsSource, SourceManager};
use wirebot::core::store::BotStore;
use wirebot::core::transform::ArticleTransformer;
use wirebot::core::types::{
    BotConfig, DestinationSpec, PlatformKind, RawItem, SourceKind, SourceSpec, TransformOptions,
};

/// Fast everything: millisecond backoffs so retry paths run in test time.
pub fn fast_policies() -> CallPolicies {
    let fast = CallPolicy {
        timeout_secs: 5,
        attempts: 3,
        base_delay_ms: 1,
        multiplier: 1.0,
        jitter: 0.0,
    };
    CallPolicies {
        source: fast,
        transform: fast,
        publish: fast,
    }
}

pub fn raw_item(url: &str, title: &str) -> RawItem {
    RawItem {
        source_id: String::new(),
        url: url.into(),
        title: title.into(),
        fetched_at: 0,
        raw_text: format!("{}. More detail follows in the body text.", title),
        image_url: None,
    }
}

/// Source that returns the same fixed items on every fetch.
pub struct StaticSource {
    pub items: Vec<RawItem>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(items: Vec<RawItem>) -> Self {
        Self {
            items,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(items: Vec<RawItem>, delay: Duration) -> Self {
        Self {
            items,
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NewsSource for StaticSource {
    async fn fetch(&self, spec: &SourceSpec, _topic: &str) -> Result<Vec<RawItem>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
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

/// Source that always fails.
pub struct DownSource {
    pub calls: AtomicUsize,
}

impl DownSource {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NewsSource for DownSource {
    async fn fetch(&self, _spec: &SourceSpec, _topic: &str) -> Result<Vec<RawItem>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SourceError::Unavailable("connection refused".into()))
    }
}

/// Connector driven by a script of canned results. Once the script is
/// exhausted every publish succeeds with a generated post id.
pub struct ScriptedConnector {
    platform: PlatformKind,
    script: Mutex<VecDeque<Result<String, PublishError>>>,
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl ScriptedConnector {
    pub fn ok(platform: PlatformKind) -> Self {
        Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn scripted(
        platform: PlatformKind,
        script: Vec<Result<String, PublishError>>,
    ) -> Self {
        Self {
            platform,
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(platform: PlatformKind, delay: Duration) -> Self {
        Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn platform(&self) -> PlatformKind {
        self.platform
    }

    async fn publish(
        &self,
        _item: &wirebot::core::types::ProcessedItem,
        _destination: &DestinationSpec,
    ) -> Result<String, PublishError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.script.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(format!("post-{}", n)),
        }
    }
}

pub fn feed_spec(identifier: &str, max_items: u32) -> SourceSpec {
    SourceSpec {
        kind: SourceKind::Feed,
        identifier: identifier.into(),
        max_items,
    }
}

pub fn destination(platform: PlatformKind) -> DestinationSpec {
    DestinationSpec {
        platform,
        enabled: true,
        credential_ref: format!("{}-test", platform),
    }
}

pub fn bot(name: &str, sources: Vec<SourceSpec>, destinations: Vec<DestinationSpec>) -> BotConfig {
    BotConfig {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.into(),
        topics: vec!["rust".into()],
        sources,
        destinations,
        schedule: "0 0 * * * *".into(),
        transform: TransformOptions::default(),
    }
}

/// Fully wired in-memory deps around the given mocks.
pub struct Harness {
    pub deps: Arc<RunDeps>,
    pub ledger: Arc<PostingLedger>,
    pub store: Arc<BotStore>,
}

pub fn harness(
    sources: Vec<(SourceKind, Arc<dyn NewsSource>)>,
    connectors: Vec<Arc<dyn Connector>>,
) -> Harness {
    let policies = fast_policies();
    let ledger = Arc::new(PostingLedger::open_in_memory().unwrap());
    let store = Arc::new(BotStore::open_in_memory().unwrap());

    let mut manager = SourceManager::new(policies.source);
    for (kind, adapter) in sources {
        manager.register(kind, adapter);
    }

    let mut registry = ConnectorRegistry::new();
    for connector in connectors {
        registry.register(connector);
    }

    let runner = PipelineRunner::new(
        ledger.clone(),
        Arc::new(ArticleTransformer),
        Arc::new(registry),
        policies,
    );

    Harness {
        deps: Arc::new(RunDeps {
            sources: manager,
            runner,
            ledger: ledger.clone(),
            store: store.clone(),
        }),
        ledger,
        store,
    }
}
