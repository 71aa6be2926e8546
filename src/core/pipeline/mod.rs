use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::error::PublishError;
use crate::core::ledger::PostingLedger;
use crate::core::policy::CallPolicies;
use crate::core::publish::ConnectorRegistry;
use crate::core::transform::Transformer;
use crate::core::types::{
    BotConfig, DestinationSpec, Fingerprint, ItemDisposition, ItemReport, PlatformKind,
    PostOutcome, ProcessedItem, RawItem, RunRecord, RunStatus, TransformOptions,
};

/// Drives one bot's candidate items through transform → dedup-check →
/// publish-per-destination with a bounded worker pool.
///
/// Isolation rules: a failing item never touches its siblings, a failing
/// destination never touches the item's other destinations, and the only
/// shared mutable state across workers is the ledger.
pub struct PipelineRunner {
    ledger: Arc<PostingLedger>,
    transformer: Arc<dyn Transformer>,
    connectors: Arc<ConnectorRegistry>,
    policies: CallPolicies,
}

struct RunContext {
    ledger: Arc<PostingLedger>,
    transformer: Arc<dyn Transformer>,
    connectors: Arc<ConnectorRegistry>,
    policies: CallPolicies,
    bot_id: String,
    topic: String,
    destinations: Vec<DestinationSpec>,
    options: TransformOptions,
    cancel: CancellationToken,
}

impl PipelineRunner {
    pub fn new(
        ledger: Arc<PostingLedger>,
        transformer: Arc<dyn Transformer>,
        connectors: Arc<ConnectorRegistry>,
        policies: CallPolicies,
    ) -> Self {
        Self {
            ledger,
            transformer,
            connectors,
            policies,
        }
    }

    pub async fn run(
        &self,
        config: &BotConfig,
        items: Vec<RawItem>,
        cancel: CancellationToken,
    ) -> RunRecord {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(bot = %config.name, items = items.len(), "pipeline run starting");

        let ctx = Arc::new(RunContext {
            ledger: self.ledger.clone(),
            transformer: self.transformer.clone(),
            connectors: self.connectors.clone(),
            policies: self.policies,
            bot_id: config.id.clone(),
            topic: config.primary_topic().to_string(),
            destinations: config.enabled_destinations().cloned().collect(),
            options: config.transform.clone(),
            cancel: cancel.clone(),
        });

        let workers = config.transform.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();
        for item in items {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                // The semaphore is never closed while the run is live.
                let _permit = semaphore.acquire_owned().await.expect("worker pool closed");
                process_item(ctx, item).await
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "pipeline worker panicked"),
            }
        }

        let status = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        let record = RunRecord {
            run_id,
            bot_id: config.id.clone(),
            started_at,
            ended_at: Utc::now(),
            status,
            items: reports,
            source_failures: Vec::new(),
        };
        let (posted, skipped, failed) = record.outcome_counts();
        info!(bot = %config.name, posted, skipped, failed, status = %record.status, "pipeline run finished");
        record
    }
}

async fn process_item(ctx: Arc<RunContext>, item: RawItem) -> ItemReport {
    let fingerprint = Fingerprint::of(&item, &ctx.topic);
    let report = |disposition| ItemReport {
        fingerprint: fingerprint.clone(),
        title: item.title.clone(),
        url: item.url.clone(),
        disposition,
    };

    if ctx.cancel.is_cancelled() {
        return report(ItemDisposition::NotAttempted);
    }

    // Skip the transform entirely when nothing is left to publish.
    let platforms: Vec<PlatformKind> = ctx.destinations.iter().map(|d| d.platform).collect();
    match ctx.ledger.all_posted(fingerprint.as_str(), &platforms).await {
        Ok(true) => return report(ItemDisposition::AlreadyPosted),
        Ok(false) => {}
        Err(e) => {
            error!(error = %e, "ledger lookup failed");
            return report(ItemDisposition::TransformFailed {
                error: format!("ledger: {}", e),
            });
        }
    }

    let processed = match transform_with_retry(&ctx, &item, &fingerprint).await {
        Ok(processed) => processed,
        Err(e) => {
            warn!(title = %item.title, error = %e, "item transform failed");
            return report(ItemDisposition::TransformFailed { error: e });
        }
    };

    // Destinations for one item are strictly sequential: the ledger is
    // consulted again only after the previous attempt is recorded.
    let mut outcomes = Vec::new();
    for destination in &ctx.destinations {
        if ctx.cancel.is_cancelled() {
            break;
        }
        outcomes.push(publish_one(&ctx, &processed, &fingerprint, destination).await);
    }

    report(ItemDisposition::Published { outcomes })
}

async fn transform_with_retry(
    ctx: &RunContext,
    item: &RawItem,
    fingerprint: &Fingerprint,
) -> Result<ProcessedItem, String> {
    let policy = ctx.policies.transform;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = tokio::time::timeout(
            policy.timeout(),
            ctx.transformer
                .process(item, fingerprint, &ctx.topic, &ctx.options),
        )
        .await;
        match result {
            Ok(Ok(processed)) => return Ok(processed),
            Ok(Err(_)) if attempt < policy.attempts => {
                tokio::time::sleep(policy.delay_before(attempt)).await;
            }
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) if attempt < policy.attempts => {
                tokio::time::sleep(policy.delay_before(attempt)).await;
            }
            Err(_) => return Err(format!("transform timed out after {:?}", policy.timeout())),
        }
    }
}

/// One destination for one item: lock the pair, re-check the ledger,
/// publish within the retry budget, record the outcome before returning.
/// An in-flight publish is never abandoned; cancellation only stops new
/// attempts from starting.
async fn publish_one(
    ctx: &RunContext,
    item: &ProcessedItem,
    fingerprint: &Fingerprint,
    destination: &DestinationSpec,
) -> PostOutcome {
    let pair = ctx
        .ledger
        .pair_lock(fingerprint.as_str(), destination.platform)
        .await;
    let _guard = pair.lock().await;

    match ctx
        .ledger
        .has_posted(fingerprint.as_str(), destination.platform)
        .await
    {
        Ok(true) => {
            let outcome = PostOutcome::skipped(&ctx.bot_id, fingerprint, destination.platform);
            return record_outcome(ctx, outcome).await;
        }
        Ok(false) => {}
        Err(e) => {
            error!(error = %e, "ledger lookup failed");
            let outcome =
                PostOutcome::failed(&ctx.bot_id, fingerprint, destination.platform, "internal");
            return record_outcome(ctx, outcome).await;
        }
    }

    let Some(connector) = ctx.connectors.get(destination.platform) else {
        warn!(platform = %destination.platform, "no connector registered");
        let outcome =
            PostOutcome::failed(&ctx.bot_id, fingerprint, destination.platform, "unavailable");
        return record_outcome(ctx, outcome).await;
    };

    let policy = ctx.policies.publish;
    let mut attempt = 0;
    let outcome = loop {
        attempt += 1;
        let result = tokio::time::timeout(policy.timeout(), connector.publish(item, destination))
            .await
            .map_err(|_| PublishError::Unavailable(format!("timed out after {:?}", policy.timeout())))
            .and_then(|r| r);

        match result {
            Ok(post_id) => {
                break PostOutcome::posted(&ctx.bot_id, fingerprint, destination.platform, post_id);
            }
            Err(e) if e.is_retryable() && attempt < policy.attempts => {
                let delay = match &e {
                    PublishError::RateLimited {
                        retry_after: Some(after),
                    } => *after,
                    _ => policy.delay_before(attempt),
                };
                warn!(
                    platform = %destination.platform,
                    attempt,
                    error = %e,
                    "publish attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(platform = %destination.platform, error = %e, "publish failed");
                break PostOutcome::failed(&ctx.bot_id, fingerprint, destination.platform, e.kind());
            }
        }
    };
    record_outcome(ctx, outcome).await
}

/// Ledger write happens before the next destination is touched. A posted
/// outcome that loses the cross-process race comes back downgraded.
async fn record_outcome(ctx: &RunContext, mut outcome: PostOutcome) -> PostOutcome {
    match ctx.ledger.record(&outcome).await {
        Ok(effective) => outcome.status = effective,
        Err(e) => {
            // The publish may have gone out; losing the row would invite a
            // duplicate on the next run, so this is loud.
            error!(
                fingerprint = outcome.fingerprint.as_str(),
                destination = %outcome.destination,
                error = %e,
                "failed to record outcome in ledger"
            );
        }
    }
    outcome
}
