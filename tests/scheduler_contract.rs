mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::*;
use wirebot::core::publish::Connector;
use wirebot::core::scheduler::{BotScheduler, BotState, execute_run};
use wirebot::core::settings::RunRetrySettings;
use wirebot::core::sources::NewsSource;
use wirebot::core::types::{PlatformKind, RunStatus, SourceKind};

fn fast_retry() -> RunRetrySettings {
    RunRetrySettings {
        base_delay_secs: 0,
        multiplier: 1.0,
        max_attempts: 2,
        jitter: 0.0,
    }
}

#[tokio::test]
async fn overlapping_trigger_is_skipped_not_queued() {
    let slow_source = Arc::new(StaticSource::slow(
        vec![raw_item("https://example.com/a", "Rust story A")],
        Duration::from_millis(200),
    ));
    let h = harness(
        vec![(SourceKind::Feed, slow_source as Arc<dyn NewsSource>)],
        vec![Arc::new(ScriptedConnector::ok(PlatformKind::Twitter)) as Arc<dyn Connector>],
    );
    let config = bot(
        "overlap",
        vec![feed_spec("main", 5)],
        vec![destination(PlatformKind::Twitter)],
    );
    h.store.save(&config).await.unwrap();

    let scheduler = BotScheduler::new(h.deps.clone(), fast_retry(), CancellationToken::new())
        .await
        .unwrap();

    let first = scheduler.trigger_now(&config);
    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.trigger_now(&config).await
    };
    let (first, second) = tokio::join!(first, second);

    let first = first.unwrap().expect("first trigger should run");
    assert_eq!(first.status, RunStatus::Completed);
    assert!(second.unwrap().is_none(), "overlap should skip, not queue");

    // The skip is visible in run history alongside the real run.
    let runs = h.ledger.recent_runs(Some(&config.id), 10).await.unwrap();
    let statuses: Vec<&str> = runs.iter().map(|(s, _, _)| s.as_str()).collect();
    assert!(statuses.contains(&"skipped_overlap"));
    assert!(statuses.contains(&"completed"));

    // And the bot settles back to idle.
    assert_eq!(scheduler.state_of(&config.id).await, Some(BotState::Idle));
}

#[tokio::test]
async fn sequential_triggers_both_run() {
    let h = harness(
        vec![(
            SourceKind::Feed,
            Arc::new(StaticSource::new(vec![raw_item(
                "https://example.com/a",
                "Rust story A",
            )])) as Arc<dyn NewsSource>,
        )],
        vec![Arc::new(ScriptedConnector::ok(PlatformKind::Twitter)) as Arc<dyn Connector>],
    );
    let config = bot(
        "sequential",
        vec![feed_spec("main", 5)],
        vec![destination(PlatformKind::Twitter)],
    );
    h.store.save(&config).await.unwrap();

    let scheduler = BotScheduler::new(h.deps.clone(), fast_retry(), CancellationToken::new())
        .await
        .unwrap();

    let first = scheduler.trigger_now(&config).await.unwrap().unwrap();
    let second = scheduler.trigger_now(&config).await.unwrap().unwrap();
    assert_eq!(first.outcome_counts().0, 1);
    // Second run finds everything already posted.
    assert_eq!(second.outcome_counts().0, 0);
}

#[tokio::test]
async fn clones_share_the_ledger_and_dedup_against_each_other() {
    let items = vec![raw_item("https://example.com/shared", "Shared rust story")];
    let twitter = Arc::new(ScriptedConnector::ok(PlatformKind::Twitter));
    let h = harness(
        vec![(
            SourceKind::Feed,
            Arc::new(StaticSource::new(items)) as Arc<dyn NewsSource>,
        )],
        vec![twitter.clone() as Arc<dyn Connector>],
    );

    let original = bot(
        "original",
        vec![feed_spec("main", 5)],
        vec![destination(PlatformKind::Twitter)],
    );
    h.store.save(&original).await.unwrap();
    let clone = h.store.clone_bot("original", "clone").await.unwrap();
    assert_ne!(clone.id, original.id);

    let cancel = CancellationToken::new();
    let first = execute_run(&h.deps, &original, &fast_retry(), &cancel)
        .await
        .unwrap();
    assert_eq!(first.outcome_counts().0, 1);

    // The clone targets the same topic; the shared ledger keeps it from
    // re-posting what the original already published.
    let second = execute_run(&h.deps, &clone, &fast_retry(), &cancel)
        .await
        .unwrap();
    assert_eq!(second.outcome_counts().0, 0);
    assert_eq!(twitter.call_count(), 1);
}

#[tokio::test]
async fn last_run_summary_is_written_back() {
    let h = harness(
        vec![(
            SourceKind::Feed,
            Arc::new(StaticSource::new(vec![raw_item(
                "https://example.com/a",
                "Rust story A",
            )])) as Arc<dyn NewsSource>,
        )],
        vec![Arc::new(ScriptedConnector::ok(PlatformKind::Twitter)) as Arc<dyn Connector>],
    );
    let config = bot(
        "write-back",
        vec![feed_spec("main", 5)],
        vec![destination(PlatformKind::Twitter)],
    );
    h.store.save(&config).await.unwrap();

    execute_run(&h.deps, &config, &fast_retry(), &CancellationToken::new())
        .await
        .unwrap();

    let (_, summary) = h
        .store
        .last_run_summary(&config.id)
        .await
        .unwrap()
        .expect("summary should be written after a run");
    assert!(summary.contains("1 posted"), "summary: {}", summary);
}
