use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::error::RunError;
use crate::core::ledger::PostingLedger;
use crate::core::pipeline::PipelineRunner;
use crate::core::settings::RunRetrySettings;
use crate::core::sources::SourceManager;
use crate::core::store::BotStore;
use crate::core::types::{BotConfig, RunRecord, RunStatus};

/// Lifecycle of one bot between schedule ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Idle,
    Due,
    Running,
    Failed,
}

pub fn can_transition(from: BotState, to: BotState) -> bool {
    matches!(
        (from, to),
        (BotState::Idle, BotState::Due)
            | (BotState::Due, BotState::Running)
            // An overlapping tick backs off without running.
            | (BotState::Due, BotState::Idle)
            | (BotState::Running, BotState::Idle)
            | (BotState::Running, BotState::Failed)
            | (BotState::Failed, BotState::Idle)
    )
}

/// Everything a run needs, bundled so cron closures can clone one handle.
pub struct RunDeps {
    pub sources: SourceManager,
    pub runner: PipelineRunner,
    pub ledger: Arc<PostingLedger>,
    pub store: Arc<BotStore>,
}

/// Gather and run one bot once, retrying the slot on run-level failure
/// per the retry policy. Item-level failures inside a run are data, not
/// failures; only gather exhaustion (or an internal fault) lands here.
pub async fn execute_run(
    deps: &RunDeps,
    config: &BotConfig,
    retry: &RunRetrySettings,
    cancel: &CancellationToken,
) -> Result<RunRecord, RunError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        match deps.sources.gather(&config.topics, &config.sources).await {
            Ok(gathered) => {
                let mut record = deps
                    .runner
                    .run(config, gathered.items, cancel.clone())
                    .await;
                record.source_failures = gathered
                    .failures
                    .into_iter()
                    .map(|(source, error)| (source, error.to_string()))
                    .collect();

                if let Err(e) = deps.ledger.record_run(&record).await {
                    error!(bot = %config.name, error = %e, "failed to persist run record");
                }
                if let Err(e) = deps
                    .store
                    .record_last_run(
                        &config.id,
                        &record.ended_at.to_rfc3339(),
                        &record.summary_line(),
                    )
                    .await
                {
                    warn!(bot = %config.name, error = %e, "failed to write last-run summary");
                }
                return Ok(record);
            }
            Err(e) if attempt < retry.max_attempts => {
                let delay = backoff_delay(retry, attempt);
                warn!(
                    bot = %config.name,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "run failed, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(RunError::Cancelled),
                }
            }
            Err(e) => {
                let record = failed_run_record(config);
                if let Err(persist_err) = deps.ledger.record_run(&record).await {
                    error!(bot = %config.name, error = %persist_err, "failed to persist failed run");
                }
                return Err(RunError::Gather(e));
            }
        }
    }
}

fn backoff_delay(retry: &RunRetrySettings, attempt: u32) -> std::time::Duration {
    let base = retry.base_delay_secs as f64 * retry.multiplier.powi(attempt as i32 - 1);
    let jitter = 1.0 + rand::thread_rng().gen_range(-retry.jitter..=retry.jitter);
    std::time::Duration::from_secs_f64((base * jitter).max(0.0))
}

fn failed_run_record(config: &BotConfig) -> RunRecord {
    let now = Utc::now();
    RunRecord {
        run_id: uuid::Uuid::new_v4().to_string(),
        bot_id: config.id.clone(),
        started_at: now,
        ended_at: now,
        status: RunStatus::Failed,
        items: Vec::new(),
        source_failures: Vec::new(),
    }
}

/// Owns the fleet: one cron job per bot, an exclusive run lock per bot
/// id, and the shutdown token. Runs for different bots overlap freely;
/// a bot that is still running when its next tick fires records an
/// overlap skip instead of queueing.
pub struct BotScheduler {
    scheduler: tokio_cron_scheduler::JobScheduler,
    deps: Arc<RunDeps>,
    retry: RunRetrySettings,
    running: Arc<Mutex<HashSet<String>>>,
    states: Arc<Mutex<HashMap<String, BotState>>>,
    cancel: CancellationToken,
}

impl BotScheduler {
    pub async fn new(
        deps: Arc<RunDeps>,
        retry: RunRetrySettings,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            scheduler: tokio_cron_scheduler::JobScheduler::new().await?,
            deps,
            retry,
            running: Arc::new(Mutex::new(HashSet::new())),
            states: Arc::new(Mutex::new(HashMap::new())),
            cancel,
        })
    }

    /// Register every stored bot and start ticking. Bots with an invalid
    /// cron expression are reported and skipped; they do not block the
    /// rest of the fleet.
    pub async fn start(&mut self) -> Result<usize> {
        let bots = self.deps.store.list().await?;
        let mut registered = 0;

        for bot in bots {
            match self.register_bot(&bot).await {
                Ok(()) => registered += 1,
                Err(e) => {
                    error!(bot = %bot.name, schedule = %bot.schedule, error = %e, "invalid schedule, bot skipped");
                }
            }
        }

        self.scheduler.start().await?;
        info!(bots = registered, "scheduler started");
        Ok(registered)
    }

    async fn register_bot(&mut self, bot: &BotConfig) -> Result<()> {
        self.states
            .lock()
            .await
            .insert(bot.id.clone(), BotState::Idle);

        let deps = self.deps.clone();
        let retry = self.retry;
        let running = self.running.clone();
        let states = self.states.clone();
        let cancel = self.cancel.clone();
        let bot = bot.clone();
        let schedule = bot.schedule.clone();
        let name = bot.name.clone();

        let job =
            tokio_cron_scheduler::Job::new_async(schedule.as_str(), move |_uuid, mut _l| {
                let deps = deps.clone();
                let running = running.clone();
                let states = states.clone();
                let cancel = cancel.clone();
                let bot = bot.clone();

                Box::pin(async move {
                    tick(deps, bot, retry, running, states, cancel).await;
                })
            })?;
        self.scheduler.add(job).await?;
        info!(bot = %name, schedule = %schedule, "bot scheduled");
        Ok(())
    }

    pub async fn state_of(&self, bot_id: &str) -> Option<BotState> {
        self.states.lock().await.get(bot_id).copied()
    }

    /// Fire one bot immediately, using the same run lock as the cron
    /// path. Returns `None` when the bot was already running.
    pub async fn trigger_now(&self, bot: &BotConfig) -> Result<Option<RunRecord>, RunError> {
        run_locked(
            &self.deps,
            bot,
            &self.retry,
            &self.running,
            &self.states,
            &self.cancel,
        )
        .await
    }

    /// Stop issuing new work and let in-flight publishes finish.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.scheduler.shutdown().await?;
        // Wait for run locks to drain so recorded outcomes are complete.
        loop {
            if self.running.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        info!("scheduler stopped");
        Ok(())
    }
}

async fn tick(
    deps: Arc<RunDeps>,
    bot: BotConfig,
    retry: RunRetrySettings,
    running: Arc<Mutex<HashSet<String>>>,
    states: Arc<Mutex<HashMap<String, BotState>>>,
    cancel: CancellationToken,
) {
    if cancel.is_cancelled() {
        return;
    }
    match run_locked(&deps, &bot, &retry, &running, &states, &cancel).await {
        Ok(Some(record)) => {
            info!(bot = %bot.name, "{}", record.summary_line());
        }
        Ok(None) => {
            info!(bot = %bot.name, "still running, tick skipped");
        }
        Err(e) => {
            error!(bot = %bot.name, error = %e, "run failed after retries");
        }
    }
}

/// The Due → Running transition: take the bot's exclusive run lock or
/// record an overlap skip. The lock is always released, success or not.
async fn run_locked(
    deps: &Arc<RunDeps>,
    bot: &BotConfig,
    retry: &RunRetrySettings,
    running: &Arc<Mutex<HashSet<String>>>,
    states: &Arc<Mutex<HashMap<String, BotState>>>,
    cancel: &CancellationToken,
) -> Result<Option<RunRecord>, RunError> {
    {
        let mut guard = running.lock().await;
        if !guard.insert(bot.id.clone()) {
            drop(guard);
            if let Err(e) = deps.ledger.record_overlap_skip(&bot.id).await {
                warn!(bot = %bot.name, error = %e, "failed to record overlap skip");
            }
            return Ok(None);
        }
    }
    set_state(states, &bot.id, BotState::Running).await;

    let result = execute_run(deps, bot, retry, cancel).await;

    running.lock().await.remove(&bot.id);
    let next = match &result {
        // A completed run with item failures is still a scheduler success.
        Ok(_) => BotState::Idle,
        Err(_) => BotState::Failed,
    };
    set_state(states, &bot.id, next).await;
    if next == BotState::Failed {
        // Retries are exhausted; wait for the next natural tick.
        set_state(states, &bot.id, BotState::Idle).await;
    }

    result.map(Some)
}

async fn set_state(
    states: &Arc<Mutex<HashMap<String, BotState>>>,
    bot_id: &str,
    to: BotState,
) {
    let mut guard = states.lock().await;
    let from = guard.get(bot_id).copied().unwrap_or(BotState::Idle);
    // Due is implicit between the cron fire and the lock acquisition.
    let from = if from == BotState::Idle && to == BotState::Running {
        BotState::Due
    } else {
        from
    };
    if can_transition(from, to) || from == to {
        guard.insert(bot_id.to_string(), to);
    } else {
        warn!(bot_id, ?from, ?to, "unexpected state transition");
        guard.insert(bot_id.to_string(), to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_happy_path_transitions_are_allowed() {
        let path = [
            (BotState::Idle, BotState::Due),
            (BotState::Due, BotState::Running),
            (BotState::Running, BotState::Idle),
        ];
        for (from, to) in path {
            assert!(
                can_transition(from, to),
                "expected transition {:?} -> {:?} to be allowed",
                from,
                to
            );
        }
    }

    #[test]
    fn failed_runs_return_to_idle_not_due() {
        assert!(can_transition(BotState::Running, BotState::Failed));
        assert!(can_transition(BotState::Failed, BotState::Idle));
        assert!(!can_transition(BotState::Failed, BotState::Running));
    }

    #[test]
    fn runs_never_start_without_a_due_tick() {
        assert!(!can_transition(BotState::Idle, BotState::Running));
        assert!(!can_transition(BotState::Idle, BotState::Failed));
    }

    #[test]
    fn backoff_grows_and_respects_jitter() {
        let retry = RunRetrySettings {
            base_delay_secs: 30,
            multiplier: 2.0,
            max_attempts: 3,
            jitter: 0.2,
        };
        let d1 = backoff_delay(&retry, 1).as_secs_f64();
        let d2 = backoff_delay(&retry, 2).as_secs_f64();
        assert!((24.0..=36.0).contains(&d1), "d1={}", d1);
        assert!((48.0..=72.0).contains(&d2), "d2={}", d2);
    }
}
