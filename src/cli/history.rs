use std::str::FromStr;

use anyhow::Result;
use console::style;

use crate::cli::{AppContext, flag_value, has_flag};
use crate::core::ledger::HistoryFilter;
use crate::core::types::{PlatformKind, PostStatus};

/// `wirebot history [--bot <id>] [--fingerprint <hex>] [--dest <platform>]
/// [--limit N]`, or `--runs` for run-level history including overlap
/// skips.
pub async fn execute(args: &[String]) -> Result<()> {
    let ctx = AppContext::open().await?;
    let limit = flag_value(args, "--limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0usize);

    let bot = match flag_value(args, "--bot") {
        // Accept either an id or a name; the ledger stores ids.
        Some(id_or_name) => match ctx.store.find(&id_or_name).await? {
            Some(config) => Some(config.id),
            None => Some(id_or_name),
        },
        None => None,
    };

    if has_flag(args, "--runs") {
        let runs = ctx.ledger.recent_runs(bot.as_deref(), limit).await?;
        if runs.is_empty() {
            println!("No runs recorded.");
        }
        for (status, started_at, record) in runs {
            match record {
                Some(record) => {
                    println!(
                        "{}  {}  {}",
                        style(&started_at).dim(),
                        status_style(&status),
                        record.summary_line()
                    );
                }
                None => {
                    println!("{}  {}", style(&started_at).dim(), status_style(&status));
                }
            }
        }
        return Ok(());
    }

    let filter = HistoryFilter {
        bot_id: bot,
        fingerprint: flag_value(args, "--fingerprint"),
        destination: flag_value(args, "--dest")
            .and_then(|v| PlatformKind::from_str(&v).ok()),
        limit,
    };
    let outcomes = ctx.ledger.history(filter).await?;
    if outcomes.is_empty() {
        println!("No outcomes recorded.");
    }
    for outcome in outcomes {
        let status = match outcome.status {
            PostStatus::Posted => style("posted").green(),
            PostStatus::SkippedDuplicate => style("skipped").dim(),
            PostStatus::Failed => style("failed").red(),
        };
        println!(
            "{}  {:9}  {:9}  {}  {}",
            style(outcome.attempted_at.to_rfc3339()).dim(),
            outcome.destination.to_string(),
            status,
            &outcome.fingerprint.as_str()[..12],
            outcome
                .post_id
                .or(outcome.error_kind)
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn status_style(status: &str) -> console::StyledObject<String> {
    match status {
        "completed" => style(status.to_string()).green(),
        "failed" => style(status.to_string()).red(),
        "skipped_overlap" => style(status.to_string()).yellow(),
        _ => style(status.to_string()).dim(),
    }
}
