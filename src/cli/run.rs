use std::str::FromStr;

use anyhow::{Result, bail};
use console::style;
use tokio_util::sync::CancellationToken;

use crate::cli::{AppContext, flag_value, flag_values, has_flag};
use crate::core::scheduler::execute_run;
use crate::core::terminal::{print_status, print_step, print_success, print_warn};
use crate::core::types::{
    BotConfig, DestinationSpec, ItemDisposition, PlatformKind, PostStatus, RunRecord, RunStatus,
    SourceKind, SourceSpec, TransformOptions,
};

/// `wirebot run --bot <id|name>` or an ad-hoc
/// `wirebot run --topic rust --feed <url> --dest twitter=twitter-main`.
///
/// Exits zero for any completed run, item failures included; non-zero
/// only on a run-level failure.
pub async fn execute(args: &[String]) -> Result<()> {
    let ctx = AppContext::open().await?;

    let config = if let Some(id_or_name) = flag_value(args, "--bot") {
        match ctx.store.find(&id_or_name).await? {
            Some(config) => config,
            None => bail!("no bot matching '{}'", id_or_name),
        }
    } else {
        ad_hoc_config(args)?
    };

    print_step(&format!("Running bot '{}'", config.name));
    let deps = ctx.run_deps()?;
    let record = execute_run(
        &deps,
        &config,
        &ctx.settings.run_retry,
        &CancellationToken::new(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("run failed: {}", e))?;

    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }

    match record.status {
        RunStatus::Completed => Ok(()),
        status => bail!("run ended with status {}", status),
    }
}

/// Build a transient bot from flags. Nothing is stored; the ledger still
/// dedups against every other bot through the shared fingerprints.
fn ad_hoc_config(args: &[String]) -> Result<BotConfig> {
    let topics = flag_values(args, "--topic");
    if topics.is_empty() {
        bail!("either --bot or at least one --topic is required");
    }

    let max_items: u32 = flag_value(args, "--max-items")
        .map(|v| v.parse())
        .transpose()?
        .unwrap_or(5);

    let mut sources = Vec::new();
    for url in flag_values(args, "--feed") {
        sources.push(SourceSpec {
            kind: SourceKind::Feed,
            identifier: url,
            max_items,
        });
    }
    for url in flag_values(args, "--site") {
        sources.push(SourceSpec {
            kind: SourceKind::Site,
            identifier: url,
            max_items,
        });
    }
    for terms in flag_values(args, "--search") {
        sources.push(SourceSpec {
            kind: SourceKind::Search,
            identifier: terms,
            max_items,
        });
    }
    if has_flag(args, "--search") && sources.iter().all(|s| s.kind != SourceKind::Search) {
        // `--search` with no value: plain topic search.
        sources.push(SourceSpec {
            kind: SourceKind::Search,
            identifier: String::new(),
            max_items,
        });
    }
    if sources.is_empty() {
        bail!("ad-hoc runs need at least one --feed, --site or --search source");
    }

    let mut destinations = Vec::new();
    for spec in flag_values(args, "--dest") {
        let (platform, credential_ref) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--dest expects platform=credential-ref, got '{}'", spec))?;
        destinations.push(DestinationSpec {
            platform: PlatformKind::from_str(platform).map_err(|e| anyhow::anyhow!(e))?,
            enabled: true,
            credential_ref: credential_ref.to_string(),
        });
    }

    Ok(BotConfig {
        id: format!("adhoc-{}", uuid::Uuid::new_v4()),
        name: format!("adhoc:{}", topics.join("+")),
        topics,
        sources,
        destinations,
        schedule: String::new(),
        transform: TransformOptions::default(),
    })
}

fn print_record(record: &RunRecord) {
    let (posted, skipped, failed) = record.outcome_counts();
    print_status("Status", &record.status.to_string());
    print_status(
        "Items",
        &format!(
            "{} ({} posted, {} skipped, {} failed)",
            record.items.len(),
            posted,
            skipped,
            failed
        ),
    );
    for (source, error) in &record.source_failures {
        print_warn(&format!("source {} failed: {}", source, error));
    }

    for item in &record.items {
        println!("\n  {}", style(&item.title).bold());
        match &item.disposition {
            ItemDisposition::AlreadyPosted => {
                println!("    {}", style("already posted everywhere").dim());
            }
            ItemDisposition::TransformFailed { error } => {
                println!("    {} {}", style("transform failed:").red(), error);
            }
            ItemDisposition::NotAttempted => {
                println!("    {}", style("not attempted (cancelled)").dim());
            }
            ItemDisposition::Published { outcomes } => {
                for outcome in outcomes {
                    let line = match outcome.status {
                        PostStatus::Posted => style(format!(
                            "{}: posted ({})",
                            outcome.destination,
                            outcome.post_id.as_deref().unwrap_or("-")
                        ))
                        .green(),
                        PostStatus::SkippedDuplicate => {
                            style(format!("{}: duplicate, skipped", outcome.destination)).dim()
                        }
                        PostStatus::Failed => style(format!(
                            "{}: failed ({})",
                            outcome.destination,
                            outcome.error_kind.as_deref().unwrap_or("?")
                        ))
                        .red(),
                    };
                    println!("    {}", line);
                }
            }
        }
    }

    if record.status == RunStatus::Completed {
        print_success(&record.summary_line());
    }
}
