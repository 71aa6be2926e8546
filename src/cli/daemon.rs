use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::cli::AppContext;
use crate::core::scheduler::BotScheduler;
use crate::core::terminal::{GuideSection, print_info, print_warn};

/// Run the fleet scheduler in the foreground until ctrl-c. Shutdown is
/// graceful: no new capability calls are issued, in-flight publishes
/// finish and record their outcomes before the process exits.
pub async fn execute() -> Result<()> {
    let ctx = AppContext::open().await?;
    let deps = ctx.run_deps()?;

    let cancel = CancellationToken::new();
    let mut scheduler = BotScheduler::new(deps, ctx.settings.run_retry, cancel.clone()).await?;
    let registered = scheduler.start().await?;

    if registered == 0 {
        print_warn("No bots scheduled. Add one with 'wirebot bots add'.");
    }
    GuideSection::new("Fleet Daemon")
        .entry("Bots", &registered.to_string())
        .entry("Data dir", &ctx.data_dir.display().to_string())
        .entry("Stop", "ctrl-c (waits for in-flight publishes)")
        .print();

    tokio::signal::ctrl_c().await?;
    print_info("Shutting down, letting in-flight publishes finish...");
    scheduler.shutdown().await?;
    crate::core::terminal::print_goodbye();
    Ok(())
}
