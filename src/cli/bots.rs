use anyhow::{Context, Result, bail};
use console::style;

use crate::cli::{AppContext, flag_value};
use crate::core::terminal::{GuideSection, print_status, print_success};
use crate::core::types::BotConfig;

fn print_usage() {
    GuideSection::new("wirebot bots")
        .command("list", "All bots with schedule and last run")
        .command("show <id|name>", "Full configuration of one bot")
        .command("add --file <path>", "Add a bot from a JSON config file")
        .command("clone <id|name> <new-name>", "Replicate a bot under a new identity")
        .command("remove <id|name>", "Delete a bot (its ledger rows remain)")
        .print();
}

pub async fn execute(args: &[String]) -> Result<()> {
    let ctx = AppContext::open().await?;

    match args.first().map(String::as_str) {
        Some("list") => {
            let bots = ctx.store.list().await?;
            if bots.is_empty() {
                println!("No bots configured.");
                return Ok(());
            }
            for bot in bots {
                let last_run = ctx
                    .store
                    .last_run_summary(&bot.id)
                    .await?
                    .map(|(at, summary)| format!("{} — {}", at, summary))
                    .unwrap_or_else(|| "never ran".to_string());
                println!(
                    "{}  {}\n    schedule: {}   topics: {}\n    last run: {}",
                    style(&bot.name).bold().green(),
                    style(&bot.id).dim(),
                    bot.schedule,
                    bot.topics.join(", "),
                    last_run
                );
            }
            Ok(())
        }
        Some("show") => {
            let id_or_name = args.get(1).context("usage: wirebot bots show <id|name>")?;
            let bot = require_bot(&ctx, id_or_name).await?;
            println!("{}", serde_json::to_string_pretty(&bot)?);
            Ok(())
        }
        Some("add") => {
            let path = flag_value(args, "--file")
                .context("usage: wirebot bots add --file <config.json>")?;
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path))?;
            let mut bot: BotConfig =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;
            if bot.id.trim().is_empty() {
                bot.id = uuid::Uuid::new_v4().to_string();
            }
            if ctx.store.find(&bot.name).await?.is_some() {
                bail!("a bot named '{}' already exists", bot.name);
            }
            ctx.store.save(&bot).await?;
            print_success(&format!("Added bot '{}' ({})", bot.name, bot.id));
            print_status("Schedule", &bot.schedule);
            Ok(())
        }
        Some("clone") => {
            let source = args.get(1).context("usage: wirebot bots clone <id|name> <new-name>")?;
            let new_name = args.get(2).context("usage: wirebot bots clone <id|name> <new-name>")?;
            if ctx.store.find(new_name).await?.is_some() {
                bail!("a bot named '{}' already exists", new_name);
            }
            let clone = ctx.store.clone_bot(source, new_name).await?;
            print_success(&format!("Cloned '{}' into '{}' ({})", source, clone.name, clone.id));
            Ok(())
        }
        Some("remove") => {
            let id_or_name = args.get(1).context("usage: wirebot bots remove <id|name>")?;
            if ctx.store.remove(id_or_name).await? {
                print_success(&format!("Removed bot '{}'", id_or_name));
            } else {
                bail!("no bot matching '{}'", id_or_name);
            }
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

async fn require_bot(ctx: &AppContext, id_or_name: &str) -> Result<BotConfig> {
    ctx.store
        .find(id_or_name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no bot matching '{}'", id_or_name))
}
