use anyhow::Result;
use console::style;

use crate::cli::AppContext;
use crate::core::settings::Settings;
use crate::core::terminal::{self, print_status, print_success};

/// Non-interactive first-run setup: data directory, databases, vault
/// tables and a default settings file. Safe to run repeatedly.
pub async fn execute() -> Result<()> {
    terminal::print_banner();
    println!("  {}\n", style("Setting up the wirebot data directory...").bold());

    // Opening the context creates the directory and bootstraps every
    // table on both databases.
    let ctx = AppContext::open().await?;

    let settings_path = Settings::path(&ctx.data_dir);
    if !settings_path.exists() {
        let defaults = toml::to_string_pretty(&Settings::default())?;
        std::fs::write(&settings_path, defaults)?;
        print_status("Settings", &settings_path.display().to_string());
    }

    print_status("Data dir", &ctx.data_dir.display().to_string());
    print_status("Bots", "bots.db (configurations + credentials)");
    print_status("Ledger", "ledger.db (outcomes + run history)");
    print_success("Install complete. Add a bot with 'wirebot bots add --file <config.json>'.");
    Ok(())
}
