mod bots;
mod credentials;
mod daemon;
mod history;
mod install;
mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use console::style;

use crate::core::ledger::PostingLedger;
use crate::core::pipeline::PipelineRunner;
use crate::core::publish::ConnectorRegistry;
use crate::core::scheduler::RunDeps;
use crate::core::settings::Settings;
use crate::core::sources::SourceManager;
use crate::core::store::BotStore;
use crate::core::terminal;
use crate::core::transform::ArticleTransformer;
use crate::core::vault::CredentialVault;
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    terminal::GuideSection::new("Running")
        .command("run", "Run one bot (or an ad-hoc topic) right now")
        .command("daemon", "Run the fleet scheduler in the foreground")
        .print();

    terminal::GuideSection::new("Fleet")
        .command("bots", "List, add, clone and remove bots")
        .command("credentials", "Manage platform credentials in the vault")
        .print();

    terminal::GuideSection::new("Inspection")
        .command("history", "Show ledger outcomes and past runs")
        .command("install", "Create the data directory and databases")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("wirebot").green()
    );
}

/// Pull the value following a `--flag` out of an argv slice.
pub(crate) fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// All values of a repeatable `--flag`.
pub(crate) fn flag_values(args: &[String], flag: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            if let Some(value) = args.get(i + 1) {
                values.push(value.clone());
                i += 2;
                continue;
            }
        }
        i += 1;
    }
    values
}

pub(crate) fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Shared handles for every command that touches the data directory.
pub(crate) struct AppContext {
    pub data_dir: PathBuf,
    pub settings: Settings,
    pub store: Arc<BotStore>,
    pub ledger: Arc<PostingLedger>,
    pub vault: Arc<CredentialVault>,
}

impl AppContext {
    pub async fn open() -> Result<Self> {
        let data_dir = NativePlatform::data_dir();
        std::fs::create_dir_all(&data_dir)?;
        NativePlatform::restrict_dir_permissions(&data_dir);

        let settings = Settings::load(&data_dir)?;
        let store = Arc::new(BotStore::open(&data_dir.join("bots.db"))?);
        let ledger = Arc::new(PostingLedger::open(&data_dir.join("ledger.db"))?);
        let vault = Arc::new(CredentialVault::new(store.connection()));
        vault.initialize().await?;

        Ok(Self {
            data_dir,
            settings,
            store,
            ledger,
            vault,
        })
    }

    /// Wire the full pipeline stack over these handles.
    pub fn run_deps(&self) -> Result<Arc<RunDeps>> {
        let sources = SourceManager::with_default_adapters(self.settings.calls.source)?;
        let connectors = Arc::new(ConnectorRegistry::with_defaults(
            self.vault.clone(),
            self.settings.calls.publish.timeout(),
        )?);
        let runner = PipelineRunner::new(
            self.ledger.clone(),
            Arc::new(ArticleTransformer),
            connectors,
            self.settings.calls,
        );
        Ok(Arc::new(RunDeps {
            sources,
            runner,
            ledger: self.ledger.clone(),
            store: self.store.clone(),
        }))
    }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);
    let rest: &[String] = if args.len() > 2 { &args[2..] } else { &[] };

    // One-off commands stay quiet; the daemon logs at info.
    crate::logging::init(command == Some("daemon"));

    match command {
        Some("run") => run::execute(rest).await,
        Some("daemon") => daemon::execute().await,
        Some("bots") => bots::execute(rest).await,
        Some("credentials") => credentials::execute(rest).await,
        Some("history") => history::execute(rest).await,
        Some("install") => install::execute().await,
        Some("--version" | "-V" | "version") => {
            println!("wirebot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        _ => {
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flag_value_finds_the_following_token() {
        let args = argv(&["--bot", "rust-news", "--json"]);
        assert_eq!(flag_value(&args, "--bot").as_deref(), Some("rust-news"));
        assert_eq!(flag_value(&args, "--missing"), None);
        assert!(has_flag(&args, "--json"));
    }

    #[test]
    fn flag_values_collects_repeats() {
        let args = argv(&["--topic", "rust", "--topic", "wasm", "--feed", "u"]);
        assert_eq!(flag_values(&args, "--topic"), vec!["rust", "wasm"]);
    }

    #[test]
    fn dangling_flag_yields_nothing() {
        let args = argv(&["--topic"]);
        assert_eq!(flag_value(&args, "--topic"), None);
        assert!(flag_values(&args, "--topic").is_empty());
    }
}
