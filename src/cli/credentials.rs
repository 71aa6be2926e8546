use std::io::Read;

use anyhow::{Context, Result, bail};

use crate::cli::AppContext;
use crate::core::terminal::{GuideSection, print_success};

fn print_usage() {
    GuideSection::new("wirebot credentials")
        .command("list", "Stored credential references (values stay sealed)")
        .command("set <ref>", "Store a credential; JSON read from stdin")
        .command("remove <ref>", "Delete a credential")
        .print();
}

pub async fn execute(args: &[String]) -> Result<()> {
    let ctx = AppContext::open().await?;

    match args.first().map(String::as_str) {
        Some("list") => {
            let refs = ctx.vault.list_refs().await?;
            if refs.is_empty() {
                println!("No credentials stored.");
            }
            for credential_ref in refs {
                println!("{}", credential_ref);
            }
            Ok(())
        }
        Some("set") => {
            let credential_ref = args
                .get(1)
                .context("usage: wirebot credentials set <ref> < creds.json")?;
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            let raw = raw.trim();
            if raw.is_empty() {
                bail!("expected credential JSON on stdin");
            }
            // Validate early so a typo doesn't surface as an auth error
            // mid-run.
            serde_json::from_str::<serde_json::Value>(raw)
                .context("credential must be valid JSON")?;
            ctx.vault.store(credential_ref, raw).await?;
            print_success(&format!("Stored credential '{}'", credential_ref));
            Ok(())
        }
        Some("remove") => {
            let credential_ref = args
                .get(1)
                .context("usage: wirebot credentials remove <ref>")?;
            if ctx.vault.remove(credential_ref).await? {
                print_success(&format!("Removed credential '{}'", credential_ref));
            } else {
                bail!("no credential stored under '{}'", credential_ref);
            }
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}
