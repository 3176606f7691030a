//! Administrative CLI for the custody audit store: explicit retention purges
//! and independent page integrity verification.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use evidence_custody::audit::{AuditPage, AuditStore, EventFilter};

#[derive(Parser)]
#[command(name = "custody-admin", about = "Evidence custody administration")]
struct Cli {
    /// Audit store database URL
    #[arg(long, default_value = "sqlite://custody.db")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete lifecycle events older than the retention period
    Purge {
        #[arg(long)]
        older_than_days: i64,
    },
    /// Recompute a page integrity hash and compare against an expected value
    VerifyPage {
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 50)]
        limit: u64,
        /// Hash previously returned to a client for this page
        #[arg(long)]
        expected: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evidence_custody=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = AuditStore::connect(&cli.database_url)
        .await
        .context("Failed to open audit store")?;

    match cli.command {
        Command::Purge { older_than_days } => {
            if older_than_days <= 0 {
                bail!("--older-than-days must be positive");
            }
            let removed = store
                .purge_older_than(chrono::Duration::days(older_than_days))
                .await?;
            println!("Removed {} events older than {} days", removed, older_than_days);
        }
        Command::VerifyPage {
            offset,
            limit,
            expected,
        } => {
            let page = store.page(offset, limit, &EventFilter::All).await?;
            let recomputed = AuditPage::compute_integrity_hash(&page.events);
            println!("Page offset={} limit={} events={}", offset, limit, page.events.len());
            println!("Integrity hash: {}", recomputed);
            if let Some(expected) = expected {
                if expected == recomputed {
                    println!("MATCH: page contents are unchanged");
                } else {
                    bail!("MISMATCH: page contents differ from the expected hash");
                }
            }
        }
    }

    Ok(())
}
