//! # vigil
//!
//! Provisions the compliance store and reports on its contents.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use vigil_store::{Database, Store, StoreConfig};

/// Compliance store maintenance.
#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Compliance store maintenance")]
struct Cli {
    /// Settings file (defaults to `~/.vigil/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Use an ephemeral in-process database regardless of settings.
    #[arg(long)]
    in_memory: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Abort any single operation after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Create missing tables and columns, then exit.
    Migrate,
    /// Count the rows of every table.
    Check,
}

impl Cli {
    fn store_config(&self) -> Result<StoreConfig> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(vigil_settings::settings_path);
        let mut settings = vigil_settings::load_settings_from_path(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        if self.in_memory {
            settings.database.in_memory = true;
        }

        let mut config = StoreConfig::from_settings(&settings.database);
        if let Some(ms) = self.timeout_ms {
            config = config.with_operation_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    vigil_core::logging::init_subscriber(&cli.log_level);
    let config = cli.store_config()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    // Store operations block; keep them off the runtime's worker threads.
    let command = cli.command;
    let outcome = tokio::task::spawn_blocking(move || run(command, config, cancel))
        .await
        .context("store task panicked")?;
    signal.abort();
    outcome
}

fn run(command: Command, config: StoreConfig, cancel: CancellationToken) -> Result<()> {
    let store = vigil_domain::register(Store::builder(config))
        .build()
        .context("failed to open the compliance store")?
        .with_cancellation(cancel);

    match command {
        Command::Migrate => {
            let report = store.migration_report();
            info!(
                created = report.created.len(),
                added_columns = report.added_columns.len(),
                unchanged = report.unchanged.len(),
                "migration complete"
            );
            for table in &report.created {
                println!("created   {table}");
            }
            for (table, column) in &report.added_columns {
                println!("extended  {table}.{column}");
            }
            for table in &report.unchanged {
                println!("current   {table}");
            }
        }
        Command::Check => {
            for (table, rows) in row_counts(&store)? {
                println!("{table:<24} {rows}");
            }
        }
    }
    Ok(())
}

fn row_counts(store: &Store) -> Result<Vec<(&'static str, i64)>> {
    store
        .tables()
        .into_iter()
        .map(|table| {
            let rows = store
                .raw_records(&format!("SELECT COUNT(*) AS n FROM \"{table}\""), &[])
                .with_context(|| format!("failed to count rows of {table}"))?;
            let count = match rows.into_iter().next() {
                Some(mut row) => row.take_i64("n")?,
                None => 0,
            };
            Ok((table, count))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
