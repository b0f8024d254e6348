//! Operator command line for a Tree Hole database.
//!
//! Every command prints a single JSON document on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use treehole_store_sqlite::{LetterSummary, SettingRow, SqliteTreeholeStore};

#[derive(Debug, Parser)]
#[command(name = "th")]
#[command(about = "Tree Hole operator CLI")]
pub struct Cli {
    #[arg(long, default_value = "./treehole.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create or upgrade the schema and report its version.
    Migrate,
    /// Show stored settings and the most recent letters.
    Inspect {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub settings: Vec<SettingRow>,
    pub letters: Vec<LetterSummary>,
}

/// Executes a parsed CLI invocation.
///
/// # Errors
/// Returns an error when the database cannot be opened or queried.
pub fn run_cli(cli: Cli) -> Result<()> {
    let store = SqliteTreeholeStore::open(&cli.db)?;
    store.migrate()?;

    match cli.command {
        Command::Migrate => print_json(&store.schema_status()?),
        Command::Inspect { limit } => print_json(&inspect(&store, limit)?),
    }
}

/// Builds the read-only operator report.
///
/// # Errors
/// Returns an error when settings or letters cannot be read.
pub fn inspect(store: &SqliteTreeholeStore, limit: usize) -> Result<InspectReport> {
    Ok(InspectReport {
        settings: store.list_settings()?,
        letters: store.recent_letter_summaries(limit)?,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}
