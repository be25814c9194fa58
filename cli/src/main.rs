//! ChainProject CLI: inspect and drive a SQLite-backed bridge-mapping projection.
//!
//! # Commands
//! ```text
//! chainproject info
//! chainproject status
//! chainproject get      <sender>
//! chainproject list     [--limit N] [--json]
//! chainproject replay   --events <file.json> [--to-block N]
//! chainproject rollback --before <block>
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chainproject_core::types::record_id;
use chainproject_core::{EventProjector, ProjectionStore, ReorgNotice};
use chainproject_ingest::{EventSource, IngestLoop, JsonFileSource};
use chainproject_storage::SqliteStore;

mod config;
mod logging;

use config::CliConfig;

#[derive(Parser)]
#[command(
    name = "chainproject",
    about = "ChainProject CLI: reorg-safe projection of bridge-mapper events",
    version
)]
struct Cli {
    /// JSON config file (projector, ingest, log sections)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show build and capability info
    Info,

    /// Show the checkpoint and rollback window
    Status,

    /// Print one mapping record by sender address
    Get {
        /// Sender address (any case, with or without 0x)
        sender: String,
    },

    /// List mapping records ordered by id
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply events from a JSON file (an array of events)
    Replay {
        /// Path to the event file
        #[arg(long)]
        events: PathBuf,
        /// Stop after this block (default: the file's highest block)
        #[arg(long)]
        to_block: Option<u64>,
    },

    /// Roll the projection back to the last checkpoint below a block
    Rollback {
        /// First block to discard
        #[arg(long)]
        before: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database = db;
    }
    if cli.verbose {
        config.log.level = "debug".into();
    }
    logging::init_tracing(&config.log);

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Status => cmd_status(&config).await,
        Commands::Get { sender } => cmd_get(&config, &sender).await,
        Commands::List { limit, json } => cmd_list(&config, limit, json).await,
        Commands::Replay { events, to_block } => cmd_replay(&config, &events, to_block).await,
        Commands::Rollback { before } => cmd_rollback(&config, before).await,
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn open_store(config: &CliConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database)
        .await
        .with_context(|| format!("cannot open database {}", config.database))?;
    Ok(Arc::new(store))
}

async fn open_projector(config: &CliConfig) -> Result<EventProjector<SqliteStore>> {
    let store = open_store(config).await?;
    Ok(EventProjector::open(store, config.projector.clone()).await?)
}

fn cmd_info() -> Result<()> {
    println!("ChainProject v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Events:");
    println!("  ✓ MappingUpdated           (upsert by sender, last write wins)");
    println!("  ✓ OwnershipTransferred     (checkpoint only)");
    println!();
    println!("Guarantees:");
    println!("  ✓ Atomic record + checkpoint commits");
    println!("  ✓ Reorg rollback within the snapshot window");
    println!("  ✓ Duplicate delivery is a no-op");
    println!();
    println!("Storage:                     SQLite (WAL), in-memory");
    Ok(())
}

async fn cmd_status(config: &CliConfig) -> Result<()> {
    let projector = open_projector(config).await?;
    let checkpoint = projector.checkpoint();
    let tracker = projector.tracker();

    println!("Projection:  {} ({})", config.projector.id, config.projector.chain);
    println!("Database:    {}", config.database);
    if checkpoint.is_genesis() {
        println!("Checkpoint:  genesis");
    } else {
        println!("Checkpoint:  #{} {}", checkpoint.block_number, checkpoint.block_hash);
    }
    println!(
        "Window:      {} blocks (oldest rollback target #{})",
        tracker.len(),
        tracker.base().block_number
    );
    println!("Records:     {}", projector.store().count().await?);
    Ok(())
}

async fn cmd_get(config: &CliConfig, sender: &str) -> Result<()> {
    let store = open_store(config).await?;
    let id = record_id(sender);
    match store.load(&id).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => anyhow::bail!("no record for {id}"),
    }
    Ok(())
}

async fn cmd_list(config: &CliConfig, limit: usize, as_json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.list(limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    println!("{:<44} {:<20} {:<44} {:<44}", "ID", "KEY", "FOREIGN TOKEN", "HOME TOKEN");
    for r in &records {
        println!("{:<44} {:<20} {:<44} {:<44}", r.id, r.key, r.foreign_token, r.home_token);
    }
    println!("\n{} of {} record(s)", records.len(), store.count().await?);
    Ok(())
}

async fn cmd_replay(config: &CliConfig, events: &Path, to_block: Option<u64>) -> Result<()> {
    let source = JsonFileSource::from_path(events).await?;
    if source.is_empty() {
        anyhow::bail!("no events in {}", events.display());
    }
    let target = match to_block {
        Some(n) => n,
        None => source.head_block_number().await?,
    };

    let projector = open_projector(config).await?;
    let before = projector.checkpoint();
    let mut ingest = IngestLoop::new(config.ingest.clone(), source, projector);
    let checkpoint = ingest.run_until(target).await?;

    println!(
        "Replayed {} → checkpoint #{} {} (was #{})",
        events.display(),
        checkpoint.block_number,
        checkpoint.block_hash,
        before.block_number
    );
    println!("Records:     {}", ingest.projector().store().count().await?);
    Ok(())
}

async fn cmd_rollback(config: &CliConfig, before: u64) -> Result<()> {
    let mut projector = open_projector(config).await?;
    let from = projector.checkpoint();
    let checkpoint = projector.handle_reorg(&ReorgNotice::at(before)).await?;

    if checkpoint == from {
        println!("Nothing to roll back: checkpoint #{} is below #{before}", from.block_number);
    } else {
        println!(
            "Rolled back #{} → #{} {}",
            from.block_number, checkpoint.block_number, checkpoint.block_hash
        );
    }
    Ok(())
}
