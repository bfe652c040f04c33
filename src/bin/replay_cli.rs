//! Fixture Replay operator CLI
//!
//! Drives the same service the daemon exposes, straight against the local
//! snapshot store. Results are printed as JSON on stdout; logs go to stderr.
//!
//! Usage:
//!   PRODUCTION_EVENT_LOG=./prod_events.db \
//!   cargo run --bin replay_cli -- ingest --source G1 --name "Cats v Swans"
//!
//!   cargo run --bin replay_cli -- list
//!   cargo run --bin replay_cli -- replay 3 --env uat --start 2025-01-01T00:00:00Z --dry-run

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use fixture_replay::models::{DeleteResponse, IngestRequest, ReplayRequest};
use fixture_replay::snapshot::SnapshotStore;
use fixture_replay::{Config, ReplayService};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "replay_cli")]
#[command(about = "Capture fixtures into snapshots and replay them onto the bus")]
struct Args {
    /// Path to the snapshot store (overrides REPLAY_DB_PATH)
    #[arg(long, env = "REPLAY_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture a fixture from the production event log
    Ingest {
        #[arg(long)]
        source: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long, default_value = "cli")]
        operator: String,
    },

    /// List stored snapshots, most recent first
    List,

    /// Show one snapshot's metadata
    Show { id: i64 },

    /// Replay a snapshot under a new fixture id
    Replay {
        id: i64,

        #[arg(long, default_value = "local")]
        env: String,

        /// Start time of the new fixture (RFC 3339); defaults to one hour from now
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Delete a snapshot and its events
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fixture_replay=info,replay_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(db) = args.db {
        config.database_path = db;
    }

    match args.command {
        Commands::Ingest {
            source,
            name,
            notes,
            operator,
        } => {
            let service = ReplayService::from_config(&config)?;
            let req = IngestRequest {
                source_fixture_id: source,
                display_name: name,
                notes,
            };
            let result = service.ingest(req, Some(&operator)).await;
            print_json(&result)?;
            if !result.success {
                bail!("ingest failed");
            }
        }
        Commands::List => {
            let store = SnapshotStore::new(&config.database_path)?;
            print_json(&store.list()?)?;
        }
        Commands::Show { id } => {
            let store = SnapshotStore::new(&config.database_path)?;
            match store.get_by_id(id)? {
                Some(summary) => print_json(&summary)?,
                None => bail!("snapshot {} not found", id),
            }
        }
        Commands::Replay {
            id,
            env,
            start,
            dry_run,
        } => {
            let service = ReplayService::from_config(&config)?;
            let req = ReplayRequest {
                snapshot_id: id,
                environment: env,
                target_start: start.unwrap_or_else(|| Utc::now() + Duration::hours(1)),
                dry_run,
            };
            let result = service.replay(req).await;
            print_json(&result)?;
            if !result.success {
                bail!("replay failed");
            }
        }
        Commands::Delete { id } => {
            let store = SnapshotStore::new(&config.database_path)?;
            let deleted = store.delete(id)?;
            print_json(&DeleteResponse { deleted })?;
            if !deleted {
                bail!("snapshot {} not found", id);
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}
