//! Grid store administration.
//!
//! Initializes the PostgreSQL schema, runs point queries, and drives the
//! retention and envelope migration jobs from the command line.

mod config;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use config::AdminConfig;
use grid_store::{GridStore, PgDocumentStore, PgProjectionCatalog, SourceField};

#[derive(Parser, Debug)]
#[command(name = "store-admin")]
#[command(about = "Administration for the sharded grid store")]
struct Args {
    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables and indexes
    Init,

    /// Read values at one grid location
    Query {
        /// Projection id
        #[arg(long)]
        proj_id: i32,

        /// Column coordinate (fractional values round down)
        #[arg(long)]
        x: f64,

        /// Row coordinate
        #[arg(long)]
        y: f64,

        /// Source fields as `field_id:metric_id`, repeatable
        #[arg(long = "field", required = true, value_parser = parse_source_field)]
        fields: Vec<SourceField>,

        /// Start of the valid-time range (RFC 3339, inclusive)
        #[arg(long)]
        start: DateTime<Utc>,

        /// End of the valid-time range (RFC 3339, exclusive)
        #[arg(long)]
        end: DateTime<Utc>,
    },

    /// Delete documents older than a cutoff for every cataloged projection
    Clean {
        /// Age cutoff in hours before now
        #[arg(long)]
        older_than_hours: i64,
    },

    /// Rewrite legacy zlib segments into the lzma envelope
    Migrate {
        /// Documents per batch (defaults to GRID_STORE_MIGRATION_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn parse_source_field(s: &str) -> Result<SourceField, String> {
    let (field, metric) = s
        .split_once(':')
        .ok_or_else(|| format!("expected field_id:metric_id, got '{}'", s))?;
    let field: i32 = field
        .trim()
        .parse()
        .map_err(|e| format!("invalid field id '{}': {}", field, e))?;
    let metric: i32 = metric
        .trim()
        .parse()
        .map_err(|e| format!("invalid metric id '{}': {}", metric, e))?;
    Ok(SourceField::new(field, metric))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.json_logs {
        fmt().with_env_filter(filter).with_target(true).json().init();
    } else {
        fmt().with_env_filter(filter).with_target(true).init();
    }

    let config = AdminConfig::from_env()?;
    info!(
        shard_width = config.store.n_x_per_row,
        max_connections = config.max_connections,
        "Loaded configuration"
    );

    let backend = PgDocumentStore::connect(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    let catalog = PgProjectionCatalog::new(backend.pool().clone());
    let store = GridStore::open(Arc::new(backend), config.store.clone()).await?;

    match args.command {
        Command::Init => {
            info!("Schema is up to date");
        }
        Command::Query {
            proj_id,
            x,
            y,
            fields,
            start,
            end,
        } => {
            let points = store.get_fields(proj_id, (x, y), &fields, start, end).await?;
            println!("{}", serde_json::to_string_pretty(&points)?);
        }
        Command::Clean { older_than_hours } => {
            if older_than_hours < 0 {
                bail!("--older-than-hours must not be negative");
            }
            let cutoff = Utc::now() - Duration::hours(older_than_hours);
            let deleted = store.clean(&catalog, cutoff).await?;
            info!(deleted, cutoff = %cutoff, "Clean complete");
        }
        Command::Migrate { batch_size } => {
            let batch_size = batch_size.unwrap_or(config.store.migration_batch_size);
            let report = store.migrate_to_lzma(batch_size).await?;
            println!(
                "{}",
                serde_json::json!({
                    "scanned": report.scanned,
                    "migrated": report.migrated,
                    "failed_documents": report.failed_documents,
                    "failed_batches": report.failed_batches,
                })
            );
        }
    }

    Ok(())
}
