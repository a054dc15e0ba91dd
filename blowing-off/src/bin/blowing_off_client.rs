//! Command-line shell over a local `blowing-off` replica. Kept deliberately
//! thin: the interesting behavior lives in `blowing_off::replica::Replica`,
//! this binary only parses arguments and prints results.

use blowing_off::config::Config;
use blowing_off::replica::Replica;
use clap::{Parser, Subcommand};
use inbetweenies::EntityType;

/// `EntityType` is a closed set but lives in `inbetweenies` without a CLI
/// dependency; parse its snake_case wire form directly rather than adding
/// `clap::ValueEnum` to a crate shared with the server.
fn parse_entity_type(s: &str) -> Result<EntityType, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown entity type: {s}"))
}

#[derive(Parser)]
#[command(name = "blowing-off")]
#[command(version, about = "Local replica CLI for The Goodies sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new entity locally and mark it pending sync.
    Create {
        id: String,
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
        name: String,
        /// JSON object literal, defaults to `{}`.
        #[arg(long, default_value = "{}")]
        content: String,
    },
    /// Show an entity's current version.
    Show { id: String },
    /// Run one push-pull sync cycle against the server.
    Sync,
    /// Print this replica's last sync time and vector clock.
    Status,
    /// List tracker rows currently in conflict.
    Conflicts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let token = std::env::var("BLOWING_OFF_TOKEN").ok();
    let replica = Replica::open(config, token).await?;

    match Cli::parse().command {
        Commands::Create { id, entity_type, name, content } => {
            let content: serde_json::Value = serde_json::from_str(&content)?;
            let version = replica.create_entity(&id, entity_type, &name, content).await?;
            println!("created {} @ {}", version.id, version.version);
        }
        Commands::Show { id } => match replica.entity(&id).await? {
            Some(version) => println!("{}", serde_json::to_string_pretty(&version)?),
            None => println!("{id}: no current version (absent or unresolved conflict)"),
        },
        Commands::Sync => {
            let outcome = replica.sync().await?;
            println!("sync completed ({} applied, {} conflicts)", outcome.applied, outcome.conflicts);
        }
        Commands::Status => {
            let clock = replica.vector_clock().await?;
            let last_sync = replica.last_sync().await?;
            let pending = replica.pending().await?.len();
            println!("last_sync: {}", last_sync.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string()));
            println!("pending_count: {pending}");
            println!("vector_clock: {}", serde_json::to_string(&clock)?);
        }
        Commands::Conflicts => {
            for row in replica.conflicts().await? {
                println!(
                    "{} ({:?}) retries={} reason={}",
                    row.entity_id,
                    row.operation,
                    row.retry_count,
                    row.conflict_reason.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}
