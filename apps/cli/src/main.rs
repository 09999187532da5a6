use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

mod commands;

#[derive(Parser)]
#[command(
    name = "tb",
    about = "Tributary — multi-tenant CRM lead reconciliation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Platform state snapshot file
    #[arg(long, global = true, default_value = "tributary-state.json")]
    state: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass for a tenant
    Reconcile {
        /// Tenant id
        #[arg(long)]
        tenant: Uuid,

        /// Abandon in-flight provider fetches after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Score a batch of leads through the external qualifier
    Qualify {
        /// Tenant id
        #[arg(long)]
        tenant: Uuid,

        /// Explicit lead ids (comma-separated); omit to score recent leads
        #[arg(long, value_delimiter = ',')]
        ids: Vec<Uuid>,

        /// Batch size when selecting recent leads
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Run the periodic reconciliation scheduler until interrupted
    Schedule {
        /// Override the configured sweep interval
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Reconcile {
            tenant,
            deadline_secs,
        } => commands::reconcile::run(&cli.state, tenant, deadline_secs).await,
        Commands::Qualify { tenant, ids, limit } => {
            commands::qualify::run(&cli.state, tenant, ids, limit).await
        }
        Commands::Schedule { interval_secs } => {
            commands::schedule::run(&cli.state, interval_secs).await
        }
    }
}
