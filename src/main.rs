//! # Glider CLI (`glider`)
//!
//! Operator commands for the sync database. Syncing itself needs source
//! clients, which are wired in by the embedding application through
//! [`glider_sync::ingest::run_sync`] or [`glider_sync::scheduler::Scheduler`].
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `glider init` | Create the SQLite database and run schema migrations |
//! | `glider sources` | List enabled sources, intervals, and cursors |
//! | `glider status [source]` | Show cursor, last run, and playback state |
//! | `glider reset <source>` | Clear a source's cursor and playback state |
//!
//! ## Examples
//!
//! ```bash
//! glider init --config ./config/glider.toml
//! glider status oura
//! RUST_LOG=glider_core=debug glider status google_calendar:primary
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glider_sync::{config, migrate, sources, status};

/// Glider: incremental sync of calendar, listening, and health data.
#[derive(Parser)]
#[command(name = "glider", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/glider.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// List enabled sources with their interval and cursor.
    Sources,

    /// Show sync status for all sources, or those matching a selector.
    ///
    /// Selector: a source id (`oura:heartrate`), a kind (`oura_daily`),
    /// or a provider (`oura`).
    Status {
        source: Option<String>,
    },

    /// Forget a source's cursor and playback state.
    ///
    /// The next cycle fetches the full lookback window.
    Reset {
        /// Exact source id, e.g. `google_calendar:primary`.
        source: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is reserved for command output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "glider_sync=info,glider_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Status { source } => {
            status::run_status(&cfg, source.as_deref()).await?;
        }
        Commands::Reset { source } => {
            status::run_reset(&cfg, &source).await?;
        }
    }

    Ok(())
}
